//! A series whose points arrive out of order.
//!
//! Every ten seconds of wall-clock time splits in two halves. In the first
//! the point is stamped five seconds in the past, in the second five
//! seconds in the future, so each half replays timestamps the receiver has
//! already moved beyond.

use crate::metric::MetricData;

/// Sends `fakemetrics.ooo` once per second with shuffled timestamps.
#[derive(Debug)]
pub struct OutOfOrder {
    metric: MetricData,
}

impl OutOfOrder {
    /// Create a new [`OutOfOrder`].
    #[must_use]
    pub fn new() -> Self {
        let mut metric = super::single_series("fakemetrics.ooo", vec!["data=out-of-order".to_string()]);
        metric.set_id();
        Self { metric }
    }

    /// The point for wall-clock second `now`. Its value is its timestamp.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_batch(&mut self, now: i64) -> Vec<MetricData> {
        let mut metric = self.metric.clone();
        metric.time = if now.rem_euclid(10) < 5 { now - 5 } else { now + 5 };
        metric.value = metric.time as f64;
        vec![metric]
    }
}

impl Default for OutOfOrder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamps_jump_around_the_clock() {
        let mut ooo = OutOfOrder::new();
        let times: Vec<i64> = (5..=20)
            .map(|now| ooo.next_batch(now)[0].time)
            .collect();
        assert_eq!(
            times,
            vec![10, 11, 12, 13, 14, 5, 6, 7, 8, 9, 20, 21, 22, 23, 24, 15]
        );
    }

    #[test]
    fn value_tracks_timestamp() {
        let mut ooo = OutOfOrder::new();
        let metric = ooo.next_batch(1_600_000_003).remove(0);
        assert_eq!(metric.time, 1_599_999_998);
        assert!((metric.value - 1_599_999_998.0).abs() < f64::EPSILON);
        assert_eq!(metric.name, "fakemetrics.ooo");
        assert_eq!(metric.tags, vec!["data=out-of-order"]);
        assert_eq!(metric.org_id, 1);
        assert!(metric.mkey().is_ok());
    }
}
