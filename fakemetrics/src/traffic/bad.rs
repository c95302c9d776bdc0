//! A series with a malformed name.

use crate::metric::MetricData;

/// Sends `.foo.bar`, a name with an empty first node, once per second.
#[derive(Debug)]
pub struct Bad {
    metric: MetricData,
}

impl Bad {
    /// Create a new [`Bad`].
    #[must_use]
    pub fn new() -> Self {
        let mut metric = super::single_series(".foo.bar", Vec::new());
        metric.set_id();
        Self { metric }
    }

    /// The point for wall-clock second `now`, valued at `now`.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_batch(&mut self, now: i64) -> Vec<MetricData> {
        let mut metric = self.metric.clone();
        metric.time = now;
        metric.value = now as f64;
        vec![metric]
    }
}

impl Default for Bad {
    fn default() -> Self {
        Self::new()
    }
}
