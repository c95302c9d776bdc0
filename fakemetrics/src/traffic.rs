//! Traffic shapes
//!
//! The shape of the generated traffic is chosen in configuration. The
//! [`feed::Feed`] produces steady load across many orgs and series. The
//! remaining shapes each send a single series once per second, built to be
//! rejected or reordered by the receiver.
//!
//! ## Metrics
//!
//! `feed_metrics_generated`: Metrics produced across all batches, labelled
//! by `traffic`

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::{feed, metric::MetricData};

pub mod bad;
pub mod discarded;
pub mod out_of_order;

#[derive(thiserror::Error, Debug, Clone, Copy)]
/// Errors produced by [`Traffic`].
pub enum Error {
    /// See [`crate::feed::Error`] for details.
    #[error(transparent)]
    Feed(#[from] feed::Error),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Traffic`]
pub enum Config {
    /// See [`crate::feed::Config`] for details.
    Feed(feed::Config),
    /// See [`crate::traffic::out_of_order::OutOfOrder`] for details.
    OutOfOrder,
    /// See [`crate::traffic::bad::Bad`] for details.
    Bad,
    /// See [`crate::traffic::discarded::Config`] for details.
    Discarded(discarded::Config),
}

#[derive(Debug)]
/// A traffic shape.
///
/// All traffic shapes supported by fakemetrics are a variant of this enum.
/// Please see variant documentation for details.
pub enum Traffic {
    /// See [`crate::feed::Feed`] for details.
    Feed(feed::Feed),
    /// See [`crate::traffic::out_of_order::OutOfOrder`] for details.
    OutOfOrder(out_of_order::OutOfOrder),
    /// See [`crate::traffic::bad::Bad`] for details.
    Bad(bad::Bad),
    /// See [`crate::traffic::discarded::Discarded`] for details.
    Discarded(discarded::Discarded),
}

impl Traffic {
    /// Create a new [`Traffic`] starting at `now`, a Unix timestamp.
    ///
    /// # Errors
    ///
    /// Function will return an error if the feed configuration is invalid.
    pub fn new(config: &Config, now: i64) -> Result<Self, Error> {
        let traffic = match config {
            Config::Feed(conf) => Self::Feed(feed::Feed::new(conf, now)?),
            Config::OutOfOrder => Self::OutOfOrder(out_of_order::OutOfOrder::new()),
            Config::Bad => Self::Bad(bad::Bad::new()),
            Config::Discarded(conf) => Self::Discarded(discarded::Discarded::new(*conf)),
        };
        Ok(traffic)
    }

    /// A short name for logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Feed(_) => "feed",
            Self::OutOfOrder(_) => "out_of_order",
            Self::Bad(_) => "bad",
            Self::Discarded(_) => "discarded",
        }
    }

    /// Wall-clock time between batches.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        match self {
            Self::Feed(inner) => inner.flush_interval(),
            Self::OutOfOrder(_) | Self::Bad(_) | Self::Discarded(_) => Duration::from_secs(1),
        }
    }

    /// Produce the next batch for wall-clock time `now`.
    ///
    /// The feed keeps its own simulated clock and ignores `now`.
    pub fn next_batch(&mut self, now: i64) -> Vec<MetricData> {
        let batch = match self {
            Self::Feed(inner) => inner.next_batch(),
            Self::OutOfOrder(inner) => inner.next_batch(now),
            Self::Bad(inner) => inner.next_batch(now),
            Self::Discarded(inner) => inner.next_batch(now),
        };
        counter!("feed_metrics_generated", "traffic" => self.name()).increment(batch.len() as u64);
        batch
    }

    /// Whether the traffic has run its course at `now`. Only a feed with
    /// `stop_at_now` ever finishes.
    #[must_use]
    pub fn finished(&self, now: i64) -> bool {
        match self {
            Self::Feed(inner) => inner.finished(now),
            Self::OutOfOrder(_) | Self::Bad(_) | Self::Discarded(_) => false,
        }
    }
}

/// The single series sent by the once-per-second shapes, time and value
/// unset.
fn single_series(name: &str, tags: Vec<String>) -> MetricData {
    MetricData {
        id: String::new(),
        org_id: 1,
        name: name.to_string(),
        interval: 1,
        unit: "s".to_string(),
        mtype: "gauge".to_string(),
        tags,
        time: 0,
        value: 0.0,
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use super::*;

    const NOW: i64 = 1_600_000_000;

    #[test]
    fn shapes_send_once_per_second_forever() {
        for config in [
            Config::OutOfOrder,
            Config::Bad,
            Config::Discarded(discarded::Config::default()),
        ] {
            let mut traffic = Traffic::new(&config, NOW).unwrap();
            assert_eq!(traffic.flush_interval(), Duration::from_secs(1));
            assert_eq!(traffic.next_batch(NOW).len(), 1);
            assert!(!traffic.finished(i64::MAX));
        }
    }

    #[test]
    fn feed_delegates() {
        let config = Config::Feed(feed::Config {
            seed: [1; 32],
            orgs: NonZeroU32::MIN,
            metrics_per_org: NonZeroU32::new(3).unwrap(),
            period_seconds: NonZeroU32::MIN,
            flush_milliseconds: NonZeroU32::new(500).unwrap(),
            offset_seconds: 0,
            speedup: NonZeroU32::new(2).unwrap(),
            stop_at_now: true,
            add_tags: false,
        });
        let mut traffic = Traffic::new(&config, NOW).unwrap();
        assert_eq!(traffic.name(), "feed");
        assert_eq!(traffic.flush_interval(), Duration::from_millis(500));
        // The feed keeps its own clock.
        let batch = traffic.next_batch(0);
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|m| m.time == NOW));
        assert!(traffic.finished(NOW));
    }

    #[test]
    fn feed_errors_surface() {
        let config = Config::Feed(feed::Config {
            seed: [1; 32],
            orgs: NonZeroU32::MIN,
            metrics_per_org: NonZeroU32::new(10).unwrap(),
            period_seconds: NonZeroU32::new(3).unwrap(),
            flush_milliseconds: NonZeroU32::new(1_000).unwrap(),
            offset_seconds: 0,
            speedup: NonZeroU32::MIN,
            stop_at_now: false,
            add_tags: false,
        });
        let err = Traffic::new(&config, NOW).unwrap_err();
        assert!(matches!(err, Error::Feed(feed::Error::Fit { .. })));
    }
}
