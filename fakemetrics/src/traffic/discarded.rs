//! A series the receiver should discard.
//!
//! The series starts out valid and each enabled option spoils one aspect of
//! it. Identity fields are spoiled once, up front. Timestamps are spoiled
//! per point and the first enabled of `invalid_timestamp`, `out_of_order`
//! and `duplicate` wins.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metric::MetricData;

/// Seconds the out-of-order points lag behind, and half the length of the
/// cycle they repeat on.
const OUT_OF_ORDER_LAG: i64 = 3;

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
/// Configuration of [`Discarded`].
pub struct Config {
    /// Stamp every point at zero
    pub invalid_timestamp: bool,
    /// Give the series an interval of zero
    pub invalid_interval: bool,
    /// Send for org zero
    pub invalid_org_id: bool,
    /// Give the series an empty name
    pub invalid_name: bool,
    /// Give the series an unknown metric type
    pub invalid_mtype: bool,
    /// Give the series a malformed tag
    pub invalid_tags: bool,
    /// Send points behind the clock for half of every six seconds
    pub out_of_order: bool,
    /// Send the first timestamp over and over
    pub duplicate: bool,
}

/// Sends one spoiled series, valued 2, once per second.
#[derive(Debug)]
pub struct Discarded {
    config: Config,
    metric: MetricData,
}

impl Discarded {
    /// Create a new [`Discarded`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut metric = super::single_series("some.id.of.a.metric.0", Vec::new());
        if config.invalid_interval {
            metric.interval = 0;
        }
        if config.invalid_org_id {
            metric.org_id = 0;
        }
        if config.invalid_name {
            metric.name = String::new();
        }
        if config.invalid_mtype {
            metric.mtype = "invalid Mtype".to_string();
        }
        if config.invalid_tags {
            metric.tags = vec!["==invalid tags,#4561==".to_string()];
        }
        metric.set_id();
        Self { config, metric }
    }

    /// The point for wall-clock second `now`.
    pub fn next_batch(&mut self, now: i64) -> Vec<MetricData> {
        let time = if self.config.invalid_timestamp {
            0
        } else if self.config.out_of_order {
            if now.rem_euclid(2 * OUT_OF_ORDER_LAG) < OUT_OF_ORDER_LAG {
                now - OUT_OF_ORDER_LAG
            } else {
                now
            }
        } else if self.config.duplicate && self.metric.time != 0 {
            self.metric.time
        } else {
            now
        };
        self.metric.time = time;
        self.metric.value = 2.0;
        debug!("sending {metric:?}", metric = self.metric);
        vec![self.metric.clone()]
    }
}
