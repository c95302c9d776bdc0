//! The data feed.
//!
//! The feed emits, once per flush, the metrics each org should receive in
//! that flush so that every series gets one point per `period` seconds of
//! simulated time, sped up by `speedup`. With an `offset` the feed starts in
//! the past and backfills toward now, and with `stop_at_now` it ends once it
//! catches up.

use std::num::NonZeroU32;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::info;

use crate::metric::MetricData;

fn default_seed() -> [u8; 32] {
    [
        2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
        97, 101, 103, 107, 109, 113, 127, 131,
    ]
}

fn default_one() -> NonZeroU32 {
    NonZeroU32::MIN
}

fn default_flush_milliseconds() -> NonZeroU32 {
    NonZeroU32::new(1_000).unwrap_or(NonZeroU32::MIN)
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(deny_unknown_fields)]
/// Configuration of the data feed.
pub struct Config {
    /// The seed for random values
    #[serde(default = "default_seed")]
    pub seed: [u8; 32],
    /// The number of orgs to send for
    #[serde(default = "default_one")]
    pub orgs: NonZeroU32,
    /// The number of series per org
    pub metrics_per_org: NonZeroU32,
    /// Seconds between points of a single series
    #[serde(default = "default_one")]
    pub period_seconds: NonZeroU32,
    /// Milliseconds between flushes
    #[serde(default = "default_flush_milliseconds")]
    pub flush_milliseconds: NonZeroU32,
    /// How far in the past, in seconds, the first point lies
    #[serde(default)]
    pub offset_seconds: u32,
    /// Simulated seconds per wall-clock second
    #[serde(default = "default_one")]
    pub speedup: NonZeroU32,
    /// End the run once the feed reaches wall-clock time
    #[serde(default)]
    pub stop_at_now: bool,
    /// Attach tags to every series
    #[serde(default)]
    pub add_tags: bool,
}

/// Errors produced by [`Feed`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// The flush cadence cannot carry a whole number of periods.
    #[error(
        "not a good fit: flush ({flush_milliseconds}ms) * speedup ({speedup}) must be a multiple of period ({period_seconds}s) * 1000"
    )]
    Fit {
        /// Configured flush interval
        flush_milliseconds: u32,
        /// Configured speedup
        speedup: u32,
        /// Configured period
        period_seconds: u32,
    },
    /// The rate arithmetic overflowed.
    #[error("configured rates overflow")]
    Overflow,
}

#[derive(Debug)]
/// Produces batches of metrics, one per flush.
pub struct Feed {
    /// One template per series, grouped by org, time and value unset.
    metrics: Vec<Vec<MetricData>>,
    rate_per_flush_per_org: u64,
    flush: Duration,
    period: i64,
    stop_at_now: bool,
    /// Timestamp of the current cycle through the series.
    ts: i64,
    /// Series index the next batch starts from.
    start_from: usize,
    rng: StdRng,
}

impl Feed {
    /// Create a new [`Feed`] whose first point lies `offset_seconds` before
    /// `now`, a Unix timestamp.
    ///
    /// # Errors
    ///
    /// Fails if the flush cadence does not fit the period or the rates
    /// overflow.
    pub fn new(config: &Config, now: i64) -> Result<Self, Error> {
        let flush = u64::from(config.flush_milliseconds.get());
        let speedup = u64::from(config.speedup.get());
        let period = u64::from(config.period_seconds.get());
        let mpo = u64::from(config.metrics_per_org.get());
        let orgs = u64::from(config.orgs.get());

        if (flush * speedup) % (1_000 * period) != 0 {
            return Err(Error::Fit {
                flush_milliseconds: config.flush_milliseconds.get(),
                speedup: config.speedup.get(),
                period_seconds: config.period_seconds.get(),
            });
        }

        // Each flush carries a whole number of cycles through the series.
        let cycles_per_flush = flush * speedup / (1_000 * period);
        let rate_per_flush_per_org = mpo
            .checked_mul(cycles_per_flush)
            .ok_or(Error::Overflow)?;
        // A batch holds every org's share.
        let rate_per_flush = rate_per_flush_per_org
            .checked_mul(orgs)
            .filter(|rate| usize::try_from(*rate).is_ok())
            .ok_or(Error::Overflow)?;
        let rate_per_s_per_org = mpo * speedup / period;

        info!(
            "params: orgs={orgs}, mpo={mpo}, period={period}, flush={flush}, offset={offset}, speedup={speedup}, stop_at_now={stop}",
            offset = config.offset_seconds,
            stop = config.stop_at_now,
        );
        info!(
            "per org: each {flush}ms, flushing {rate_per_flush_per_org} metrics so rate of {rate_per_s_per_org} Hz. ({mpo} total unique series)"
        );
        info!(
            "times {orgs} orgs: each {flush}ms, flushing {rate_per_flush} metrics so rate of {} Hz. ({} total unique series)",
            rate_per_s_per_org.saturating_mul(orgs),
            mpo * orgs,
        );

        let period = i64::from(config.period_seconds.get());
        Ok(Self {
            metrics: build_metrics(config),
            rate_per_flush_per_org,
            flush: Duration::from_millis(flush),
            period,
            stop_at_now: config.stop_at_now,
            ts: now - i64::from(config.offset_seconds) - period,
            start_from: 0,
            rng: StdRng::from_seed(config.seed),
        })
    }

    /// Wall-clock time between batches.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush
    }

    /// Produce the next batch.
    ///
    /// Continues from where the previous batch stopped, cycling through the
    /// series. The timestamp advances by one period each time the cycle
    /// returns to the first series; every org shares the timestamp of a
    /// given position.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn next_batch(&mut self) -> Vec<MetricData> {
        let mpo = self.metrics.first().map_or(0, Vec::len);
        let total = self.rate_per_flush_per_org as usize * self.metrics.len();
        let mut batch = Vec::with_capacity(total);

        let mut m = self.start_from;
        for num in 0..self.rate_per_flush_per_org as usize {
            m = (self.start_from + num) % mpo;
            if m == 0 {
                self.ts += self.period;
            }
            for org in &self.metrics {
                let mut metric = org[m].clone();
                metric.time = self.ts;
                metric.value = self.rng.random::<f64>() * (m + 1) as f64;
                batch.push(metric);
            }
        }
        self.start_from = (m + 1) % mpo;

        batch
    }

    /// Whether the feed has caught up with `now` and should stop.
    #[must_use]
    pub fn finished(&self, now: i64) -> bool {
        self.stop_at_now && self.ts >= now
    }

    /// Timestamp of the most recent batch.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.ts
    }
}

fn build_metrics(config: &Config) -> Vec<Vec<MetricData>> {
    (1..=config.orgs.get())
        .map(|org_id| {
            (1..=config.metrics_per_org.get())
                .map(|m| {
                    let name = format!("some.id.of.a.metric.{m}");
                    let tags = if config.add_tags {
                        vec![
                            "some=tag".to_string(),
                            format!("name={name}"),
                            format!("id={m}"),
                        ]
                    } else {
                        Vec::new()
                    };
                    let mut metric = MetricData {
                        id: String::new(),
                        org_id,
                        name,
                        interval: config.period_seconds.get(),
                        unit: "ms".to_string(),
                        mtype: "gauge".to_string(),
                        tags,
                        time: 0,
                        value: 0.0,
                    };
                    metric.set_id();
                    metric
                })
                .collect()
        })
        .collect()
}
