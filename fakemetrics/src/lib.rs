//! The fakemetrics metric traffic generator.
//!
//! A [`traffic::Traffic`] fabricates batches of metrics and [`run`] hands
//! each batch to every configured [`out::Output`] on a fixed cadence. The library supports the fakemetrics binary found elsewhere in
//! this project.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    future::Future,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use metrics::histogram;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

pub mod codec;
pub mod config;
pub mod feed;
pub mod metric;
pub mod out;
pub mod traffic;

use out::Output;
use traffic::Traffic;

/// Seconds since the Unix epoch, zero for a clock set before it.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Drive `traffic` into `outputs` until `shutdown` resolves or the traffic
/// finishes, as a feed with `stop_at_now` does once it catches up with the
/// wall clock.
///
/// One batch is produced per flush interval and written to each output in
/// turn. A failed flush is logged and does not stop the run. Every output is
/// closed before returning.
pub async fn run<F>(mut traffic: Traffic, mut outputs: Vec<Output>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = time::interval(traffic.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let pre_flush = Instant::now();
                let batch = traffic.next_batch(unix_now());
                for output in &mut outputs {
                    if let Err(err) = output.flush(&batch).await {
                        error!("failed to flush {len} metrics to {name}: {err}", len = batch.len(), name = output.name());
                    }
                }
                histogram!("feed_flush_duration_seconds").record(pre_flush.elapsed().as_secs_f64());

                if traffic.finished(unix_now()) {
                    info!("{name} traffic caught up with now, stopping", name = traffic.name());
                    break;
                }
            }
        }
    }

    for output in outputs {
        output.close().await;
    }
}
