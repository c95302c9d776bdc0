//! The fakemetrics key cache
//!
//! Answers "has this metric identity been seen in the last N minutes?" for
//! millions of identities across many tenants. The message-queue output uses
//! the answer to pick between a compact encoding, valid only when the
//! receiver already knows the identity, and a full one.
//!
//! Structure, leaves first: a [`Shard`] is one lock over a table of one byte
//! time stamps, a [`Cache`] is 256 shards for a single tenant, and the
//! [`KeyCache`] maps tenants to caches and owns the background task that
//! prunes them.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
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
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use metrics::{counter, gauge, histogram};
use rustc_hash::FxHashMap;
use tokio::{
    runtime::{Handle, TryCurrentError},
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info};

pub mod cache;
pub mod key;
pub mod shard;
pub mod stamp;

pub use cache::Cache;
pub use key::{Key, MKey, SubKey};
pub use shard::Shard;
pub use stamp::{Ref, Stamp};

/// Errors produced by [`KeyCache`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The stale threshold does not fit in a [`Stamp`].
    #[error("stale threshold {0:?} exceeds the 255 ten-minute buckets a stamp can hold")]
    StaleThreshold(Duration),
    /// The prune interval does not fit in a [`Stamp`].
    #[error("prune interval {0:?} exceeds the 255 ten-minute buckets a stamp can hold")]
    PruneInterval(Duration),
    /// The prune interval is zero.
    #[error("prune interval must be greater than zero")]
    ZeroPruneInterval,
    /// Stamps written between sweeps could overflow.
    #[error(
        "stale threshold {stale_threshold:?} plus prune interval {prune_interval:?} must stay under 255 ten-minute buckets"
    )]
    Window {
        /// Configured stale threshold
        stale_threshold: Duration,
        /// Configured prune interval
        prune_interval: Duration,
    },
    /// No tokio runtime is available to own the pruning task.
    #[error("key cache must be created inside a tokio runtime: {0}")]
    Runtime(#[from] TryCurrentError),
}

/// Configuration of the [`KeyCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How long an identity may go untouched before it is forgotten.
    /// Resolution is ten minutes, rounding down.
    pub stale_threshold: Duration,
    /// How often the background sweep runs.
    pub prune_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(20 * 60),
            prune_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Config {
    /// Check the configuration against what a one byte stamp can express,
    /// returning the stale threshold in buckets.
    ///
    /// Each value on its own must fit in 255 buckets, and together they must
    /// stay under 255. A sweep re-bases a shard to `now - stale_threshold`,
    /// so a stamp written just before the next sweep can sit up to
    /// `stale_threshold + prune_interval` buckets past its reference. This
    /// rejects some pairs that fit individually, such as a 255 bucket
    /// threshold swept every ten minutes.
    ///
    /// # Errors
    ///
    /// See documentation in [`Error`].
    pub fn validate(&self) -> Result<u8, Error> {
        let stale_threshold = stamp::buckets_floor(self.stale_threshold)
            .ok_or(Error::StaleThreshold(self.stale_threshold))?;
        let prune_interval = stamp::buckets_ceil(self.prune_interval)
            .ok_or(Error::PruneInterval(self.prune_interval))?;
        if self.prune_interval.is_zero() {
            return Err(Error::ZeroPruneInterval);
        }
        // A touch just before a sweep lands up to `prune_interval` buckets
        // past a reference that may trail the previous sweep by
        // `stale_threshold` buckets.
        if u16::from(stale_threshold) + u16::from(prune_interval) >= u16::from(u8::MAX) {
            return Err(Error::Window {
                stale_threshold: self.stale_threshold,
                prune_interval: self.prune_interval,
            });
        }
        Ok(stale_threshold)
    }
}

/// The source of "now" for the pruning task.
pub trait Clock: Send + Sync + 'static {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that reads the system's wall clock.
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug)]
struct Tenants {
    stale_threshold: u8,
    caches: Mutex<FxHashMap<u32, Arc<Cache>>>,
}

impl Tenants {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<u32, Arc<Cache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<(u32, Arc<Cache>)> {
        self.lock()
            .iter()
            .map(|(org, cache)| (*org, Arc::clone(cache)))
            .collect()
    }

    fn prune(&self, now: SystemTime) -> usize {
        let start = std::time::Instant::now();
        let targets = self.snapshot();
        let swept = targets.len();

        let mut remaining = 0;
        let mut reclaimed: u64 = 0;
        for (org, cache) in targets {
            let size = cache.prune(now, self.stale_threshold);
            if size == 0 {
                self.lock().remove(&org);
                reclaimed += 1;
            }
            remaining += size;
        }

        let tenants = self.lock().len();
        gauge!("keycache_tenants").set(tenants as f64);
        gauge!("keycache_entries").set(remaining as f64);
        counter!("keycache_tenants_reclaimed").increment(reclaimed);
        histogram!("keycache_prune_duration_seconds").record(start.elapsed().as_secs_f64());
        debug!(
            "pruned {swept} tenants: {reclaimed} reclaimed, {remaining} entries remaining"
        );
        remaining
    }
}

/// Process-wide recency cache, keyed by tenant.
///
/// Tenant caches are created on first touch and dropped by the background
/// sweep once all of their entries have gone stale. The sweep runs every
/// `prune_interval` for as long as the `KeyCache` lives; it stops on
/// [`KeyCache::shutdown`] or when the `KeyCache` is dropped.
#[derive(Debug)]
pub struct KeyCache {
    tenants: Arc<Tenants>,
    shutdown: watch::Sender<()>,
    pruner: JoinHandle<()>,
}

impl KeyCache {
    /// Create a new [`KeyCache`] pruned against the system clock.
    ///
    /// # Errors
    ///
    /// Fails if the configuration cannot be represented by one byte stamps or
    /// if called outside of a tokio runtime.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_clock(config, RealClock)
    }

    /// Create a new [`KeyCache`] whose pruning task reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration cannot be represented by one byte stamps or
    /// if called outside of a tokio runtime.
    pub fn with_clock<C>(config: Config, clock: C) -> Result<Self, Error>
    where
        C: Clock,
    {
        let stale_threshold = config.validate()?;
        let runtime = Handle::try_current()?;

        let tenants = Arc::new(Tenants {
            stale_threshold,
            caches: Mutex::new(FxHashMap::default()),
        });
        let (shutdown, watcher) = watch::channel(());
        let pruner = runtime.spawn(prune_loop(
            Arc::clone(&tenants),
            clock,
            config.prune_interval,
            watcher,
        ));
        info!(
            "key cache started: stale threshold {stale_threshold} buckets, prune interval {:?}",
            config.prune_interval
        );

        Ok(Self {
            tenants,
            shutdown,
            pruner,
        })
    }

    /// Mark `mkey` as seen at `now`, returning whether it had been seen
    /// within the stale threshold.
    pub fn touch(&self, mkey: &MKey, now: SystemTime) -> bool {
        let cache = {
            let mut caches = self.tenants.lock();
            Arc::clone(
                caches
                    .entry(mkey.org)
                    .or_insert_with(|| Arc::new(Cache::new(Ref::new(now)))),
            )
        };
        cache.touch(&mkey.key, now)
    }

    /// Total entries across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        let caches: Vec<Arc<Cache>> = self.tenants.lock().values().cloned().collect();
        caches.iter().map(|cache| cache.len()).sum()
    }

    /// Whether no entries are held for any tenant.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held for `org`, or `None` if the tenant has no cache.
    #[must_use]
    pub fn tenant_len(&self, org: u32) -> Option<usize> {
        let cache = self.tenants.lock().get(&org).cloned();
        cache.map(|cache| cache.len())
    }

    /// The number of tenants with a live cache.
    #[must_use]
    pub fn tenants(&self) -> usize {
        self.tenants.lock().len()
    }

    /// Run one full sweep as of `now`, the same sweep the background task
    /// runs. Returns the number of entries retained.
    pub fn prune(&self, now: SystemTime) -> usize {
        self.tenants.prune(now)
    }

    /// Stop the pruning task, waiting for a sweep in progress to finish.
    pub async fn shutdown(self) {
        let Self {
            shutdown, pruner, ..
        } = self;
        drop(shutdown);
        if let Err(err) = pruner.await {
            debug!("key cache pruner did not exit cleanly: {err}");
        }
    }
}

async fn prune_loop<C>(
    tenants: Arc<Tenants>,
    clock: C,
    period: Duration,
    mut shutdown: watch::Receiver<()>,
) where
    C: Clock,
{
    // The first sweep is one full period out. Missed ticks fire in a burst
    // so that sweep starts are never further apart than `period`.
    let mut interval = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("key cache pruner stopping");
                return;
            }
            _ = interval.tick() => {
                tenants.prune(clock.now());
            }
        }
    }
}
