//! A single lock-scoped recency table.
//!
//! Entries are stored as one byte [`Stamp`] offsets from the shard's [`Ref`].
//! [`Shard::prune`] is the only place the reference moves and the only place
//! stamps are rewritten against it, so it must run well inside the 256 bucket
//! window a stamp can express. [`crate::KeyCache`] enforces this by refusing
//! configurations whose sweep cadence could let a stamp overflow.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use rustc_hash::FxHashMap;

use crate::{
    key::SubKey,
    stamp::{Ref, Stamp},
};

#[derive(Debug)]
struct Table {
    reference: Ref,
    entries: FxHashMap<SubKey, Stamp>,
}

/// One lock, one table, one time reference.
#[derive(Debug)]
pub struct Shard {
    table: Mutex<Table>,
}

impl Shard {
    /// Create an empty shard whose stamps are relative to `reference`.
    #[must_use]
    pub fn new(reference: Ref) -> Self {
        Self {
            table: Mutex::new(Table {
                reference,
                entries: FxHashMap::default(),
            }),
        }
    }

    // No critical section in this module can leave the table half-written,
    // so a poisoned lock is still a consistent one.
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as seen at `now`, returning whether it was already present.
    ///
    /// Caller guarantees `now` is no earlier than this shard's reference and
    /// less than 256 buckets past it.
    pub fn touch(&self, key: SubKey, now: SystemTime) -> bool {
        let mut table = self.lock();
        let stamp = Stamp::new(table.reference, now);
        table.entries.insert(key, stamp).is_some()
    }

    /// The number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the shard holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shard's current time reference.
    #[must_use]
    pub fn reference(&self) -> Ref {
        self.lock().reference
    }

    /// Drop every entry last touched more than `stale_threshold` buckets
    /// before `now` and re-base the survivors. Returns the number retained.
    ///
    /// The reference advances to the staleness horizon, `bucket(now) -
    /// stale_threshold`, and never backwards. Every surviving entry was
    /// touched at or after the horizon, so its stamp shrinks by at most its
    /// own value and no subtraction here can underflow.
    pub fn prune(&self, now: SystemTime, stale_threshold: u8) -> usize {
        let now = Ref::new(now).0;
        let horizon = now.saturating_sub(u32::from(stale_threshold));

        let mut table = self.lock();
        let reference = table.reference.0;
        let rebased = reference.max(horizon);

        table.entries.retain(|_, stamp| {
            let touched = reference + u32::from(stamp.0);
            if touched < horizon {
                return false;
            }
            // touched >= rebased, and touched - rebased <= stamp.0
            *stamp = Stamp(u8::try_from(touched - rebased).unwrap_or(u8::MAX));
            true
        });
        table.reference = Ref(rebased);
        table.entries.len()
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use proptest::{collection, prelude::*};

    use super::*;
    use crate::stamp::BUCKET_SECONDS;

    // A bucket-aligned starting point, well clear of the epoch.
    const T0: u64 = 600 * 2_666_667;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(T0 + secs)
    }

    fn sub(n: u8) -> SubKey {
        SubKey([n; 15])
    }

    #[test]
    fn first_touch_then_repeat() {
        let shard = Shard::new(Ref::new(at(0)));
        assert!(!shard.touch(sub(1), at(0)));
        assert!(shard.touch(sub(1), at(0)));
        assert!(shard.touch(sub(1), at(301)));
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let shard = Shard::new(Ref::new(at(0)));
        assert!(!shard.touch(sub(1), at(0)));
        assert!(!shard.touch(sub(2), at(0)));
        assert!(shard.touch(sub(1), at(10)));
        assert_eq!(shard.len(), 2);

        // Staling out one key leaves the other untouched.
        shard.touch(sub(2), at(1_800));
        assert_eq!(shard.prune(at(1_800), 2), 1);
        assert!(shard.touch(sub(2), at(1_800)));
        assert!(!shard.touch(sub(1), at(1_800)));
    }

    #[test]
    fn prune_scenario_twenty_minute_threshold() {
        let shard = Shard::new(Ref::new(at(0)));
        assert!(!shard.touch(sub(7), at(0)));
        assert!(shard.touch(sub(7), at(300)));

        assert_eq!(shard.prune(at(600), 2), 1);
        assert_eq!(shard.prune(at(1_800), 2), 0);
        assert!(!shard.touch(sub(7), at(1_860)));
    }

    #[test]
    fn prune_with_zero_threshold_rebases_to_now() {
        let shard = Shard::new(Ref::new(at(0)));
        shard.touch(sub(1), at(1_200));
        assert_eq!(shard.prune(at(1_200), 0), 1);
        assert_eq!(shard.reference(), Ref::new(at(1_200)));
        assert_eq!(shard.prune(at(1_800), 0), 0);
        assert!(shard.is_empty());
    }

    #[test]
    fn reference_never_moves_backwards() {
        let shard = Shard::new(Ref::new(at(6_000)));
        shard.touch(sub(1), at(6_000));
        assert_eq!(shard.prune(at(0), 2), 1);
        assert_eq!(shard.reference(), Ref::new(at(6_000)));
        assert!(shard.touch(sub(1), at(6_000)));
    }

    #[test]
    fn late_prune_drops_everything_without_wrapping() {
        let shard = Shard::new(Ref::new(at(0)));
        shard.touch(sub(1), at(600 * 200));
        // Far past the window: everything is stale, nothing wraps back to
        // looking fresh.
        assert_eq!(shard.prune(at(600 * 1_000), 10), 0);
        assert_eq!(shard.reference(), Ref::new(at(600 * 990)));
    }

    // The absolute bucket of every retained entry survives a prune, and the
    // retained set is exactly the set touched at or after the horizon.
    fn prune_matches_model_inner(
        stale_threshold: u8,
        touches: Vec<(u8, u8)>,
        prune_at: u16,
    ) -> Result<(), TestCaseError> {
        let shard = Shard::new(Ref::new(at(0)));
        let base = Ref::new(at(0)).0;
        let mut model: FxHashMap<u8, u32> = FxHashMap::default();
        for (key, bucket) in &touches {
            shard.touch(sub(*key), at(u64::from(*bucket) * BUCKET_SECONDS));
            model.insert(*key, base + u32::from(*bucket));
        }
        let last = touches.iter().map(|(_, b)| *b).max().unwrap_or(0);
        let now = base + u32::from(last) + u32::from(prune_at);
        model.retain(|_, touched| *touched + u32::from(stale_threshold) >= now);

        let remaining = shard.prune(
            at(u64::from(now - base) * BUCKET_SECONDS),
            stale_threshold,
        );
        prop_assert_eq!(remaining, model.len());

        let table = shard.lock();
        for (key, touched) in &model {
            let stamp = table.entries.get(&sub(*key)).copied();
            prop_assert!(stamp.is_some());
            let stamp = stamp.unwrap_or(Stamp(0));
            prop_assert_eq!(table.reference.0 + u32::from(stamp.0), *touched);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prune_matches_model(
            stale_threshold in 0u8..=128,
            touches in collection::vec((any::<u8>(), 0u8..=126), 1..64),
            prune_at in 0u16..=128,
        ) {
            prune_matches_model_inner(stale_threshold, touches, prune_at)?;
        }
    }

    // A key touched every interval is never reported unseen, no matter how
    // long the run.
    fn continuous_touch_never_forgotten_inner(
        stale_threshold: u8,
        interval: u8,
        cycles: u16,
    ) -> Result<(), TestCaseError> {
        let shard = Shard::new(Ref::new(at(0)));
        let step = u64::from(interval) * BUCKET_SECONDS;
        prop_assert!(!shard.touch(sub(3), at(0)));
        for cycle in 1..=u64::from(cycles) {
            let now = at(cycle * step);
            prop_assert!(shard.touch(sub(3), now - Duration::from_secs(1)));
            prop_assert_eq!(shard.prune(now, stale_threshold), 1);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn continuous_touch_never_forgotten(
            stale_threshold in 1u8..=120,
            interval in 1u8..=120,
            cycles in 1u16..2_000,
        ) {
            prop_assume!(stale_threshold >= interval);
            continuous_touch_never_forgotten_inner(stale_threshold, interval, cycles)?;
        }
    }

    #[test]
    fn rebasing_stable_over_a_month() {
        // 20 minute threshold, 10 minute sweeps, touched every five minutes
        // for 30 days.
        let shard = Shard::new(Ref::new(at(0)));
        assert!(!shard.touch(sub(9), at(0)));
        for step in 1..(30 * 24 * 12) {
            let now = at(step * 300);
            assert!(shard.touch(sub(9), now), "forgotten at step {step}");
            if step % 2 == 0 {
                assert_eq!(shard.prune(now, 2), 1);
            }
        }
    }
}
