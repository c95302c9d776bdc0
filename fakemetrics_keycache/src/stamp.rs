//! Coarse time bookkeeping for the cache.
//!
//! Time is tracked in 10 minute buckets. A [`Ref`] is an absolute bucket
//! count since the Unix epoch, a [`Stamp`] is a one byte offset from some
//! `Ref`. One byte covers 256 buckets, a little over 42 hours, and every
//! shard must be re-based before that window closes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Width of a single time bucket, in seconds.
pub const BUCKET_SECONDS: u64 = 600;

/// Width of a single time bucket.
pub const BUCKET: Duration = Duration::from_secs(BUCKET_SECONDS);

/// An absolute time reference: the number of whole buckets since the Unix
/// epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(pub(crate) u32);

impl Ref {
    /// Bucket the given time. Times before the epoch land in bucket zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(t: SystemTime) -> Self {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        // u32 buckets of ten minutes run out some 80,000 years from now.
        Self((secs / BUCKET_SECONDS) as u32)
    }

    /// The number of buckets since the epoch.
    #[must_use]
    pub fn buckets(self) -> u32 {
        self.0
    }
}

/// A compact timestamp: buckets elapsed since the owning shard's [`Ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(pub(crate) u8);

impl Stamp {
    /// Express `t` relative to `reference`.
    ///
    /// Caller guarantees `reference <= t` and that fewer than 256 buckets
    /// separate them. Outside that window the offset wraps silently.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(reference: Ref, t: SystemTime) -> Self {
        Self(Ref::new(t).0.wrapping_sub(reference.0) as u8)
    }

    /// The offset in buckets.
    #[must_use]
    pub fn offset(self) -> u8 {
        self.0
    }
}

/// Whole buckets in `d`, rounding down. `None` if the result does not fit a
/// [`Stamp`].
pub(crate) fn buckets_floor(d: Duration) -> Option<u8> {
    u8::try_from(d.as_secs() / BUCKET_SECONDS).ok()
}

/// Buckets spanned by `d`, rounding up. `None` if the result does not fit a
/// [`Stamp`].
pub(crate) fn buckets_ceil(d: Duration) -> Option<u8> {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    u8::try_from(secs.div_ceil(BUCKET_SECONDS)).ok()
}
