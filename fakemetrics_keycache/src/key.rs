//! Metric identities.
//!
//! An [`MKey`] names a metric stream: the owning org and a 16 byte key. The
//! first byte of the key picks a shard, the other fifteen are the lookup key
//! inside that shard.

use std::{fmt, str::FromStr};

/// Length of a [`Key`] in bytes.
pub const KEY_LEN: usize = 16;

/// Errors produced when parsing an [`MKey`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The input has no `.` between org and key.
    #[error("missing '.' separator in metric key {0:?}")]
    Separator(String),
    /// The org part is not a `u32`.
    #[error("invalid org in metric key {input:?}: {source}")]
    Org {
        /// The rejected input
        input: String,
        /// Underlying parse error
        #[source]
        source: std::num::ParseIntError,
    },
    /// The key part is not 32 hex characters.
    #[error("invalid key in metric key {input:?}: {source}")]
    Key {
        /// The rejected input
        input: String,
        /// Underlying decode error
        #[source]
        source: hex::FromHexError,
    },
}

/// The 16 byte identity of a metric within an org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Key(pub [u8; KEY_LEN]);

impl Key {
    /// The byte that selects a shard.
    #[must_use]
    pub fn shard(&self) -> u8 {
        self.0[0]
    }

    /// The key with its shard selector stripped.
    #[must_use]
    pub fn sub_key(&self) -> SubKey {
        let mut sub = [0; KEY_LEN - 1];
        sub.copy_from_slice(&self.0[1..]);
        SubKey(sub)
    }
}

/// The part of a [`Key`] stored inside a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubKey(pub [u8; KEY_LEN - 1]);

/// A metric identity: org plus key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MKey {
    /// The tenant this metric belongs to.
    pub org: u32,
    /// The per-tenant identity.
    pub key: Key,
}

impl fmt::Display for MKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.org, hex::encode(self.key.0))
    }
}

impl FromStr for MKey {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (org, key) = input
            .split_once('.')
            .ok_or_else(|| Error::Separator(input.to_string()))?;
        let org = org.parse::<u32>().map_err(|source| Error::Org {
            input: input.to_string(),
            source,
        })?;
        let mut bytes = [0; KEY_LEN];
        hex::decode_to_slice(key, &mut bytes).map_err(|source| Error::Key {
            input: input.to_string(),
            source,
        })?;
        Ok(Self {
            org,
            key: Key(bytes),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_then_parse() {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::try_from(i * 17).unwrap();
        }
        let mkey = MKey {
            org: 42,
            key: Key(bytes),
        };
        let text = mkey.to_string();
        assert_eq!(text, "42.00112233445566778899aabbccddeeff");
        assert_eq!(text.parse::<MKey>().unwrap(), mkey);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "nodot".parse::<MKey>(),
            Err(Error::Separator(_))
        ));
        assert!(matches!(
            "x.00112233445566778899aabbccddeeff".parse::<MKey>(),
            Err(Error::Org { .. })
        ));
        assert!(matches!(
            "1.0011".parse::<MKey>(),
            Err(Error::Key { .. })
        ));
        assert!(matches!(
            "1.zz112233445566778899aabbccddeeff".parse::<MKey>(),
            Err(Error::Key { .. })
        ));
    }

    #[test]
    fn shard_and_sub_key_split() {
        let mut bytes = [9u8; KEY_LEN];
        bytes[0] = 200;
        let key = Key(bytes);
        assert_eq!(key.shard(), 200);
        assert_eq!(key.sub_key(), SubKey([9u8; KEY_LEN - 1]));
    }
}
