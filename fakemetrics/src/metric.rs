//! Metric records as they travel to an ingestion backend.

use std::{fmt::Write as _, str::FromStr};

use fakemetrics_keycache::{Key, MKey, key};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A fully described metric data point.
///
/// `id` is the textual [`MKey`] of the series and is derived from the other
/// identifying fields by [`MetricData::set_id`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricData {
    /// Series identity, `<org>.<hex key>`.
    pub id: String,
    /// Owning tenant.
    pub org_id: u32,
    /// Dotted metric name.
    pub name: String,
    /// Expected seconds between points.
    pub interval: u32,
    /// Unit of `value`.
    pub unit: String,
    /// Metric type, "gauge" and the like.
    pub mtype: String,
    /// `key=value` tags.
    pub tags: Vec<String>,
    /// Unix timestamp, seconds.
    pub time: i64,
    /// The value.
    pub value: f64,
}

impl MetricData {
    /// Derive and store this series' identity.
    ///
    /// The key is the first 16 bytes of a SHA-256 over name, unit, mtype,
    /// interval and the sorted tags, so the identity is stable across runs
    /// and independent of tag order.
    pub fn set_id(&mut self) {
        let mut tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.unit.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.mtype.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.interval.to_le_bytes());
        for tag in tags {
            hasher.update([0u8]);
            hasher.update(tag.as_bytes());
        }
        let digest = hasher.finalize();

        let mut key = [0; 16];
        key.copy_from_slice(&digest[..16]);
        self.id = MKey {
            org: self.org_id,
            key: Key(key),
        }
        .to_string();
    }

    /// Parse `id` back into its [`MKey`].
    ///
    /// # Errors
    ///
    /// Fails if `id` is not of the form `<org>.<32 hex chars>`.
    pub fn mkey(&self) -> Result<MKey, key::Error> {
        MKey::from_str(&self.id)
    }

    /// The carbon plaintext line for this point, newline terminated.
    pub fn write_carbon(&self, buf: &mut String) {
        // Writing to a String cannot fail.
        let _ = writeln!(buf, "{} {} {}", self.name, self.value, self.time);
    }
}

/// The compact form of a point whose identity the receiver already knows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    /// Series identity.
    pub mkey: MKey,
    /// The value.
    pub value: f64,
    /// Unix timestamp, seconds.
    pub time: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    fn metric(tags: Vec<String>) -> MetricData {
        MetricData {
            id: String::new(),
            org_id: 3,
            name: "some.id.of.a.metric.1".to_string(),
            interval: 1,
            unit: "ms".to_string(),
            mtype: "gauge".to_string(),
            tags,
            time: 1_600_000_000,
            value: 1.5,
        }
    }

    #[test]
    fn id_is_stable_and_tag_order_independent() {
        let mut a = metric(vec!["a=1".to_string(), "b=2".to_string()]);
        let mut b = metric(vec!["b=2".to_string(), "a=1".to_string()]);
        a.set_id();
        b.set_id();
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("3."));
        assert_eq!(a.mkey().unwrap().org, 3);
    }

    #[test]
    fn id_depends_on_name_and_org() {
        let mut a = metric(vec![]);
        let mut b = metric(vec![]);
        b.name = "some.id.of.a.metric.2".to_string();
        let mut c = metric(vec![]);
        c.org_id = 4;
        a.set_id();
        b.set_id();
        c.set_id();
        assert_ne!(a.id, b.id);
        assert_ne!(a.mkey().unwrap().key, b.mkey().unwrap().key);
        assert_eq!(a.mkey().unwrap().key, c.mkey().unwrap().key);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn carbon_line() {
        let mut buf = String::new();
        metric(vec![]).write_carbon(&mut buf);
        assert_eq!(buf, "some.id.of.a.metric.1 1.5 1600000000\n");
    }
}
