//! Wire encodings for the message-queue output.
//!
//! A record is either a full [`MetricData`], encoded as a MessagePack map, or
//! a compact [`MetricPoint`] of fixed width. The compact form is only safe
//! once the receiver has seen the full form for the same series.

use bytes::{BufMut, BytesMut};

use crate::metric::{MetricData, MetricPoint};

/// Leading byte of a compact [`MetricPoint`] record. A MessagePack map never
/// starts with this byte.
pub const FORMAT_METRIC_POINT: u8 = 0x01;

/// Encoded size of a [`MetricPoint`], format byte included.
pub const METRIC_POINT_LEN: usize = 1 + 4 + 16 + 8 + 4;

/// Errors produced while encoding.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `MsgPack` payload could not be encoded
    #[error("MsgPack payload could not be encoded: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
}

/// Append the full encoding of `metric` to `buf`.
///
/// # Errors
///
/// Fails if MessagePack serialization fails.
pub fn encode_full(metric: &MetricData, buf: &mut BytesMut) -> Result<(), Error> {
    let mut writer = buf.writer();
    rmp_serde::encode::write_named(&mut writer, metric)?;
    Ok(())
}

/// Append the compact encoding of `point` to `buf`.
///
/// Layout: format byte, org (`u32` LE), key (16 bytes), value (`f64` LE),
/// time (`u32` LE).
pub fn encode_point(point: &MetricPoint, buf: &mut BytesMut) {
    buf.reserve(METRIC_POINT_LEN);
    buf.put_u8(FORMAT_METRIC_POINT);
    buf.put_u32_le(point.mkey.org);
    buf.put_slice(&point.mkey.key.0);
    buf.put_f64_le(point.value);
    buf.put_u32_le(point.time);
}

#[cfg(test)]
mod test {
    use fakemetrics_keycache::{Key, MKey};

    use super::*;

    #[test]
    fn point_layout() {
        let point = MetricPoint {
            mkey: MKey {
                org: 0x0102_0304,
                key: Key([0xAA; 16]),
            },
            value: 2.0,
            time: 7,
        };
        let mut buf = BytesMut::new();
        encode_point(&point, &mut buf);

        assert_eq!(buf.len(), METRIC_POINT_LEN);
        assert_eq!(buf[0], FORMAT_METRIC_POINT);
        assert_eq!(&buf[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[5..21], &[0xAA; 16]);
        assert_eq!(&buf[21..29], &2.0f64.to_le_bytes());
        assert_eq!(&buf[29..33], &7u32.to_le_bytes());
    }

    #[test]
    fn full_is_a_named_map() {
        let mut metric = MetricData {
            id: String::new(),
            org_id: 1,
            name: "some.id.of.a.metric.1".to_string(),
            interval: 1,
            unit: "ms".to_string(),
            mtype: "gauge".to_string(),
            tags: vec!["some=tag".to_string()],
            time: 1_600_000_000,
            value: 0.5,
        };
        metric.set_id();

        let mut buf = BytesMut::new();
        encode_full(&metric, &mut buf).unwrap();

        // fixmap with nine entries
        assert_eq!(buf[0], 0x89);
        assert_ne!(buf[0], FORMAT_METRIC_POINT);
        assert!(buf.len() > METRIC_POINT_LEN);
        let needle = b"OrgId";
        assert!(buf.windows(needle.len()).any(|w| w == needle));
    }
}
