//! The message-queue output.
//!
//! Each metric becomes one message keyed for partitioning. With `compact`
//! enabled the output remembers, through a [`KeyCache`], which series it sent
//! recently: those go out as 33 byte [`MetricPoint`]s, everything else as a
//! full [`MetricData`]. A series forgotten by the cache reverts to the full
//! form, which re-arms the compact form for its next point.
//!
//! ## Metrics
//!
//! In addition to the metrics common to every output:
//!
//! `compact_encodings`: Metrics sent as `MetricPoint`
//! `full_encodings`: Metrics sent as `MetricData`
//!

use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use fakemetrics_keycache::{KeyCache, key};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, info, trace};

use crate::{
    codec::{self, encode_full, encode_point},
    metric::{MetricData, MetricPoint},
    out::labels,
};

fn default_compact() -> bool {
    true
}

fn default_stale_threshold_seconds() -> u64 {
    20 * 60
}

fn default_prune_interval_seconds() -> u64 {
    10 * 60
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
/// How messages are keyed for partitioning.
pub enum PartitionScheme {
    /// All of an org's series share a key.
    #[default]
    ByOrg,
    /// Each series is keyed by its name.
    BySeries,
    /// Keyed by name, with the partition set explicitly from the number
    /// after the last `.` of the name: `a.b.7` lands on partition 7.
    LastNum,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this output.
pub struct Config {
    /// The address of the queue's ingest listener, `host:port`
    pub addr: String,
    /// How messages are keyed
    #[serde(default)]
    pub partition_scheme: PartitionScheme,
    /// Send recently seen series in the compact encoding
    #[serde(default = "default_compact")]
    pub compact: bool,
    /// Seconds a series may go unsent before it needs the full encoding
    /// again
    #[serde(default = "default_stale_threshold_seconds")]
    pub stale_threshold_seconds: u64,
    /// Seconds between sweeps of the series cache
    #[serde(default = "default_prune_interval_seconds")]
    pub prune_interval_seconds: u64,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Mdm`].
pub enum Error {
    /// See [`crate::codec::Error`] for details.
    #[error(transparent)]
    Codec(#[from] codec::Error),
    /// A metric id is not a valid key.
    #[error(transparent)]
    Key(#[from] key::Error),
    /// The series cache could not be started.
    #[error("Key cache error: {0}")]
    KeyCache(#[from] fakemetrics_keycache::Error),
    /// The metric name does not end in a partition number.
    #[error("invalid metric name for last_num partitioning: {0:?}")]
    PartitionName(String),
    /// A message part exceeds the frame length field.
    #[error("Message of {0} bytes is too large to frame")]
    Frame(usize),
    /// Error connecting to the queue
    #[error("Failed to connect to queue address {addr}: {source}")]
    ConnectionFailed {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// Error writing to the queue
    #[error("Failed to write to queue address {addr}: {source}")]
    WriteFailed {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One keyed message.
pub struct Message {
    /// Partitioning key
    pub key: Bytes,
    /// Explicit partition, overriding the key when set
    pub partition: Option<i32>,
    /// Encoded metric
    pub value: Bytes,
}

#[async_trait]
/// The transport beneath [`Mdm`].
pub trait Producer: Send {
    /// Deliver a batch of messages, all or nothing from the caller's view.
    async fn send_messages(&mut self, messages: &[Message]) -> Result<(), Error>;

    /// Release the transport.
    async fn close(&mut self) {}
}

#[derive(Debug)]
/// Writes messages as length-delimited frames to a queue's TCP ingest
/// listener: `i32` BE partition (`-1` to partition by key), `u32` BE key
/// length, key, `u32` BE value length, value.
pub struct TcpProducer {
    addr: String,
    connection: Option<TcpStream>,
    buffer: BytesMut,
}

impl TcpProducer {
    /// Create a new [`TcpProducer`]. No connection is made until the first
    /// send.
    #[must_use]
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            connection: None,
            buffer: BytesMut::new(),
        }
    }
}

fn put_frame(buf: &mut BytesMut, part: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(part.len()).map_err(|_| Error::Frame(part.len()))?;
    buf.put_u32(len);
    buf.put_slice(part);
    Ok(())
}

#[async_trait]
impl Producer for TcpProducer {
    async fn send_messages(&mut self, messages: &[Message]) -> Result<(), Error> {
        self.buffer.clear();
        for message in messages {
            self.buffer.put_i32(message.partition.unwrap_or(-1));
            put_frame(&mut self.buffer, &message.key)?;
            put_frame(&mut self.buffer, &message.value)?;
        }

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let stream = TcpStream::connect(&self.addr).await.map_err(|source| {
                    Error::ConnectionFailed {
                        addr: self.addr.clone(),
                        source: Box::new(source),
                    }
                })?;
                info!("connected to queue at {addr}", addr = self.addr);
                stream
            }
        };
        connection
            .write_all(&self.buffer)
            .await
            .map_err(|source| Error::WriteFailed {
                addr: self.addr.clone(),
                source: Box::new(source),
            })?;
        self.connection = Some(connection);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.shutdown().await {
                trace!("queue shutdown failed: {err}");
            }
        }
    }
}

#[derive(Debug)]
/// The message-queue output.
pub struct Mdm<P = TcpProducer> {
    producer: P,
    partition_scheme: PartitionScheme,
    key_cache: Option<KeyCache>,
    metric_labels: Vec<(String, String)>,
}

impl Config {
    /// The series cache configuration, if `compact` is enabled.
    #[must_use]
    pub fn key_cache(&self) -> Option<fakemetrics_keycache::Config> {
        self.compact.then(|| fakemetrics_keycache::Config {
            stale_threshold: Duration::from_secs(self.stale_threshold_seconds),
            prune_interval: Duration::from_secs(self.prune_interval_seconds),
        })
    }

    /// Check the configuration without starting anything.
    ///
    /// # Errors
    ///
    /// Function will return an error if the series cache configuration can
    /// not be represented by the cache.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(key_cache) = self.key_cache() {
            key_cache.validate()?;
        }
        Ok(())
    }
}

impl Mdm<TcpProducer> {
    /// Create a new [`Mdm`] writing to the configured address.
    ///
    /// # Errors
    ///
    /// Function will return an error if the series cache configuration is
    /// invalid or no tokio runtime is running.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_producer(config, TcpProducer::new(config.addr.clone()))
    }
}

impl<P> Mdm<P>
where
    P: Producer,
{
    /// Create a new [`Mdm`] over an arbitrary [`Producer`].
    ///
    /// # Errors
    ///
    /// Function will return an error if the series cache configuration is
    /// invalid or no tokio runtime is running.
    pub fn with_producer(config: &Config, producer: P) -> Result<Self, Error> {
        let key_cache = config.key_cache().map(KeyCache::new).transpose()?;
        Ok(Self {
            producer,
            partition_scheme: config.partition_scheme,
            key_cache,
            metric_labels: labels("mdm"),
        })
    }

    fn partition(&self, metric: &MetricData) -> Result<(Bytes, Option<i32>), Error> {
        let by_series = || Bytes::copy_from_slice(metric.name.as_bytes());
        match self.partition_scheme {
            PartitionScheme::ByOrg => Ok((Bytes::copy_from_slice(&metric.org_id.to_be_bytes()), None)),
            PartitionScheme::BySeries => Ok((by_series(), None)),
            PartitionScheme::LastNum => {
                let partition = metric
                    .name
                    .rsplit_once('.')
                    .and_then(|(_, num)| num.parse::<i32>().ok())
                    .filter(|partition| *partition >= 0)
                    .ok_or_else(|| Error::PartitionName(metric.name.clone()))?;
                Ok((by_series(), Some(partition)))
            }
        }
    }

    /// Encode and publish `metrics`.
    ///
    /// A series is marked seen in the cache as its record is encoded, before
    /// the batch is delivered. If delivery fails the receiver may never see
    /// the full record, yet that series goes out compact on the next flush
    /// until it stales out of the cache.
    ///
    /// # Errors
    ///
    /// Function will return an error if a metric id is malformed, a name does
    /// not fit the partition scheme, encoding fails or the producer fails to
    /// deliver.
    pub async fn flush(&mut self, metrics: &[MetricData]) -> Result<(), Error> {
        let pre_flush = Instant::now();
        if metrics.is_empty() {
            histogram!("flush_duration_seconds", &self.metric_labels).record(0.0);
            return Ok(());
        }
        // Every touch in a flush uses the same instant.
        let now = SystemTime::now();

        let mut messages = Vec::with_capacity(metrics.len());
        let mut compact: u64 = 0;
        let mut full: u64 = 0;
        for metric in metrics {
            let (key, partition) = self.partition(metric)?;
            let mut value = BytesMut::new();
            match self.key_cache {
                Some(ref key_cache) => {
                    let mkey = metric.mkey()?;
                    if key_cache.touch(&mkey, now) {
                        let point = MetricPoint {
                            mkey,
                            value: metric.value,
                            time: u32::try_from(metric.time).unwrap_or_default(),
                        };
                        encode_point(&point, &mut value);
                        compact += 1;
                    } else {
                        encode_full(metric, &mut value)?;
                        full += 1;
                    }
                }
                None => {
                    encode_full(metric, &mut value)?;
                    full += 1;
                }
            }
            histogram!("message_bytes", &self.metric_labels).record(value.len() as f64);
            messages.push(Message {
                key,
                partition,
                value: value.freeze(),
            });
        }
        counter!("compact_encodings", &self.metric_labels).increment(compact);
        counter!("full_encodings", &self.metric_labels).increment(full);
        if self.key_cache.is_some() && full > 0 {
            debug!("{full} metrics could not be sent as MetricPoint");
        }

        let pre_publish = Instant::now();
        if let Err(err) = self.producer.send_messages(&messages).await {
            counter!("publish_errors", &self.metric_labels).increment(1);
            return Err(err);
        }

        let count = metrics.len() as u64;
        counter!("published_messages", &self.metric_labels).increment(count);
        counter!("published_metrics", &self.metric_labels).increment(count);
        histogram!("publish_duration_seconds", &self.metric_labels)
            .record(pre_publish.elapsed().as_secs_f64());
        histogram!("flush_duration_seconds", &self.metric_labels)
            .record(pre_flush.elapsed().as_secs_f64());
        Ok(())
    }

    /// Close the producer and stop the series cache.
    pub async fn close(mut self) {
        self.producer.close().await;
        if let Some(key_cache) = self.key_cache {
            key_cache.shutdown().await;
        }
    }
}
