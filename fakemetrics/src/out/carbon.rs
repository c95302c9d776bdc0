//! The carbon plaintext output.
//!
//! Writes each batch as `<name> <value> <time>\n` lines over TCP. The
//! connection is made on first flush and dropped on any write failure; the
//! next flush reconnects.

use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{info, trace};

use crate::{metric::MetricData, out::labels};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this output.
pub struct Config {
    /// The address of the carbon listener, `host:port`
    pub addr: String,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Carbon`].
pub enum Error {
    /// Error connecting to the carbon listener
    #[error("Failed to connect to carbon address {addr}: {source}")]
    ConnectionFailed {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// Error writing to the carbon listener
    #[error("Failed to write to carbon address {addr}: {source}")]
    WriteFailed {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

#[derive(Debug)]
/// The carbon output.
pub struct Carbon {
    addr: String,
    connection: Option<TcpStream>,
    buffer: String,
    metric_labels: Vec<(String, String)>,
}

impl Carbon {
    /// Create a new [`Carbon`] instance. No connection is made until the
    /// first flush.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            addr: config.addr,
            connection: None,
            buffer: String::new(),
            metric_labels: labels("carbon"),
        }
    }

    /// Write `metrics` to the listener.
    ///
    /// # Errors
    ///
    /// Function will return an error if the connection cannot be made or the
    /// write fails. A failed write drops the connection.
    pub async fn flush(&mut self, metrics: &[MetricData]) -> Result<(), Error> {
        let pre_flush = Instant::now();
        if metrics.is_empty() {
            histogram!("flush_duration_seconds", &self.metric_labels).record(0.0);
            return Ok(());
        }

        self.buffer.clear();
        for metric in metrics {
            metric.write_carbon(&mut self.buffer);
        }

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let stream = TcpStream::connect(&self.addr).await.map_err(|source| {
                    counter!("connection_failure", &self.metric_labels).increment(1);
                    Error::ConnectionFailed {
                        addr: self.addr.clone(),
                        source: Box::new(source),
                    }
                })?;
                info!("connected to carbon at {addr}", addr = self.addr);
                stream
            }
        };

        let pre_publish = Instant::now();
        if let Err(source) = connection.write_all(self.buffer.as_bytes()).await {
            trace!("write failed: {source}");
            counter!("publish_errors", &self.metric_labels).increment(1);
            return Err(Error::WriteFailed {
                addr: self.addr.clone(),
                source: Box::new(source),
            });
        }
        self.connection = Some(connection);

        let count = metrics.len() as u64;
        histogram!("message_bytes", &self.metric_labels).record(self.buffer.len() as f64);
        histogram!("publish_duration_seconds", &self.metric_labels)
            .record(pre_publish.elapsed().as_secs_f64());
        counter!("published_messages", &self.metric_labels).increment(1);
        counter!("published_metrics", &self.metric_labels).increment(count);
        histogram!("flush_duration_seconds", &self.metric_labels)
            .record(pre_flush.elapsed().as_secs_f64());
        Ok(())
    }

    /// Flush and shut down the connection, if any.
    pub async fn close(mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.shutdown().await {
                trace!("carbon shutdown failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
    };

    use super::*;

    fn metric(name: &str, value: f64, time: i64) -> MetricData {
        MetricData {
            id: String::new(),
            org_id: 1,
            name: name.to_string(),
            interval: 1,
            unit: "ms".to_string(),
            mtype: "gauge".to_string(),
            tags: Vec::new(),
            time,
            value,
        }
    }

    #[tokio::test]
    async fn writes_plaintext_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut received = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line);
            }
            received
        });

        let mut carbon = Carbon::new(Config { addr });
        carbon
            .flush(&[metric("a.b", 1.5, 10), metric("a.c", 2.0, 11)])
            .await
            .unwrap();
        carbon.flush(&[]).await.unwrap();
        carbon.flush(&[metric("a.b", 3.25, 12)]).await.unwrap();
        carbon.close().await;

        assert_eq!(
            reader.await.unwrap(),
            vec!["a.b 1.5 10", "a.c 2 11", "a.b 3.25 12"]
        );
    }

    #[tokio::test]
    async fn connection_failure_is_reported() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut carbon = Carbon::new(Config { addr });
        let err = carbon.flush(&[metric("a.b", 1.0, 1)]).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }
}
