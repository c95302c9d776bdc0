//! Outputs
//!
//! An output receives every batch the feed produces and ships it to an
//! ingestion backend. Each variant of [`Output`] speaks one protocol.
//!
//! ## Metrics
//!
//! Every output emits, labelled by `component_name`:
//!
//! `flush_duration_seconds`: Wall time of a whole flush
//! `publish_duration_seconds`: Wall time spent writing to the backend
//! `message_bytes`: Size of each encoded message
//! `published_metrics`: Metrics delivered
//! `published_messages`: Messages delivered
//! `publish_errors`: Flushes that failed to deliver
//!

use serde::{Deserialize, Serialize};

use crate::metric::MetricData;

pub mod carbon;
pub mod mdm;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Output`].
pub enum Error {
    /// See [`crate::out::carbon::Error`] for details.
    #[error(transparent)]
    Carbon(#[from] carbon::Error),
    /// See [`crate::out::mdm::Error`] for details.
    #[error(transparent)]
    Mdm(#[from] mdm::Error),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Output`]
pub enum Config {
    /// See [`crate::out::carbon::Config`] for details.
    Carbon(carbon::Config),
    /// See [`crate::out::mdm::Config`] for details.
    Mdm(mdm::Config),
}

impl Config {
    /// Check the configuration without connecting anywhere.
    ///
    /// # Errors
    ///
    /// Function will return an error if an mdm output's key cache window
    /// cannot be represented.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Carbon(_) => Ok(()),
            Self::Mdm(conf) => Ok(conf.validate()?),
        }
    }
}

#[derive(Debug)]
/// An output.
///
/// All outputs supported by fakemetrics are a variant of this enum. Please
/// see variant documentation for details.
pub enum Output {
    /// See [`crate::out::carbon::Carbon`] for details.
    Carbon(carbon::Carbon),
    /// See [`crate::out::mdm::Mdm`] for details.
    Mdm(mdm::Mdm),
}

impl Output {
    /// Create a new [`Output`]
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying output creation
    /// signals error.
    pub fn new(config: Config) -> Result<Self, Error> {
        let out = match config {
            Config::Carbon(conf) => Self::Carbon(carbon::Carbon::new(conf)),
            Config::Mdm(conf) => Self::Mdm(mdm::Mdm::new(&conf)?),
        };
        Ok(out)
    }

    /// A short name for logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Carbon(_) => "carbon",
            Self::Mdm(_) => "mdm",
        }
    }

    /// Ship one batch.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying output fails to encode
    /// or deliver the batch.
    pub async fn flush(&mut self, metrics: &[MetricData]) -> Result<(), Error> {
        match self {
            Self::Carbon(inner) => inner.flush(metrics).await?,
            Self::Mdm(inner) => inner.flush(metrics).await?,
        }
        Ok(())
    }

    /// Release the output's resources.
    pub async fn close(self) {
        match self {
            Self::Carbon(inner) => inner.close().await,
            Self::Mdm(inner) => inner.close().await,
        }
    }
}

/// Standard metric labels for the output named `name`.
pub(crate) fn labels(name: &str) -> Vec<(String, String)> {
    vec![
        ("component".to_string(), "output".to_string()),
        ("component_name".to_string(), name.to_string()),
    ]
}
