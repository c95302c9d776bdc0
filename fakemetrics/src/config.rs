//! Configuration parsing. A run is described by a single YAML document:
//! optional telemetry, the traffic and the outputs the traffic is written to.

use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{out, traffic};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The configuration names no outputs.
    #[error("At least one output must be configured")]
    NoOutputs,
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The method by which to express telemetry
    pub telemetry: Option<Telemetry>,
    /// The shape of the generated traffic
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub traffic: traffic::Config,
    /// Where the traffic is sent
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub outputs: Vec<out::Config>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
/// Defines the manner of fakemetrics' own telemetry.
pub enum Telemetry {
    /// Internal telemetry is exposed for scraping at a prometheus poll
    /// endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Config {
    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file cannot be read or does not
    /// hold a valid configuration.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        contents.parse()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_yaml::from_str(contents)?;
        if config.outputs.is_empty() {
            return Err(Error::NoOutputs);
        }
        Ok(config)
    }
}
