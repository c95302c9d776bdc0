use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use fakemetrics::{
    config::{self, Config, Telemetry},
    out::{self, Output},
    run,
    traffic::{self, Traffic},
    unix_now,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Invalid traffic: {0}")]
    Traffic(#[from] traffic::Error),
    #[error("Invalid output configuration: {0}")]
    InvalidOutput(out::Error),
    #[error("Failed to create output: {0}")]
    Output(#[from] out::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

const DEFAULT_CONFIG_PATH: &str = "/etc/fakemetrics/fakemetrics.yaml";

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate traffic with the specified configuration
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

fn validate_config(config_path: &Path) -> Result<Config, Error> {
    let config = Config::from_path(config_path)?;
    // Builds the series templates too, cheap next to the run itself.
    Traffic::new(&config.traffic, unix_now())?;
    for output in &config.outputs {
        output.validate().map_err(Error::InvalidOutput)?;
    }
    info!("Configuration file is valid");
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus {
        addr,
        global_labels,
    }) = config.telemetry
    {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!("prometheus exporter listening on {addr}");
    }

    let traffic = Traffic::new(&config.traffic, unix_now())?;
    let outputs = config
        .outputs
        .into_iter()
        .map(Output::new)
        .collect::<Result<Vec<_>, _>>()?;

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("unable to listen for ctrl-c, running until done: {err}");
            std::future::pending::<()>().await;
        }
    };
    run(traffic, outputs, shutdown).await;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting fakemetrics {version}.");

    let cmd = match Cli::parse().command {
        Commands::Run(cmd) => cmd,
        Commands::ConfigCheck(cmd) => match validate_config(&cmd.config_path) {
            Ok(_) => std::process::exit(0),
            Err(err) => {
                error!("Configuration validation failed: {err}");
                std::process::exit(1)
            }
        },
    };

    let config = validate_config(&cmd.config_path)?;
    let max_shutdown_delay = Duration::from_secs(cmd.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    info!(
        "Shutting down runtime with a {} second delay.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
