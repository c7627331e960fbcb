//! `procvisor` daemon: supervises the jobs of a file (or the built-in demo) source.
//!
//! The same binary is re-executed for the configuration process and for every
//! worker, so the arguments are parsed identically in all roles.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use procvisor::{
    ClusterConfigurationProvider, ConfigurationSource, EnvironmentClusterConfigurationProvider,
    FileClusterConfigurationProvider, FileConfigurationSource, Launcher, MockConfigurationSource, MockWorker,
    RuntimeError, ShardingConfigurationSource, SourceError, SupervisorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "procvisor", version, about = "Keeps a fleet of worker processes running")]
struct Args {
    /// JSON file mapping job ids to job configurations.
    #[arg(long, value_name = "PATH", required_unless_present = "mock", conflicts_with = "mock")]
    config_file: Option<PathBuf>,

    /// Run the built-in demo fleet instead of reading a file.
    #[arg(long)]
    mock: bool,

    /// Only run the jobs of this instance, as read from a cluster file.
    #[arg(long, value_name = "PATH", conflicts_with = "cluster_env")]
    cluster_file: Option<PathBuf>,

    /// Only run the jobs of this instance, as read from PROCVISOR_NUMBER_OF_INSTANCES / PROCVISOR_INSTANCE_NUMBER.
    #[arg(long)]
    cluster_env: bool,

    /// Upper bound of the supervisor loop sleep, in seconds.
    #[arg(long, value_name = "SECS")]
    tick: Option<u64>,

    /// Seconds between configuration polls (0 polls continuously).
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Directory for the config and control sockets.
    #[arg(long, value_name = "DIR")]
    socket_dir: Option<PathBuf>,
}

impl Args {
    fn supervisor_config(&self) -> Result<SupervisorConfig, RuntimeError> {
        let mut cfg = SupervisorConfig::from_env()?;
        if let Some(secs) = self.tick {
            cfg.tick = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_interval {
            cfg.config_poll_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.socket_dir {
            cfg.socket_dirs = vec![dir.clone()];
        }
        Ok(cfg)
    }

    fn source(&self) -> Result<Box<dyn ConfigurationSource>, SourceError> {
        let base: Box<dyn ConfigurationSource> = match &self.config_file {
            Some(path) => Box::new(FileConfigurationSource::new(path)),
            None => Box::new(MockConfigurationSource::demo()),
        };

        let cluster = match (&self.cluster_file, self.cluster_env) {
            (Some(path), _) => FileClusterConfigurationProvider::new(path).load_cluster_configuration()?,
            (None, true) => EnvironmentClusterConfigurationProvider::default().load_cluster_configuration()?,
            (None, false) => return Ok(base),
        };
        info!(%cluster, "sharding configuration");
        Ok(Box::new(ShardingConfigurationSource::new(base, cluster)))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "procvisor=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let prepared = args
        .supervisor_config()
        .and_then(|cfg| Ok((cfg, args.source()?)));
    let (cfg, source) = match prepared {
        Ok(parts) => parts,
        Err(e) => {
            error!(label = e.as_label(), error = %e, "invalid startup configuration");
            return e.exit_code().into();
        }
    };

    Launcher::new(cfg)
        .with_worker("mock", MockWorker::factory)
        .with_source(source)
        .run()
        .await
        .into()
}
