use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use shuttle_config::{Config, OverridableConfig};

use crate::setup;

/// Runs the shuttle metrics pipeline.
#[derive(Debug, Parser)]
#[command(name = "shuttle", version, about)]
struct Cli {
    /// The path to the config folder.
    #[arg(short, long, value_name = "CONFIG", env = "SHUTTLE_CONFIG", default_value = ".shuttle")]
    config: PathBuf,

    /// The network interface the HTTP intake binds to.
    #[arg(long, env = "SHUTTLE_HOST")]
    host: Option<String>,

    /// The port the HTTP intake binds to.
    #[arg(short, long, env = "SHUTTLE_PORT")]
    port: Option<String>,

    /// The URL of the Datadog series endpoint.
    #[arg(long, env = "SHUTTLE_OUTLET_URL")]
    outlet_url: Option<String>,

    /// Hostname and port of the statsd server for internal metrics.
    #[arg(long, env = "SHUTTLE_STATSD")]
    statsd: Option<String>,
}

impl Cli {
    fn overrides(&self) -> OverridableConfig {
        OverridableConfig {
            host: self.host.clone(),
            port: self.port.clone(),
            outlet_url: self.outlet_url.clone(),
            statsd: self.statsd.clone(),
        }
    }
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_path(&cli.config)?;
    config.apply_override(cli.overrides())?;

    run(config)
}

fn run(config: Config) -> Result<()> {
    shuttle_log::init(config.logging());
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    shuttle_server::run(config)?;

    Ok(())
}
