use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

mod common;
mod daemon;

#[derive(Debug, Subcommand)]
enum Command {
    Daemon(daemon::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "Iris")]
#[clap(bin_name = "iris")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    config: Option<PathBuf>,
}

#[derive(Deserialize, Default, Debug)]
pub struct LoggingConfig {
    max_level: Option<String>,

    #[serde(default)]
    include_pallas: bool,

    #[serde(default)]
    include_tower: bool,
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "default_serve")]
    pub serve: cardano_iris::serve::Config,

    /// UNIX socket of the local node.
    pub node_socket: Option<String>,

    /// Chain archive root; defaults to the node's cache dir for the
    /// configured network.
    pub archive_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_serve() -> cardano_iris::serve::Config {
    cardano_iris::serve::Config {
        listen_address: SocketAddr::from(([0, 0, 0, 0], 80)),
    }
}

impl Config {
    pub fn new(explicit_file: &Option<PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        // our base config will always be in /etc/cardano-iris
        s = s.add_source(config::File::with_name("/etc/cardano-iris/daemon.toml").required(false));

        // but we can override it by having a file in the working dir
        s = s.add_source(config::File::with_name("iris.toml").required(false));

        // if an explicit file was passed, then we load it as mandatory
        if let Some(explicit) = explicit_file.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        // finally, we use env vars to make some last-step overrides
        s = s.add_source(config::Environment::with_prefix("IRIS").separator("_"));

        s.build()?.try_deserialize()
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = Config::new(&args.config)
        .into_diagnostic()
        .context("parsing configuration")?;

    match args.command {
        Command::Daemon(x) => daemon::run(config, &x)?,
    };

    Ok(())
}
