use std::path::PathBuf;

use clap::Parser;

use hx_core::models::{DaemonConfig, FileConfig};
use hx_core::services::config_loader;

/// Redeploy applications from a repository root whenever their name arrives
/// on the control port.
#[derive(Parser, Debug)]
#[command(name = "haxigon")]
#[command(version)]
pub struct Cli {
    /// Address to listen on for deploy requests [default: localhost:34122]
    #[arg(long, visible_alias = "signal", value_name = "ADDR", env = "HAXIGON_LISTEN")]
    pub listen: Option<String>,

    /// Path to the repositories.
    #[arg(long, value_name = "DIR", env = "HAXIGON_REPO")]
    pub repo: Option<PathBuf>,

    /// Path to the bin dir [default: /tmp/haxigon]
    #[arg(long, value_name = "DIR", env = "HAXIGON_BIN")]
    pub bin: Option<PathBuf>,

    /// YAML configuration file. Flags take precedence over its values.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// First port handed to applications [default: 5000]
    #[arg(long, value_name = "PORT")]
    pub port_base: Option<u16>,

    /// Seconds an application gets to exit after SIGTERM [default: 5]
    #[arg(long, value_name = "SECS")]
    pub grace_period_secs: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> FileConfig {
        FileConfig {
            listen: self.listen.clone(),
            repo: self.repo.clone(),
            bin: self.bin.clone(),
            port_base: self.port_base,
            grace_period_secs: self.grace_period_secs,
            fetch_command: None,
        }
    }

    /// Layer the flags over the optional config file and resolve the result.
    pub fn resolve_config(&self) -> hx_core::Result<DaemonConfig> {
        let file = match &self.config {
            Some(path) => config_loader::load(path)?,
            None => FileConfig::default(),
        };
        config_loader::resolve(file.overridden_by(self.overrides()))
    }
}
