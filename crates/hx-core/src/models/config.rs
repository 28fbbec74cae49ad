use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "localhost:34122";
pub const DEFAULT_BIN_ROOT: &str = "/tmp/haxigon";
pub const DEFAULT_PORT_BASE: u16 = 5000;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Optional settings as read from a YAML file or the command line.
/// Every field may be absent; [`FileConfig::overridden_by`] layers them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub repo: Option<PathBuf>,
    #[serde(default)]
    pub bin: Option<PathBuf>,
    #[serde(default)]
    pub port_base: Option<u16>,
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
    #[serde(default)]
    pub fetch_command: Option<Vec<String>>,
}

impl FileConfig {
    /// Returns a config where every field set in `other` wins over `self`.
    pub fn overridden_by(self, other: FileConfig) -> FileConfig {
        FileConfig {
            listen: other.listen.or(self.listen),
            repo: other.repo.or(self.repo),
            bin: other.bin.or(self.bin),
            port_base: other.port_base.or(self.port_base),
            grace_period_secs: other.grace_period_secs.or(self.grace_period_secs),
            fetch_command: other.fetch_command.or(self.fetch_command),
        }
    }
}

/// Fully resolved daemon settings. Both roots are absolute.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub repo_root: PathBuf,
    pub bin_root: PathBuf,
    pub port_base: u16,
    pub grace_period: Duration,
    pub fetch_command: Vec<String>,
}

pub fn default_fetch_command() -> Vec<String> {
    vec!["git".to_string(), "clone".to_string()]
}
