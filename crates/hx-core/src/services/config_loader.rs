use std::path::Path;
use std::time::Duration;

use crate::error::{HaxigonError, Result};
use crate::models::config::{
    default_fetch_command, DEFAULT_BIN_ROOT, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_LISTEN,
    DEFAULT_PORT_BASE,
};
use crate::models::{DaemonConfig, FileConfig};

pub fn load(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Err(HaxigonError::Config(format!(
            "config file not found at {}",
            config_path.display()
        )));
    }
    let contents = std::fs::read_to_string(config_path)?;
    let config: FileConfig = serde_yaml::from_str(&contents)
        .map_err(|e| HaxigonError::Config(format!("{}: {e}", config_path.display())))?;
    Ok(config)
}

/// Apply defaults and turn both roots into usable absolute paths.
///
/// The binaries root is created if missing; the repository root must already
/// be a directory.
pub fn resolve(config: FileConfig) -> Result<DaemonConfig> {
    let listen = config.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    if listen.trim().is_empty() {
        return Err(HaxigonError::Config("listen address is empty".into()));
    }

    let repo = config
        .repo
        .ok_or_else(|| HaxigonError::Config("repository root is required".into()))?;
    let repo_root = std::path::absolute(&repo).map_err(|e| {
        HaxigonError::Config(format!("could not absolutify \"{}\": {e}", repo.display()))
    })?;
    if !repo_root.is_dir() {
        return Err(HaxigonError::Config(format!(
            "repository root {} is not a directory",
            repo_root.display()
        )));
    }

    let bin = config.bin.unwrap_or_else(|| DEFAULT_BIN_ROOT.into());
    let bin_root = std::path::absolute(&bin).map_err(|e| {
        HaxigonError::Config(format!("could not absolutify \"{}\": {e}", bin.display()))
    })?;
    std::fs::create_dir_all(&bin_root).map_err(|e| {
        HaxigonError::Config(format!(
            "could not create bin dir {}: {e}",
            bin_root.display()
        ))
    })?;

    let port_base = config.port_base.unwrap_or(DEFAULT_PORT_BASE);
    if port_base == 0 || port_base == u16::MAX {
        return Err(HaxigonError::Config(format!(
            "port_base {port_base} is outside 1..65535"
        )));
    }

    let fetch_command = config.fetch_command.unwrap_or_else(default_fetch_command);
    match fetch_command.first() {
        Some(program) if !program.is_empty() => {}
        _ => return Err(HaxigonError::Config("fetch_command is empty".into())),
    }

    Ok(DaemonConfig {
        listen,
        repo_root,
        bin_root,
        port_base,
        grace_period: Duration::from_secs(
            config.grace_period_secs.unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
        ),
        fetch_command,
    })
}
