use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::error::{HaxigonError, Result};
use crate::models::{DaemonConfig, InstanceInfo};
use crate::services::git;

use super::instance::Instance;
use super::registry::Registry;

const MAX_NAME_LEN: usize = 128;

static APP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Reject names that are empty, too long, or could leave the repo/bin roots.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN || !APP_NAME_RE.is_match(name) {
        return Err(HaxigonError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Fetches an application's code and swaps it into the registry.
pub struct Deployer {
    registry: Arc<Registry>,
    repo_root: PathBuf,
    bin_root: PathBuf,
    fetch_command: Vec<String>,
    /// Serializes deploys of the same name; different names run in parallel.
    /// An entry only lives while some deploy of that name holds or awaits it.
    name_locks: NameLocks,
}

type NameLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive right to deploy one name. Dropping it removes the map entry once
/// no other deploy of the same name is waiting.
struct NameLease<'a> {
    locks: &'a NameLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Release the guard's Arc under the map lock so no waiter can clone
        // the entry between the count check and the removal.
        self.guard.take();
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
        }
    }
}

impl Deployer {
    pub fn new(config: &DaemonConfig, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            repo_root: config.repo_root.clone(),
            bin_root: config.bin_root.clone(),
            fetch_command: config.fetch_command.clone(),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn working_directory(&self, name: &str) -> PathBuf {
        self.bin_root.join(name)
    }

    /// Replace whatever runs under `name` with a fresh fetch of its repository.
    ///
    /// 1. destroy and evict the current instance, if any
    /// 2. fetch `<repo_root>/<name>` into `<bin_root>/<name>`
    /// 3. reserve a port and launch `main`
    /// 4. register the new instance
    ///
    /// A failure at any step leaves no new directory, reservation or
    /// registry entry behind.
    pub async fn deploy(&self, name: &str) -> Result<InstanceInfo> {
        validate_name(name)?;

        let _lease = self.lease(name).await;

        if let Some(old) = self.registry.evict(name).await? {
            info!(app = name, port = old.port, "previous instance destroyed");
        }

        let source = self.repo_root.join(name);
        let working_directory = self.working_directory(name);
        clear_stale_directory(name, &working_directory).await?;

        info!(app = name, source = %source.display(), "fetching");
        if let Err(e) = git::fetch(&self.fetch_command, &source, &working_directory).await {
            remove_working_directory(&working_directory).await;
            return Err(e);
        }

        let port = match self.registry.reserve_port().await {
            Ok(port) => port,
            Err(e) => {
                remove_working_directory(&working_directory).await;
                return Err(e);
            }
        };

        let instance = match Instance::launch(name, &working_directory, port) {
            Ok(instance) => instance,
            Err(e) => {
                self.registry.release_port(port).await;
                remove_working_directory(&working_directory).await;
                return Err(e);
            }
        };

        self.registry.insert(instance).await
    }

    async fn lease(&self, name: &str) -> NameLease<'_> {
        let lock = {
            let mut locks = self.name_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(name.to_string()).or_default().clone()
        };
        let mut lease = NameLease {
            locks: &self.name_locks,
            name: name.to_string(),
            guard: None,
        };
        lease.guard = Some(lock.lock_owned().await);
        lease
    }

    #[cfg(test)]
    fn name_lock_count(&self) -> usize {
        self.name_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A directory left over from an earlier run would make the fetch fail.
async fn clear_stale_directory(name: &str, working_directory: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(working_directory).await.is_ok() {
        warn!(
            app = name,
            path = %working_directory.display(),
            "removing stale working directory"
        );
        tokio::fs::remove_dir_all(working_directory).await?;
    }
    Ok(())
}

async fn remove_working_directory(working_directory: &Path) {
    match tokio::fs::remove_dir_all(working_directory).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %working_directory.display(),
            error = %e,
            "failed to clean up working directory"
        ),
    }
}
