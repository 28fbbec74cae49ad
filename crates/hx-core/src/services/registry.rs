use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{HaxigonError, Result};
use crate::models::InstanceInfo;

use super::instance::Instance;
use super::ports::PortAllocator;

/// The set of running instances, keyed by application name.
///
/// Every read-modify-write runs under one async mutex, which is also held
/// across the destroy of an evicted instance. Once [`Registry::drain_all`] has
/// started, every mutating operation fails with [`HaxigonError::ShuttingDown`].
pub struct Registry {
    state: Mutex<RegistryState>,
    allocator: PortAllocator,
    grace_period: Duration,
}

#[derive(Default)]
struct RegistryState {
    instances: HashMap<String, Instance>,
    /// Ports handed to deploys that have not inserted their instance yet.
    reserved: HashSet<u16>,
    draining: bool,
}

impl RegistryState {
    fn held_ports(&self) -> HashSet<u16> {
        self.instances
            .values()
            .map(Instance::port)
            .chain(self.reserved.iter().copied())
            .collect()
    }
}

impl Registry {
    pub fn new(allocator: PortAllocator, grace_period: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            allocator,
            grace_period,
        }
    }

    /// Snapshot of all registered instances, sorted by name.
    pub async fn snapshot(&self) -> Vec<InstanceInfo> {
        let state = self.state.lock().await;
        let mut infos: Vec<InstanceInfo> =
            state.instances.values().map(Instance::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn get(&self, name: &str) -> Option<InstanceInfo> {
        let state = self.state.lock().await;
        state.instances.get(name).map(Instance::info)
    }

    pub async fn is_draining(&self) -> bool {
        self.state.lock().await.draining
    }

    /// Destroy the instance registered under `name`, if any, and remove it.
    ///
    /// The entry is only removed once destroy succeeded; on failure it stays
    /// in whatever state destroy left it.
    pub async fn evict(&self, name: &str) -> Result<Option<InstanceInfo>> {
        let mut state = self.state.lock().await;
        if state.draining {
            return Err(HaxigonError::ShuttingDown);
        }
        let Some(instance) = state.instances.get_mut(name) else {
            return Ok(None);
        };
        instance.destroy(self.grace_period).await?;
        let info = instance.info();
        state.instances.remove(name);
        Ok(Some(info))
    }

    /// Pick the lowest free port and hold it until [`Registry::insert`] or
    /// [`Registry::release_port`].
    pub async fn reserve_port(&self) -> Result<u16> {
        let mut state = self.state.lock().await;
        if state.draining {
            return Err(HaxigonError::ShuttingDown);
        }
        let port = self.allocator.allocate(&state.held_ports())?;
        state.reserved.insert(port);
        debug!(port, base = self.allocator.base(), "port reserved");
        Ok(port)
    }

    pub async fn release_port(&self, port: u16) {
        let mut state = self.state.lock().await;
        state.reserved.remove(&port);
        debug!(port, "port released");
    }

    /// Register a freshly launched instance, consuming its port reservation.
    ///
    /// While draining, the instance is destroyed instead of registered. The
    /// name must have been evicted first: an occupied name is refused and the
    /// new instance is dropped without touching the shared working directory.
    pub async fn insert(&self, mut instance: Instance) -> Result<InstanceInfo> {
        let mut state = self.state.lock().await;
        state.reserved.remove(&instance.port());

        if state.draining {
            warn!(app = %instance.name(), "shutdown in progress, discarding new instance");
            if let Err(e) = instance.destroy(self.grace_period).await {
                error!(app = %instance.name(), error = %e, "failed to destroy discarded instance");
            }
            return Err(HaxigonError::ShuttingDown);
        }

        if state.instances.contains_key(instance.name()) {
            error!(app = %instance.name(), "refusing to register over a running instance");
            return Err(HaxigonError::AlreadyRegistered(instance.name().to_string()));
        }

        let info = instance.info();
        state.instances.insert(info.name.clone(), instance);
        Ok(info)
    }

    /// Enter draining mode and destroy every instance.
    ///
    /// A failure on one instance is logged and returned; the rest are still
    /// destroyed.
    pub async fn drain_all(&self) -> Vec<(String, HaxigonError)> {
        let mut state = self.state.lock().await;
        state.draining = true;

        let instances: Vec<(String, Instance)> = state.instances.drain().collect();
        info!(count = instances.len(), "draining registry");

        let mut failures = Vec::new();
        for (name, mut instance) in instances {
            info!(app = %name, "destroying");
            if let Err(e) = instance.destroy(self.grace_period).await {
                error!(app = %name, error = %e, "failed to destroy application");
                failures.push((name, e));
            }
        }
        failures
    }
}
