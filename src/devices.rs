//! Discovered and active Magic Home devices.
//!
//! The registry keeps two lists: `available`, replaced by every successful
//! discovery scan, and `active`, chosen by the operator and persisted. The
//! active list is not pruned when a device drops out of a scan.

use crate::persistence;
use crate::protocol::scanner::ScanError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_millis(2000);
/// Shortest period the discovery loop will tick at.
pub const MIN_DISCOVERY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub id: String,
    #[serde(default)]
    pub model: String,
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

/// A bounded-time network probe enumerating reachable devices.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, wait: Duration) -> Result<Vec<Device>, ScanError>;
}

#[derive(Debug, Default)]
struct DeviceSet {
    available: Vec<Device>,
    active: Vec<Device>,
}

pub struct DeviceRegistry {
    devices: RwLock<DeviceSet>,
    path: PathBuf,
    discovery: Arc<dyn Discovery>,
    scan_timeout: Duration,
}

fn dedup(devices: Vec<Device>) -> Vec<Device> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.address.clone()))
        .collect()
}

impl DeviceRegistry {
    pub fn new(
        path: impl Into<PathBuf>,
        discovery: Arc<dyn Discovery>,
        scan_timeout: Duration,
        active: Vec<Device>,
    ) -> Self {
        Self {
            devices: RwLock::new(DeviceSet {
                available: Vec::new(),
                active,
            }),
            path: path.into(),
            discovery,
            scan_timeout,
        }
    }

    /// Builds a registry seeded with the active list persisted at `path`.
    /// A missing snapshot starts empty; a corrupted one is logged and ignored.
    pub fn open(
        path: impl Into<PathBuf>,
        discovery: Arc<dyn Discovery>,
        scan_timeout: Duration,
    ) -> Self {
        let path = path.into();
        let active = if persistence::exists(&path) {
            match persistence::load::<Vec<Device>>(&path) {
                Ok(devices) => {
                    info!("Loaded {} active devices from {:?}", devices.len(), path);
                    devices
                }
                Err(e) => {
                    error!("Failed to load active devices from {:?}, starting empty: {}", path, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        Self::new(path, discovery, scan_timeout, active)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs one discovery scan. An empty or failed scan keeps the previous list.
    pub async fn refresh(&self) {
        match self.discovery.discover(self.scan_timeout).await {
            Ok(found) if found.is_empty() => {
                debug!("Discovery returned no devices, keeping the previous list");
            }
            Ok(found) => {
                let found = dedup(found);
                debug!("Discovery found {} devices", found.len());
                self.devices.write().available = found;
            }
            Err(e) => {
                warn!("Could not update devices: {}", e);
            }
        }
    }

    pub fn available(&self) -> Vec<Device> {
        self.devices.read().available.clone()
    }

    /// Broadcast targets: the active devices, or every available one when
    /// none were selected.
    pub fn active_list(&self) -> Vec<Device> {
        let devices = self.devices.read();
        if devices.active.is_empty() {
            devices.available.clone()
        } else {
            devices.active.clone()
        }
    }

    pub fn add(&self, address: &str) -> bool {
        let mut devices = self.devices.write();
        let Some(device) = devices
            .available
            .iter()
            .find(|d| d.address == address)
            .cloned()
        else {
            return false;
        };
        if !devices.active.contains(&device) {
            info!("Activating device {} ({})", device.address, device.id);
            devices.active.push(device);
        }
        self.persist(&devices.active);
        true
    }

    pub fn remove(&self, address: &str) -> bool {
        let mut devices = self.devices.write();
        if !devices.active.iter().any(|d| d.address == address) {
            return false;
        }
        info!("Deactivating device {}", address);
        devices.active.retain(|d| d.address != address);
        self.persist(&devices.active);
        true
    }

    fn persist(&self, active: &[Device]) {
        if let Err(e) = persistence::save(&self.path, active) {
            error!("Failed to persist active devices to {:?}: {}", self.path, e);
        }
    }

    /// Spawns the periodic discovery loop. The first scan runs immediately.
    /// A zero period is raised to [`MIN_DISCOVERY_INTERVAL`].
    pub fn start_discovery(self: &Arc<Self>, every: Duration) -> DiscoveryTask {
        let every = every.max(MIN_DISCOVERY_INTERVAL);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Starting device discovery every {:?}", every);
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.refresh().await,
                    _ = stop_rx.changed() => break,
                }
            }
            info!("Device discovery stopped");
        });
        DiscoveryTask {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to the background discovery loop.
///
/// Dropping the handle also ends the loop; keep it alive for as long as
/// discovery should run and call [`DiscoveryTask::stop`] to wait for it.
#[must_use = "discovery stops when the task handle is dropped"]
pub struct DiscoveryTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DiscoveryTask {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!("Discovery task ended abnormally: {}", e);
        }
    }
}
