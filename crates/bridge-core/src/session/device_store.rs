//! Persistence for the paired device identity

use crate::error::{BridgeError, Result};
use crate::types::DeviceIdentity;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait DeviceStore: Send + Sync {
    fn load(&self) -> Result<Option<DeviceIdentity>>;
    fn save(&self, identity: &DeviceIdentity) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the identity as a JSON file
pub struct FileDeviceStore {
    path: PathBuf,
}

impl FileDeviceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for FileDeviceStore {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let identity = serde_json::from_str(&json).map_err(|e| {
            BridgeError::Validation(format!(
                "Failed to read device identity from {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(Some(identity))
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        let json = serde_json::to_string_pretty(identity)?;

        // Write to temp file then rename so a crash never leaves half a credential
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        log::debug!("Saved device identity to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("Removed device identity {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, used by tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryDeviceStore {
    identity: Mutex<Option<DeviceIdentity>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        let guard = self
            .identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        let mut guard = self
            .identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
        Ok(())
    }
}
