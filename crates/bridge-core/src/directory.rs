//! Recipient directory and workflow configuration
//!
//! The router and broadcast engine only see the two traits. `JsonDirectory`
//! is the bundled implementation: one JSON document holding recipients and the
//! active workflow setting, rewritten atomically on every change.

use crate::error::{BridgeError, Result};
use crate::session::address::normalize_address;
use async_trait::async_trait;
use bridge_types::{CreateRecipientRequest, Recipient, UpdateRecipientRequest, WorkflowVariant};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Look up a recipient by address; formatting differences are ignored
    async fn find_by_address(&self, address: &str) -> Result<Option<Recipient>>;

    /// Every recipient currently flagged eligible
    async fn list_eligible(&self) -> Result<Vec<Recipient>>;
}

#[async_trait]
pub trait WorkflowConfigSource: Send + Sync {
    /// The single engine variant inbound chats go to
    async fn active_variant(&self) -> Result<WorkflowVariant>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub workflow_type: WorkflowVariant,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DirectoryData {
    #[serde(default)]
    recipients: Vec<Recipient>,
    #[serde(default)]
    workflow: Option<WorkflowSettings>,
}

pub struct JsonDirectory {
    path: Option<PathBuf>,
    data: RwLock<DirectoryData>,
}

impl JsonDirectory {
    /// Open a directory file, starting empty if it does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).map_err(|e| {
                BridgeError::Directory(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            log::info!("Directory file {} not found, starting empty", path.display());
            DirectoryData::default()
        };

        log::info!(
            "Loaded {} recipient(s) from {}",
            data.recipients.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A directory that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(DirectoryData::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DirectoryData> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DirectoryData> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &DirectoryData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(data)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Apply a change to a copy, persist it, then publish it
    fn update<T>(&self, change: impl FnOnce(&mut DirectoryData) -> Result<T>) -> Result<T> {
        let mut guard = self.write();
        let mut next = guard.clone();
        let value = change(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(value)
    }

    pub fn create_recipient(&self, request: CreateRecipientRequest) -> Result<Recipient> {
        if request.name.trim().is_empty() {
            return Err(BridgeError::Validation("Name is required".to_string()));
        }

        let address = normalize_address(&request.address)?;

        let recipient = self.update(|data| {
            if data
                .recipients
                .iter()
                .any(|r| matches_address(r, &address))
            {
                return Err(BridgeError::Validation(format!(
                    "Recipient with address {} already exists",
                    address
                )));
            }

            let now = Utc::now();
            let recipient = Recipient {
                id: Uuid::new_v4(),
                name: request.name.trim().to_string(),
                address: address.clone(),
                email: request.email.trim().to_string(),
                is_eligible: true,
                created_at: now,
                updated_at: now,
            };
            data.recipients.push(recipient.clone());
            Ok(recipient)
        })?;

        log::info!("Created recipient {} ({})", recipient.id, recipient.address);
        Ok(recipient)
    }

    pub fn get_recipient(&self, id: Uuid) -> Result<Recipient> {
        self.read()
            .recipients
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("recipient {}", id)))
    }

    pub fn list_recipients(&self) -> Vec<Recipient> {
        self.read().recipients.clone()
    }

    pub fn update_recipient(&self, id: Uuid, request: UpdateRecipientRequest) -> Result<Recipient> {
        self.update(|data| {
            let recipient = data
                .recipients
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| BridgeError::NotFound(format!("recipient {}", id)))?;

            if let Some(name) = request.name {
                if name.trim().is_empty() {
                    return Err(BridgeError::Validation("Name is required".to_string()));
                }
                recipient.name = name.trim().to_string();
            }
            if let Some(email) = request.email {
                recipient.email = email.trim().to_string();
            }
            if let Some(is_eligible) = request.is_eligible {
                recipient.is_eligible = is_eligible;
            }
            recipient.updated_at = Utc::now();

            Ok(recipient.clone())
        })
    }

    pub fn delete_recipient(&self, id: Uuid) -> Result<()> {
        self.update(|data| {
            let before = data.recipients.len();
            data.recipients.retain(|r| r.id != id);
            if data.recipients.len() == before {
                return Err(BridgeError::NotFound(format!("recipient {}", id)));
            }
            Ok(())
        })?;

        log::info!("Deleted recipient {}", id);
        Ok(())
    }

    /// Switch inbound routing to `variant`. Takes effect for the next message.
    pub fn set_active_variant(&self, variant: WorkflowVariant) -> Result<()> {
        self.update(|data| {
            data.workflow = Some(WorkflowSettings {
                workflow_type: variant,
                is_active: true,
            });
            Ok(())
        })?;

        log::info!("Active workflow set to {}", variant);
        Ok(())
    }
}

fn matches_address(recipient: &Recipient, normalized: &str) -> bool {
    normalize_address(&recipient.address)
        .map(|address| address == normalized)
        .unwrap_or(false)
}

#[async_trait]
impl RecipientDirectory for JsonDirectory {
    async fn find_by_address(&self, address: &str) -> Result<Option<Recipient>> {
        let Ok(normalized) = normalize_address(address) else {
            return Ok(None);
        };

        Ok(self
            .read()
            .recipients
            .iter()
            .find(|r| matches_address(r, &normalized))
            .cloned())
    }

    async fn list_eligible(&self) -> Result<Vec<Recipient>> {
        Ok(self
            .read()
            .recipients
            .iter()
            .filter(|r| r.is_eligible)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowConfigSource for JsonDirectory {
    async fn active_variant(&self) -> Result<WorkflowVariant> {
        match &self.read().workflow {
            Some(settings) if settings.is_active => Ok(settings.workflow_type),
            _ => Err(BridgeError::Directory(
                "no active workflow configuration found".to_string(),
            )),
        }
    }
}
