//! Checkpoint of provisioning progress
//!
//! Manages the checkpoint file (`.labforge/checkpoint.json` by default) which
//! records the identifier produced by every completed stage. The file is
//! rewritten atomically after every successful stage.

use crate::error::{CloudError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const BACKUP_SUFFIX: &str = "backup";
const TMP_SUFFIX: &str = "tmp";
const LOCK_SUFFIX: &str = "lock";

/// How a checkpoint field is stored at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Plain,
    /// Base64-encoded on disk. This is obfuscation, not encryption.
    Obfuscated,
}

/// Every checkpoint field, in stage order, with its storage treatment
pub const FIELDS: &[(&str, Sensitivity)] = &[
    ("region", Sensitivity::Plain),
    ("zone", Sensitivity::Plain),
    ("owner_account", Sensitivity::Obfuscated),
    ("project_id", Sensitivity::Plain),
    ("vpc_id", Sensitivity::Plain),
    ("subnet_id", Sensitivity::Plain),
    ("security_group_id", Sensitivity::Plain),
    ("bucket_name", Sensitivity::Plain),
    ("cluster_id", Sensitivity::Plain),
    ("instance_id", Sensitivity::Plain),
    ("instance_ip", Sensitivity::Plain),
    ("instance_password", Sensitivity::Obfuscated),
];

/// Identifiers produced by completed stages
///
/// A field is populated iff its stage has succeeded at least once. Fields are
/// overwritten by later successful runs but never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningState {
    /// Checkpoint file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_password: Option<String>,

    /// When the node was last finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Default for ProvisioningState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            region: None,
            zone: None,
            owner_account: None,
            project_id: None,
            vpc_id: None,
            subnet_id: None,
            security_group_id: None,
            bucket_name: None,
            cluster_id: None,
            instance_id: None,
            instance_ip: None,
            instance_password: None,
            finalized_at: None,
        }
    }
}

impl ProvisioningState {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(&self, name: &str) -> Option<&Option<String>> {
        Some(match name {
            "region" => &self.region,
            "zone" => &self.zone,
            "owner_account" => &self.owner_account,
            "project_id" => &self.project_id,
            "vpc_id" => &self.vpc_id,
            "subnet_id" => &self.subnet_id,
            "security_group_id" => &self.security_group_id,
            "bucket_name" => &self.bucket_name,
            "cluster_id" => &self.cluster_id,
            "instance_id" => &self.instance_id,
            "instance_ip" => &self.instance_ip,
            "instance_password" => &self.instance_password,
            _ => return None,
        })
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        Some(match name {
            "region" => &mut self.region,
            "zone" => &mut self.zone,
            "owner_account" => &mut self.owner_account,
            "project_id" => &mut self.project_id,
            "vpc_id" => &mut self.vpc_id,
            "subnet_id" => &mut self.subnet_id,
            "security_group_id" => &mut self.security_group_id,
            "bucket_name" => &mut self.bucket_name,
            "cluster_id" => &mut self.cluster_id,
            "instance_id" => &mut self.instance_id,
            "instance_ip" => &mut self.instance_ip,
            "instance_password" => &mut self.instance_password,
            _ => return None,
        })
    }

    /// Read a field by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(|v| v.as_deref())
    }

    /// Record a field by name. Unknown names are ignored.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        if let Some(slot) = self.field_mut(name) {
            *slot = Some(value.into());
            self.updated_at = Utc::now();
        }
    }

    /// `(name, sensitivity, value)` for every field, in stage order
    pub fn entries(&self) -> Vec<(&'static str, Sensitivity, Option<&str>)> {
        FIELDS
            .iter()
            .map(|(name, sensitivity)| (*name, *sensitivity, self.get(name)))
            .collect()
    }

    /// Number of populated fields
    pub fn populated(&self) -> usize {
        FIELDS.iter().filter(|(name, _)| self.get(name).is_some()).count()
    }

    fn encoded(&self) -> Self {
        let mut encoded = self.clone();
        for (name, sensitivity) in FIELDS {
            if *sensitivity == Sensitivity::Obfuscated
                && let Some(Some(value)) = encoded.field_mut(name)
            {
                *value = STANDARD.encode(value.as_bytes());
            }
        }
        encoded
    }

    fn decoded(mut self) -> Result<Self> {
        for (name, sensitivity) in FIELDS {
            if *sensitivity == Sensitivity::Obfuscated
                && let Some(Some(value)) = self.field_mut(name)
            {
                let bytes = STANDARD.decode(value.as_bytes()).map_err(|e| {
                    CloudError::CheckpointLoad(format!("field `{}` is not valid base64: {}", name, e))
                })?;
                *value = String::from_utf8(bytes).map_err(|e| {
                    CloudError::CheckpointLoad(format!("field `{}` is not valid UTF-8: {}", name, e))
                })?;
            }
        }
        Ok(self)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Durable checkpoint bound to one file
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: ProvisioningState,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`; a missing file yields an empty state.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !fs::try_exists(&path)
            .await
            .map_err(|e| CloudError::CheckpointLoad(format!("{}: {}", path.display(), e)))?
        {
            tracing::debug!("Checkpoint not found at {}, starting empty", path.display());
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| CloudError::CheckpointLoad(format!("{}: {}", path.display(), e)))?;
        let stored: ProvisioningState = serde_json::from_str(&content)
            .map_err(|e| CloudError::CheckpointLoad(format!("{}: {}", path.display(), e)))?;

        if stored.version > STATE_VERSION {
            return Err(CloudError::CheckpointLoad(format!(
                "checkpoint version {} is newer than supported version {}",
                stored.version, STATE_VERSION
            )));
        }

        let state = stored.decoded()?;
        tracing::debug!("Loaded checkpoint with {} populated fields", state.populated());
        Ok(Self { path, state })
    }

    /// A store with no recorded progress that will save to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: ProvisioningState::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProvisioningState {
        &mut self.state
    }

    /// Atomically rewrite the checkpoint file.
    ///
    /// The new content goes to a temporary sibling which is then renamed over
    /// the old file, so a failed save leaves the previous copy intact.
    pub async fn save(&self) -> Result<()> {
        self.write().await.map_err(|e| {
            CloudError::CheckpointSave(format!("{}: {}", self.path.display(), e))
        })?;
        tracing::debug!(
            "Saved checkpoint with {} populated fields",
            self.state.populated()
        );
        Ok(())
    }

    async fn write(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }

        let content = serde_json::to_string_pretty(&self.state.encoded())?;
        let tmp = sibling(&self.path, TMP_SUFFIX);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if fs::try_exists(&self.path).await? {
            fs::copy(&self.path, sibling(&self.path, BACKUP_SUFFIX)).await?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Acquire the advisory single-writer lock for this checkpoint
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        let lock_path = sibling(&self.path, LOCK_SUFFIX);
        if let Some(dir) = lock_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }

        // Check for existing lock
        if fs::try_exists(&lock_path).await? {
            let content = fs::read_to_string(&lock_path).await?;
            match serde_json::from_str::<LockInfo>(&content) {
                Ok(lock_info) => {
                    // Check if lock is stale (older than 1 hour)
                    let age = Utc::now().signed_duration_since(lock_info.acquired_at);
                    if age.num_hours() < 1 {
                        return Err(CloudError::LockError(format!(
                            "Checkpoint is locked by {} (pid {}) since {}",
                            lock_info.holder, lock_info.pid, lock_info.acquired_at
                        )));
                    }
                    tracing::warn!("Removing stale lock from {}", lock_info.holder);
                }
                Err(e) => tracing::warn!("Replacing unreadable lock file: {}", e),
            }
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired checkpoint lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the checkpoint lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if fs::try_exists(&self.lock_path).await? {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released checkpoint lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
