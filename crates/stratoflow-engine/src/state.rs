//! Observed state and state stores
//!
//! [`ObservedState`] is the only mutable, persisted entity: the last-known
//! remote reality of one resource. Stores are keyed by [`ResourceAddress`];
//! the remote ID lives inside the state.
//!
//! [`FileStateStore`] manages `<state_dir>/state.json`, keeping a backup of
//! the previous file on every save.

use crate::error::{EngineError, Result};
use crate::value::Attributes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TEMP: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// `type.name` address of a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAddress {
    pub resource_type: String,
    pub name: String,
}

impl ResourceAddress {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((t, n)) if !t.is_empty() && !n.is_empty() => Ok(Self::new(t, n)),
            _ => Err(EngineError::InvalidConfig(format!(
                "invalid resource address '{}' (expected type.name)",
                s
            ))),
        }
    }
}

/// Where a resource is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Absent,
    Creating,
    Stable,
    Reconciling,
    Replacing,
    Deleting,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Absent => write!(f, "absent"),
            Lifecycle::Creating => write!(f, "creating"),
            Lifecycle::Stable => write!(f, "stable"),
            Lifecycle::Reconciling => write!(f, "reconciling"),
            Lifecycle::Replacing => write!(f, "replacing"),
            Lifecycle::Deleting => write!(f, "deleting"),
        }
    }
}

/// Last-known remote reality of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Remote resource ID
    pub id: String,

    pub resource_type: String,

    pub lifecycle: Lifecycle,

    pub attributes: Attributes,

    /// Who manages this resource (project name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ObservedState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            lifecycle: Lifecycle::Stable,
            attributes,
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Replace attributes with a fresh read, keeping identity and creation time
    pub fn refreshed(&self, attributes: Attributes, lifecycle: Lifecycle) -> Self {
        Self {
            attributes,
            lifecycle,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Keyed persistence for observed state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, address: &ResourceAddress) -> Result<Option<ObservedState>>;

    async fn save(&self, address: &ResourceAddress, state: &ObservedState) -> Result<()>;

    /// Deleting an unknown address is not an error
    async fn delete(&self, address: &ResourceAddress) -> Result<()>;

    /// All stored states, ordered by address
    async fn list(&self) -> Result<Vec<(ResourceAddress, ObservedState)>>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<ResourceAddress, ObservedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, address: &ResourceAddress) -> Result<Option<ObservedState>> {
        Ok(self.states.read().await.get(address).cloned())
    }

    async fn save(&self, address: &ResourceAddress, state: &ObservedState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(address.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, address: &ResourceAddress) -> Result<()> {
        self.states.write().await.remove(address);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(ResourceAddress, ObservedState)>> {
        let mut all: Vec<_> = self
            .states
            .read()
            .await
            .iter()
            .map(|(a, s)| (a.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

/// On-disk state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by `type.name`
    pub resources: BTreeMap<String, ObservedState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

/// JSON file store under a state directory
#[derive(Debug)]
pub struct FileStateStore {
    state_dir: PathBuf,
    // serializes read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl FileStateStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir.join(STATE_TEMP)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Read the whole state file
    pub async fn read_file(&self) -> Result<StateFile> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(StateFile::default());
        }

        let content = fs::read_to_string(&path).await?;
        let state: StateFile = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(EngineError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        Ok(state)
    }

    async fn write_file(&self, state: &mut StateFile) -> Result<()> {
        self.ensure_state_dir().await?;
        state.updated_at = Utc::now();

        let path = self.state_path();
        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }

        let temp = self.temp_path();
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;
        fs::rename(&temp, &path).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, address: &ResourceAddress) -> Result<Option<ObservedState>> {
        let _guard = self.guard.lock().await;
        let file = self.read_file().await?;
        Ok(file.resources.get(&address.to_string()).cloned())
    }

    async fn save(&self, address: &ResourceAddress, state: &ObservedState) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut file = self.read_file().await?;
        file.resources.insert(address.to_string(), state.clone());
        self.write_file(&mut file).await
    }

    async fn delete(&self, address: &ResourceAddress) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut file = self.read_file().await?;
        if file.resources.remove(&address.to_string()).is_some() {
            self.write_file(&mut file).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(ResourceAddress, ObservedState)>> {
        let _guard = self.guard.lock().await;
        let file = self.read_file().await?;
        file.resources
            .into_iter()
            .map(|(key, state)| Ok((key.parse()?, state)))
            .collect()
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the project state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Acquire the lock in `state_dir`, replacing a lock older than one hour
    ///
    /// The lock file is created with `create_new`, so two processes racing
    /// for a free lock cannot both win.
    pub async fn acquire(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        if !state_dir.exists() {
            fs::create_dir_all(state_dir).await?;
        }

        let lock_path = state_dir.join(LOCK_FILE);
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        // second attempt only after a stale lock was removed
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired state lock");
                    return Ok(Self {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::clear_if_stale(&lock_path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::LockError(
            "State lock was taken by another process".to_string(),
        ))
    }

    /// Remove an existing lock older than one hour, or report who holds it
    async fn clear_if_stale(lock_path: &Path) -> Result<()> {
        let content = match fs::read_to_string(lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // an unparsable lock is one whose holder is still writing it
        let Ok(lock_info) = serde_json::from_str::<LockInfo>(&content) else {
            return Err(EngineError::LockError(
                "State is locked by another process".to_string(),
            ));
        };

        let age = Utc::now().signed_duration_since(lock_info.acquired_at);
        if age.num_hours() < 1 {
            return Err(EngineError::LockError(format!(
                "State is locked by {} since {}",
                lock_info.holder, lock_info.acquired_at
            )));
        }

        tracing::warn!("Removing stale lock from {}", lock_info.holder);
        match fs::remove_file(lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
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
