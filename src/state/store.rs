//! TTL-Scoped State Store
//!
//! Two tiers:
//! - **Hot**: an in-memory map behind a mutex, held only while the map is
//!   read or mutated.
//! - **Warm**: one JSON file, rewritten atomically (temp file + rename)
//!   before every mutating call returns. File writes are serialized by a
//!   separate async lock and always write the latest snapshot.
//!
//! # File Format
//!
//! ```json
//! {"workflow:wf-1":{"data":{...},"timestamp":"2026-10-16T09:00:00Z","ttl":86400},
//!  "resource:file:f-7":{"data":{...},"timestamp":"...","ttl":604800}}
//! ```
//!
//! An entry is expired once `timestamp + ttl <= now`. Expired entries are
//! removed lazily on read and eagerly by [`StateStore::sweep`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Settings, DEFAULT_RESOURCE_TTL_SECS, DEFAULT_WORKFLOW_TTL_SECS};
use crate::workflow::{WorkflowState, WorkflowStatus};

const WORKFLOW_PREFIX: &str = "workflow:";
const RESOURCE_PREFIX: &str = "resource:";

/// Shortest period the background sweeper runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid resource type '{0}': must be non-empty and free of ':'")]
    InvalidResourceType(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct StoredEntry {
    data: Value,
    timestamp: DateTime<Utc>,
    ttl: u64,
}

impl StoredEntry {
    fn new(data: Value, ttl: u64) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
            ttl,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl == 0 {
            return true;
        }
        let ttl = i64::try_from(self.ttl).unwrap_or(i64::MAX);
        (now - self.timestamp).num_seconds() >= ttl
    }
}

/// A stored resource (file, contact, archived event...).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Snapshot of store occupancy.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub workflows: usize,
    pub resources: usize,
    /// Entries past their TTL that have not been swept yet
    pub expired: usize,
    /// Size of the serialized snapshot
    pub size_bytes: usize,
}

/// Durable, TTL-scoped key/value store for workflow state and resources.
///
/// Shared as `Arc<StateStore>`; every method takes `&self`.
pub struct StateStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    path: Option<PathBuf>,
    io_lock: tokio::sync::Mutex<()>,
    workflow_ttl: u64,
    resource_ttl: u64,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StateStore {
    fn with_parts(entries: HashMap<String, StoredEntry>, path: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(entries),
            path,
            io_lock: tokio::sync::Mutex::new(()),
            workflow_ttl: DEFAULT_WORKFLOW_TTL_SECS,
            resource_ttl: DEFAULT_RESOURCE_TTL_SECS,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// A store with no warm tier.
    pub fn in_memory() -> Self {
        Self::with_parts(HashMap::new(), None)
    }

    /// Opens the store described by `settings`, loading its state file.
    pub async fn open(settings: &Settings) -> Result<Self, StoreError> {
        let mut store = Self::open_path(settings.state_path()).await?;
        store.workflow_ttl = settings.workflow_ttl_secs;
        store.resource_ttl = settings.resource_ttl_secs;
        Ok(store)
    }

    /// Opens a store backed by `path`. A missing file starts empty; a
    /// corrupt file is logged and ignored.
    pub async fn open_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, StoredEntry>>(&bytes) {
                Ok(entries) => {
                    info!("Loaded {} entries from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!(
                        "Ignoring corrupt state file {}: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::with_parts(entries, Some(path)))
    }

    /// Overrides the TTLs used when callers pass `None`.
    pub fn with_default_ttls(mut self, workflow_ttl: u64, resource_ttl: u64) -> Self {
        self.workflow_ttl = workflow_ttl;
        self.resource_ttl = resource_ttl;
        self
    }

    /// Path of the warm-tier file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_workflow_ttl(&self) -> u64 {
        self.workflow_ttl
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _io = self.io_lock.lock().await;
        let snapshot = {
            let entries = self.lock_entries();
            serde_json::to_vec(&*entries)?
        };

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &snapshot).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Inserts an entry and persists.
    async fn put(&self, key: String, data: Value, ttl: u64) -> Result<DateTime<Utc>, StoreError> {
        let entry = StoredEntry::new(data, ttl);
        let timestamp = entry.timestamp;
        self.lock_entries().insert(key, entry);
        self.persist().await?;
        Ok(timestamp)
    }

    /// Reads a live entry; an expired one is removed and persisted away.
    async fn get_live(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let now = Utc::now();
        {
            let mut entries = self.lock_entries();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
            entries.remove(key);
        }

        debug!("Expired entry removed on read: {}", key);
        self.persist().await?;
        Ok(None)
    }

    // ========================================================================
    // Workflow state
    // ========================================================================

    /// Stores a workflow snapshot under `workflow:<id>`.
    pub async fn set_workflow_state(
        &self,
        state: &WorkflowState,
        ttl: Option<u64>,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_value(state)?;
        let ttl = ttl.unwrap_or(self.workflow_ttl);
        self.put(workflow_key(&state.workflow_id), data, ttl).await?;
        Ok(())
    }

    /// Latest snapshot of a workflow, or `None` if unknown or expired.
    pub async fn get_workflow_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        match self.get_live(&workflow_key(workflow_id)).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.data)?)),
            None => Ok(None),
        }
    }

    /// Live workflows, most recently updated first, optionally filtered by
    /// status.
    pub fn list_workflows(
        &self,
        limit: usize,
        status: Option<WorkflowStatus>,
    ) -> Vec<WorkflowState> {
        let now = Utc::now();
        let mut found: Vec<(DateTime<Utc>, WorkflowState)> = {
            let entries = self.lock_entries();
            entries
                .iter()
                .filter(|(key, entry)| key.starts_with(WORKFLOW_PREFIX) && !entry.is_expired(now))
                .filter_map(|(key, entry)| {
                    match serde_json::from_value::<WorkflowState>(entry.data.clone()) {
                        Ok(state) => Some((entry.timestamp, state)),
                        Err(e) => {
                            warn!("Skipping unreadable workflow entry {}: {}", key, e);
                            None
                        }
                    }
                })
                .collect()
        };

        found.sort_by(|a, b| b.0.cmp(&a.0));
        found
            .into_iter()
            .map(|(_, state)| state)
            .filter(|state| status.map_or(true, |s| state.status == s))
            .take(limit)
            .collect()
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Stores a resource under `resource:<type>:<id>`.
    ///
    /// The type must not contain `:`, so that listing one type never picks
    /// up another. Ids may contain anything.
    pub async fn store_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        metadata: Value,
        ttl: Option<u64>,
    ) -> Result<ResourceRecord, StoreError> {
        if resource_type.is_empty() || resource_type.contains(':') {
            return Err(StoreError::InvalidResourceType(resource_type.to_string()));
        }

        let ttl = ttl.unwrap_or(self.resource_ttl);
        let created_at = self
            .put(resource_key(resource_type, resource_id), metadata.clone(), ttl)
            .await?;

        debug!("Stored resource {}:{}", resource_type, resource_id);
        Ok(ResourceRecord {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            metadata,
            created_at,
            ttl_seconds: ttl,
        })
    }

    /// A single live resource.
    pub async fn get_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        let entry = self
            .get_live(&resource_key(resource_type, resource_id))
            .await?;
        Ok(entry.map(|entry| to_record(resource_type, resource_id, entry)))
    }

    /// All live resources of a type, oldest first.
    pub fn list_resources(&self, resource_type: &str) -> Vec<ResourceRecord> {
        let prefix = resource_key(resource_type, "");
        let now = Utc::now();

        let mut records: Vec<ResourceRecord> = {
            let entries = self.lock_entries();
            entries
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .filter_map(|(key, entry)| {
                    key.strip_prefix(&prefix)
                        .map(|id| to_record(resource_type, id, entry.clone()))
                })
                .collect()
        };

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        records
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Removes every expired entry. Returns how many were removed.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let now = Utc::now();

        let candidates: Vec<String> = {
            let entries = self.lock_entries();
            entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        if candidates.is_empty() {
            return Ok(0);
        }

        let removed = {
            let mut entries = self.lock_entries();
            let now = Utc::now();
            candidates
                .iter()
                .filter(|key| {
                    let expired = entries.get(key.as_str()).map_or(false, |e| e.is_expired(now));
                    expired && entries.remove(key.as_str()).is_some()
                })
                .count()
        };

        if removed > 0 {
            info!("Swept {} expired entries", removed);
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> StoreStats {
        let now = Utc::now();
        let entries = self.lock_entries();

        let mut stats = StoreStats {
            total_entries: entries.len(),
            size_bytes: serde_json::to_vec(&*entries).map(|v| v.len()).unwrap_or(0),
            ..StoreStats::default()
        };
        for (key, entry) in entries.iter() {
            if key.starts_with(WORKFLOW_PREFIX) {
                stats.workflows += 1;
            } else if key.starts_with(RESOURCE_PREFIX) {
                stats.resources += 1;
            }
            if entry.is_expired(now) {
                stats.expired += 1;
            }
        }
        stats
    }

    /// Writes the current snapshot to the warm tier.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.persist().await
    }

    /// Starts a background task that sweeps every `interval` until
    /// [`StateStore::close`] is called.
    ///
    /// Intervals shorter than 10 ms are raised to 10 ms.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Sweeper already running");
            return;
        }

        let store = Arc::clone(self);
        let token = self.shutdown.child_token();
        info!("Starting state sweeper (every {:?})", interval);

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.sweep().await {
                            error!("State sweep failed: {}", e);
                        }
                    }
                }
            }
            debug!("State sweeper stopped");
        }));
    }

    /// Stops the sweeper and writes a final snapshot.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.shutdown.cancel();

        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Sweeper task ended abnormally: {}", e);
            }
        }

        self.flush().await
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .field("entries", &self.lock_entries().len())
            .finish()
    }
}

fn workflow_key(workflow_id: &str) -> String {
    format!("{}{}", WORKFLOW_PREFIX, workflow_id)
}

fn resource_key(resource_type: &str, resource_id: &str) -> String {
    format!("{}{}:{}", RESOURCE_PREFIX, resource_type, resource_id)
}

fn to_record(resource_type: &str, resource_id: &str, entry: StoredEntry) -> ResourceRecord {
    ResourceRecord {
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        metadata: entry.data,
        created_at: entry.timestamp,
        ttl_seconds: entry.ttl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Plan, Step};
    use serde_json::json;

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new(id, Plan::from_steps("t", vec![Step::new("a", "echo")]), 60)
    }

    #[tokio::test]
    async fn test_workflow_round_trip() {
        let store = StateStore::in_memory();
        let mut wf = state("wf-1");
        wf.mark_completed("a", json!({"id": 1}));

        store.set_workflow_state(&wf, Some(60)).await.unwrap();
        let loaded = store.get_workflow_state("wf-1").await.unwrap().unwrap();

        assert_eq!(loaded, wf);
        assert!(store.get_workflow_state("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_on_read() {
        let store = StateStore::in_memory();
        store.set_workflow_state(&state("wf-0"), Some(0)).await.unwrap();
        assert_eq!(store.stats().total_entries, 1);

        assert!(store.get_workflow_state("wf-0").await.unwrap().is_none());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_removed_by_sweep() {
        let store = StateStore::in_memory();
        store.set_workflow_state(&state("gone"), Some(0)).await.unwrap();
        store.set_workflow_state(&state("kept"), Some(3_600)).await.unwrap();
        store
            .store_resource("file", "f-1", json!({}), Some(0))
            .await
            .unwrap();

        assert_eq!(store.stats().expired, 2);
        assert_eq!(store.sweep().await.unwrap(), 2);
        assert_eq!(store.sweep().await.unwrap(), 0);

        let stats = store.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.workflows, 1);
        assert!(store.get_workflow_state("kept").await.unwrap().is_some());
    }

    #[test]
    fn test_expiry_predicate() {
        let now = Utc::now();
        let entry = StoredEntry {
            data: Value::Null,
            timestamp: now - chrono::Duration::seconds(10),
            ttl: 10,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));

        let forever = StoredEntry { ttl: u64::MAX, ..entry };
        assert!(!forever.is_expired(now));
    }

    #[tokio::test]
    async fn test_resources_by_type() {
        let store = StateStore::in_memory();
        store
            .store_resource("file", "f-1", json!({"name": "a.pdf"}), None)
            .await
            .unwrap();
        store
            .store_resource("file", "f-2", json!({"name": "b.pdf"}), None)
            .await
            .unwrap();
        store
            .store_resource("contact", "c-1", json!({"email": "x@example.test"}), None)
            .await
            .unwrap();

        let files = store.list_resources("file");
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|r| r.resource_type == "file"));
        assert_eq!(files[0].ttl_seconds, DEFAULT_RESOURCE_TTL_SECS);

        let contact = store.get_resource("contact", "c-1").await.unwrap().unwrap();
        assert_eq!(contact.metadata["email"], json!("x@example.test"));
        assert!(store.list_resources("event").is_empty());
    }

    #[tokio::test]
    async fn test_resource_type_with_colon_is_rejected() {
        let store = StateStore::in_memory();
        store
            .store_resource("file", "f-1", json!({"name": "a.pdf"}), None)
            .await
            .unwrap();

        let err = store
            .store_resource("file:shared", "f-1", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidResourceType(ref t) if t == "file:shared"));
        assert!(matches!(
            store.store_resource("", "f-1", json!({}), None).await,
            Err(StoreError::InvalidResourceType(_))
        ));

        let files = store.list_resources("file");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].resource_id, "f-1");
        assert_eq!(store.stats().resources, 1);
    }

    #[tokio::test]
    async fn test_resource_id_may_contain_colon() {
        let store = StateStore::in_memory();
        store
            .store_resource("file", "shared:f-1", json!({"v": 1}), None)
            .await
            .unwrap();

        let files = store.list_resources("file");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].resource_id, "shared:f-1");
        assert!(store.get_resource("file", "shared:f-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resource_overwrite() {
        let store = StateStore::in_memory();
        store.store_resource("file", "f", json!({"v": 1}), None).await.unwrap();
        store.store_resource("file", "f", json!({"v": 2}), None).await.unwrap();

        let files = store.list_resources("file");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].metadata, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_warm_tier_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let store = StateStore::open_path(&path).await.unwrap();
            store.set_workflow_state(&state("wf-1"), None).await.unwrap();
            store
                .store_resource("file", "f-1", json!({"size": 3}), None)
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains('\n'));
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed.get("workflow:wf-1").is_some());
        assert_eq!(parsed["resource:file:f-1"]["ttl"], json!(DEFAULT_RESOURCE_TTL_SECS));
        assert!(parsed["resource:file:f-1"]["timestamp"].is_string());

        let reopened = StateStore::open_path(&path).await.unwrap();
        assert!(reopened.get_workflow_state("wf-1").await.unwrap().is_some());
        assert_eq!(reopened.list_resources("file").len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = StateStore::open_path(&path).await.unwrap();
        assert_eq!(store.stats().total_entries, 0);

        store.set_workflow_state(&state("wf"), None).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<Value>(&raw).is_ok());
    }

    #[tokio::test]
    async fn test_open_applies_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            workflow_ttl_secs: 5,
            resource_ttl_secs: 7,
            ..Settings::with_data_dir(dir.path())
        };

        let store = StateStore::open(&settings).await.unwrap();
        assert_eq!(store.path(), Some(settings.state_path().as_path()));
        assert_eq!(store.default_workflow_ttl(), 5);

        let record = store.store_resource("file", "f", json!({}), None).await.unwrap();
        assert_eq!(record.ttl_seconds, 7);
    }

    #[tokio::test]
    async fn test_list_workflows() {
        let store = StateStore::in_memory();

        let mut done = state("done");
        done.finish(WorkflowStatus::Completed);
        store.set_workflow_state(&state("first"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set_workflow_state(&done, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set_workflow_state(&state("last"), None).await.unwrap();

        let all = store.list_workflows(10, None);
        let ids: Vec<&str> = all.iter().map(|s| s.workflow_id.as_str()).collect();
        assert_eq!(ids, vec!["last", "done", "first"]);

        assert_eq!(store.list_workflows(1, None).len(), 1);

        let completed = store.list_workflows(10, Some(WorkflowStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].workflow_id, "done");
    }

    #[tokio::test]
    async fn test_concurrent_writes_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(StateStore::open_path(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_workflow_state(&state(&format!("wf-{i}")), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let parsed: HashMap<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 16);
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let store = Arc::new(StateStore::in_memory());
        store.set_workflow_state(&state("short"), Some(0)).await.unwrap();

        store.start_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.stats().total_entries, 0);

        store.close().await.unwrap();
        store.set_workflow_state(&state("after"), Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_clamped() {
        let store = Arc::new(StateStore::in_memory());
        store.set_workflow_state(&state("short"), Some(0)).await.unwrap();

        store.start_sweeper(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.stats().total_entries, 0);
        let finished = store
            .sweeper
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| handle.is_finished());
        assert_eq!(finished, Some(false));

        store.close().await.unwrap();
    }
}
