//! In-memory sandbox registry with TTL-driven pruning.
//!
//! The [`SandboxManager`] exclusively owns the set of live handles. It is
//! an explicitly constructed instance with an explicit start/stop
//! lifecycle for its background prune task; nothing here is global.
//! Registry map mutations are quick in-memory actions under a mutex that
//! is never held across backing-store I/O.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::fs;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Sandbox, SandboxInfo};
use crate::error::SandboxError;
use crate::remote::RemoteClient;

/// Options for creating a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Caller-assigned id; generated (uuid v4) when absent.
    pub id: Option<String>,
    /// Opaque metadata, immutable after creation.
    pub metadata: BTreeMap<String, String>,
    /// Seconds of inactivity before expiry. None never expires.
    pub ttl_seconds: Option<f64>,
}

/// Result of one prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Sandboxes fully destroyed by this pass.
    pub removed: usize,
    /// Ids whose backing teardown failed; they are unregistered anyway
    /// and their storage may be orphaned.
    pub failed: Vec<String>,
}

enum ManagerBackend {
    Local { root_dir: PathBuf },
    Remote { client: Arc<RemoteClient> },
}

struct Inner {
    entries: HashMap<String, Arc<Sandbox>>,
    /// Insertion order of ids, for stable local listings.
    order: Vec<String>,
    /// Ids mid-creation: the map slot is claimed but backing storage is
    /// still being allocated outside the lock.
    reserved: HashSet<String>,
}

/// Owns the collection of live sandbox handles.
pub struct SandboxManager {
    backend: ManagerBackend,
    inner: Mutex<Inner>,
    cleanup: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl SandboxManager {
    /// A manager whose sandboxes are directories under `root_dir`.
    pub fn local(root_dir: impl Into<PathBuf>) -> Self {
        Self::new(ManagerBackend::Local {
            root_dir: root_dir.into(),
        })
    }

    /// A manager that proxies every operation to the remote service.
    pub fn remote(client: RemoteClient) -> Self {
        Self::new(ManagerBackend::Remote {
            client: Arc::new(client),
        })
    }

    fn new(backend: ManagerBackend) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                reserved: HashSet::new(),
            }),
            cleanup: Mutex::new(None),
        }
    }

    /// Creates and registers a sandbox.
    ///
    /// Fails with `AlreadyExists` when the id is registered or being
    /// created concurrently.
    pub async fn create(&self, options: CreateOptions) -> Result<Arc<Sandbox>, SandboxError> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if id.trim().is_empty() {
            return Err(SandboxError::storage("sandbox id must not be empty"));
        }

        // Claim the id before the (suspending) storage allocation.
        {
            let mut inner = self.inner.lock().await;
            if inner.entries.contains_key(&id) || inner.reserved.contains(&id) {
                return Err(SandboxError::already_exists(id));
            }
            inner.reserved.insert(id.clone());
        }

        let allocated = self.allocate(&id, &options).await;
        let mut inner = self.inner.lock().await;
        inner.reserved.remove(&id);
        let sandbox = allocated?;

        inner.entries.insert(id.clone(), sandbox.clone());
        inner.order.push(id.clone());
        info!("Created sandbox {id}");
        Ok(sandbox)
    }

    async fn allocate(
        &self,
        id: &str,
        options: &CreateOptions,
    ) -> Result<Arc<Sandbox>, SandboxError> {
        match &self.backend {
            ManagerBackend::Local { root_dir } => {
                let root = root_dir.join(id);
                fs::create_dir_all(&root).await?;
                let now = Utc::now();
                let info = SandboxInfo {
                    id: id.to_string(),
                    created_at: now,
                    last_used_at: now,
                    ttl_seconds: options.ttl_seconds,
                    metadata: options.metadata.clone(),
                    jurisdiction: None,
                    status: None,
                };
                Ok(Arc::new(Sandbox::local(info, root)))
            }
            ManagerBackend::Remote { client } => {
                let info = client.create_sandbox(id, options).await?;
                Ok(Arc::new(Sandbox::remote(info, client.clone())))
            }
        }
    }

    /// Looks up a registered sandbox.
    pub async fn get(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.inner.lock().await.entries.get(id).cloned()
    }

    /// Looks up a registered sandbox, failing with `NotFound` when absent.
    ///
    /// The remote backend additionally attaches to sandboxes this
    /// process did not create: an unknown id is fetched from the service
    /// and registered on success.
    pub async fn require(&self, id: &str) -> Result<Arc<Sandbox>, SandboxError> {
        if let Some(handle) = self.get(id).await {
            return Ok(handle);
        }
        match &self.backend {
            ManagerBackend::Local { .. } => {
                Err(SandboxError::not_found(format!("sandbox {id}")))
            }
            ManagerBackend::Remote { client } => {
                let info = client.get_sandbox(id).await?;
                let attached = Arc::new(Sandbox::remote(info, client.clone()));
                let mut inner = self.inner.lock().await;
                // a concurrent attach may have won the race
                let handle = inner
                    .entries
                    .entry(id.to_string())
                    .or_insert_with(|| attached.clone())
                    .clone();
                if Arc::ptr_eq(&handle, &attached) {
                    inner.order.push(id.to_string());
                }
                Ok(handle)
            }
        }
    }

    /// A snapshot of all current sandbox metadata.
    ///
    /// Insertion-stable for the local backend; server-defined order for
    /// the remote backend (listed from the service, not the local map).
    pub async fn list(&self) -> Result<Vec<SandboxInfo>, SandboxError> {
        match &self.backend {
            ManagerBackend::Local { .. } => {
                let handles: Vec<Arc<Sandbox>> = {
                    let inner = self.inner.lock().await;
                    inner
                        .order
                        .iter()
                        .filter_map(|id| inner.entries.get(id).cloned())
                        .collect()
                };
                let mut infos = Vec::with_capacity(handles.len());
                for handle in handles {
                    infos.push(handle.info().await);
                }
                Ok(infos)
            }
            ManagerBackend::Remote { client } => client.list_sandboxes().await,
        }
    }

    /// Removes a sandbox and tears down its backing storage.
    ///
    /// Idempotent: returns whether something was actually removed.
    pub async fn delete(&self, id: &str) -> Result<bool, SandboxError> {
        let handle = self.unregister(id).await;
        match handle {
            Some(sandbox) => {
                sandbox.destroy().await?;
                info!("Deleted sandbox {id}");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroys every sandbox expired at `reference`.
    ///
    /// Sandboxes created after the pass snapshots the registry are never
    /// candidates. A teardown failure does not abort the pass; the failed
    /// ids are reported in the outcome.
    pub async fn prune_expired(&self, reference: DateTime<Utc>) -> PruneOutcome {
        let snapshot: Vec<(String, Arc<Sandbox>)> = {
            let inner = self.inner.lock().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.entries.get(id).map(|s| (id.clone(), s.clone())))
                .collect()
        };

        let mut outcome = PruneOutcome::default();
        for (id, sandbox) in snapshot {
            if !sandbox.info().await.is_expired(reference) {
                continue;
            }
            // A concurrent explicit delete wins; don't double-count.
            if self.unregister(&id).await.is_none() {
                continue;
            }
            match sandbox.destroy().await {
                Ok(_) => {
                    debug!("Pruned expired sandbox {id}");
                    outcome.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to tear down expired sandbox {id}: {e}");
                    outcome.failed.push(id);
                }
            }
        }

        if outcome.removed > 0 {
            info!("Pruned {} expired sandbox(es)", outcome.removed);
        }
        outcome
    }

    /// Starts the periodic prune task. A convenience only; pruning can
    /// always be triggered directly via [`Self::prune_expired`].
    pub async fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.cleanup.lock().await;
        if slot.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        let outcome = manager.prune_expired(Utc::now()).await;
                        if !outcome.failed.is_empty() {
                            warn!("Prune pass left {} sandbox(es) orphaned", outcome.failed.len());
                        }
                    }
                }
            }
        });

        *slot = Some((tx, handle));
        debug!("Cleanup task started ({interval:?} interval)");
    }

    /// Terminal shutdown: stops the cleanup task and destroys every
    /// registered sandbox, waiting for each teardown to finish.
    pub async fn dispose_all(&self) {
        if let Some((tx, handle)) = self.cleanup.lock().await.take() {
            let _ = tx.send(true);
            let _ = handle.await;
        }

        let handles: Vec<Arc<Sandbox>> = {
            let mut inner = self.inner.lock().await;
            inner.order.clear();
            inner.entries.drain().map(|(_, sandbox)| sandbox).collect()
        };

        let results = join_all(handles.iter().map(|sandbox| sandbox.destroy())).await;
        for (sandbox, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to tear down sandbox {} during shutdown: {e}", sandbox.id());
            }
        }
        debug!("Registry disposed");
    }

    async fn unregister(&self, id: &str) -> Option<Arc<Sandbox>> {
        let mut inner = self.inner.lock().await;
        let handle = inner.entries.remove(id);
        if handle.is_some() {
            inner.order.retain(|existing| existing != id);
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> SandboxManager {
        SandboxManager::local(dir.path())
    }

    #[tokio::test]
    async fn test_create_generates_id_and_root() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let sandbox = manager.create(CreateOptions::default()).await.unwrap();

        assert!(!sandbox.id().is_empty());
        assert!(sandbox.root().unwrap().is_dir());
        assert!(manager.get(sandbox.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_create_with_explicit_id_and_metadata() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let mut metadata = BTreeMap::new();
        metadata.insert("owner".to_string(), "tests".to_string());

        let sandbox = manager
            .create(CreateOptions {
                id: Some("named".to_string()),
                metadata: metadata.clone(),
                ttl_seconds: Some(300.0),
            })
            .await
            .unwrap();

        let info = sandbox.info().await;
        assert_eq!(info.id, "named");
        assert_eq!(info.metadata, metadata);
        assert_eq!(info.ttl_seconds, Some(300.0));
    }

    #[tokio::test]
    async fn test_create_duplicate_id_fails() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let options = CreateOptions {
            id: Some("dup".to_string()),
            ..CreateOptions::default()
        };

        manager.create(options.clone()).await.unwrap();
        let err = manager.create(options).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_require_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let err = manager.require("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_insertion_stable() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        for id in ["c", "a", "b"] {
            manager
                .create(CreateOptions {
                    id: Some(id.to_string()),
                    ..CreateOptions::default()
                })
                .await
                .unwrap();
        }

        let ids: Vec<String> = manager
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let sandbox = manager
            .create(CreateOptions {
                id: Some("victim".to_string()),
                ..CreateOptions::default()
            })
            .await
            .unwrap();
        let root = sandbox.root().unwrap().clone();

        assert!(manager.delete("victim").await.unwrap());
        assert!(!root.exists());
        assert!(!manager.delete("victim").await.unwrap());
        assert!(manager.get("victim").await.is_none());
    }

    #[tokio::test]
    async fn test_prune_removes_exactly_the_expired() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager
            .create(CreateOptions {
                id: Some("short".to_string()),
                ttl_seconds: Some(0.001),
                ..CreateOptions::default()
            })
            .await
            .unwrap();
        manager
            .create(CreateOptions {
                id: Some("forever".to_string()),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = manager.prune_expired(Utc::now()).await;

        assert_eq!(outcome.removed, 1);
        assert!(outcome.failed.is_empty());
        assert!(manager.get("short").await.is_none());
        assert!(manager.get("forever").await.is_some());
    }

    #[tokio::test]
    async fn test_prune_scenario_registry_left_empty() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager
            .create(CreateOptions {
                id: Some("ephemeral".to_string()),
                ttl_seconds: Some(0.001),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = manager.prune_expired(Utc::now()).await;

        assert_eq!(outcome.removed, 1);
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_is_idempotent_within_reference() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager
            .create(CreateOptions {
                id: Some("once".to_string()),
                ttl_seconds: Some(0.001),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reference = Utc::now();
        assert_eq!(manager.prune_expired(reference).await.removed, 1);
        assert_eq!(manager.prune_expired(reference).await.removed, 0);
    }

    #[tokio::test]
    async fn test_prune_skips_touched_sandboxes() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let sandbox = manager
            .create(CreateOptions {
                id: Some("busy".to_string()),
                ttl_seconds: Some(0.005),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        sandbox.touch().await;
        let outcome = manager.prune_expired(Utc::now()).await;

        assert_eq!(outcome.removed, 0);
        assert!(manager.get("busy").await.is_some());
    }

    #[tokio::test]
    async fn test_prune_races_create_and_delete_without_double_counting() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SandboxManager::local(dir.path()));
        for i in 0..16 {
            manager
                .create(CreateOptions {
                    id: Some(format!("old-{i}")),
                    ttl_seconds: Some(0.001),
                    ..CreateOptions::default()
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pruner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.prune_expired(Utc::now()).await })
        };
        let deleter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let mut deleted = 0usize;
                for i in 0..16 {
                    if manager.delete(&format!("old-{i}")).await.unwrap() {
                        deleted += 1;
                    }
                }
                deleted
            })
        };
        let creator = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                for i in 0..8 {
                    manager
                        .create(CreateOptions {
                            id: Some(format!("new-{i}")),
                            ttl_seconds: Some(0.001),
                            ..CreateOptions::default()
                        })
                        .await
                        .unwrap();
                }
            })
        };

        let outcome = pruner.await.unwrap();
        let deleted = deleter.await.unwrap();
        creator.await.unwrap();

        assert!(outcome.failed.is_empty());
        // each expired sandbox was removed exactly once, by whichever
        // of prune and explicit delete won the race for it
        assert_eq!(outcome.removed + deleted, 16);
        for i in 0..16 {
            assert!(manager.get(&format!("old-{i}")).await.is_none());
        }
        // sandboxes created during the pass are never candidates for it
        for i in 0..8 {
            assert!(manager.get(&format!("new-{i}")).await.is_some());
        }
        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_dispose_all_destroys_everything() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SandboxManager::local(dir.path()));
        let first = manager.create(CreateOptions::default()).await.unwrap();
        let second = manager.create(CreateOptions::default()).await.unwrap();
        let roots = [
            first.root().unwrap().clone(),
            second.root().unwrap().clone(),
        ];

        manager.start_cleanup(Duration::from_secs(3600)).await;
        manager.dispose_all().await;

        assert!(manager.list().await.unwrap().is_empty());
        for root in roots {
            assert!(!root.exists());
        }
    }

    #[tokio::test]
    async fn test_background_cleanup_prunes() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SandboxManager::local(dir.path()));
        manager
            .create(CreateOptions {
                id: Some("bg".to_string()),
                ttl_seconds: Some(0.001),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        manager.start_cleanup(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(manager.get("bg").await.is_none());
        manager.dispose_all().await;
    }
}
