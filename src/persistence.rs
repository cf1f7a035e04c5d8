//! Persistence gateway
//!
//! Writes and reads the JSON artifacts of the blob layout. Publishing an
//! archetype writes its subset bodies first and its index last, then deletes
//! subset bodies the new index no longer references, so a reader holding the
//! new index never follows a dangling subset id.
//!
//! Archetypes are handed to a [`PersistencePool`]: a fixed set of writer
//! tasks draining a bounded queue, so the blob store never sees more than
//! `concurrency` archetypes in flight. A failed archetype is logged and
//! counted; the others keep going.

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::blob_store::BlobStore;
use crate::config::PersistenceConfig;
use crate::error::{Result, SubsetError};
use crate::indexer::{ArchetypeIndex, Subset};
use crate::keys;

/// Subset bodies of one archetype written concurrently
const SUBSET_WRITES_IN_FLIGHT: usize = 8;

/// Everything published for one archetype
#[derive(Debug, Clone)]
pub struct ArchetypeArtifacts {
    pub tournament: String,
    pub archetype: String,
    pub index: ArchetypeIndex,
    pub subsets: Vec<Subset>,
}

/// Outcome of publishing one archetype
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchetypeWrite {
    pub subsets_written: usize,
    pub stale_removed: usize,
}

/// JSON artifact access on top of a blob store
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn BlobStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Serialize `value` and store it under `key`
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(key, &bytes).await?;
        Ok(())
    }

    /// `Ok(None)` when the key is absent; errors for unreadable or unparseable blobs
    pub async fn fetch_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`fetch_json`](Self::fetch_json), but every failure is a logged miss
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.fetch_json(key).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(key = %key, "Artifact not found");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable artifact");
                None
            }
        }
    }

    pub async fn read_index(&self, tournament: &str, archetype: &str) -> Option<ArchetypeIndex> {
        self.read_json(&keys::archetype_index(tournament, archetype)).await
    }

    pub async fn read_subset(&self, tournament: &str, archetype: &str, subset_id: &str) -> Option<Subset> {
        self.read_json(&keys::subset(tournament, archetype, subset_id)).await
    }

    async fn write_subset(&self, tournament: &str, archetype: &str, subset: &Subset) -> Result<String> {
        let key = keys::subset(tournament, archetype, &subset.id);
        self.put_json(&key, subset).await?;
        Ok(key)
    }

    /// Publish one archetype: subsets, then index, then stale cleanup
    pub async fn publish_archetype(&self, artifacts: &ArchetypeArtifacts) -> Result<ArchetypeWrite> {
        let t = &artifacts.tournament;
        let a = &artifacts.archetype;

        let mut written = HashSet::new();
        for batch in artifacts.subsets.chunks(SUBSET_WRITES_IN_FLIGHT) {
            let batch_keys = try_join_all(batch.iter().map(|subset| self.write_subset(t, a, subset))).await?;
            written.extend(batch_keys);
        }

        self.put_json(&keys::archetype_index(t, a), &artifacts.index).await?;

        let mut stale_removed = 0;
        for key in self.store.list(&keys::subset_dir(t, a)).await? {
            if !written.contains(&key) {
                self.store.delete(&key).await?;
                stale_removed += 1;
            }
        }

        debug!(
            tournament = %t,
            archetype = %a,
            subsets = written.len(),
            stale_removed,
            "Published archetype"
        );

        Ok(ArchetypeWrite {
            subsets_written: written.len(),
            stale_removed,
        })
    }

    /// Delete every include/exclude artifact of an archetype
    pub async fn remove_archetype(&self, tournament: &str, archetype: &str) -> Result<usize> {
        let existing = self.store.list(&keys::subset_root(tournament, archetype)).await?;
        for key in &existing {
            self.store.delete(key).await?;
        }
        if !existing.is_empty() {
            info!(tournament = %tournament, archetype = %archetype, removed = existing.len(), "Removed archetype artifacts");
        }
        Ok(existing.len())
    }
}

// =============================================================================
// Worker pool
// =============================================================================

/// Totals over a whole batch
#[derive(Debug, Clone, Default)]
pub struct PublishSummary {
    pub archetypes_written: usize,
    pub subsets_written: usize,
    pub stale_removed: usize,
    /// `(archetype, error)` for each archetype that could not be written
    pub failures: Vec<(String, String)>,
}

impl PublishSummary {
    fn record(&mut self, archetype: &str, result: Result<ArchetypeWrite>) {
        match result {
            Ok(write) => {
                self.archetypes_written += 1;
                self.subsets_written += write.subsets_written;
                self.stale_removed += write.stale_removed;
            }
            Err(e) => self.failures.push((archetype.to_string(), e.to_string())),
        }
    }
}

/// Bounded pool of archetype writers
pub struct PersistencePool {
    job_tx: mpsc::Sender<ArchetypeArtifacts>,
    workers: Vec<JoinHandle<()>>,
    summary: Arc<Mutex<PublishSummary>>,
}

impl PersistencePool {
    /// Start `config.concurrency` writers fed by a queue of `config.queue_depth`
    pub fn start(gateway: PersistenceGateway, config: &PersistenceConfig) -> Self {
        let worker_count = config.concurrency.max(1);
        let (job_tx, job_rx) = mpsc::channel::<ArchetypeArtifacts>(config.queue_depth.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let summary = Arc::new(Mutex::new(PublishSummary::default()));

        let workers = (0..worker_count)
            .map(|i| {
                let gateway = gateway.clone();
                let job_rx = Arc::clone(&job_rx);
                let summary = Arc::clone(&summary);
                tokio::spawn(async move {
                    worker_task(i, gateway, job_rx, summary).await;
                })
            })
            .collect();

        debug!(workers = worker_count, "Started persistence pool");

        Self { job_tx, workers, summary }
    }

    /// Queue an archetype; waits while the queue is full
    pub async fn submit(&self, artifacts: ArchetypeArtifacts) -> Result<()> {
        self.job_tx
            .send(artifacts)
            .await
            .map_err(|_| SubsetError::Internal("Persistence pool closed".into()))
    }

    /// Close the queue and wait for every queued archetype to be written
    pub async fn finish(self) -> PublishSummary {
        drop(self.job_tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Persistence worker panicked");
            }
        }
        let summary = self.summary.lock().await;
        summary.clone()
    }
}

async fn worker_task(
    worker_id: usize,
    gateway: PersistenceGateway,
    job_rx: Arc<Mutex<mpsc::Receiver<ArchetypeArtifacts>>>,
    summary: Arc<Mutex<PublishSummary>>,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => {
                    debug!(worker_id, "Persistence worker shutting down");
                    return;
                }
            }
        };

        let result = gateway
            .publish_archetype(&job)
            .await
            .map_err(|e| SubsetError::Persist {
                archetype: job.archetype.clone(),
                source: Box::new(e),
            });

        if let Err(e) = &result {
            error!(worker_id, archetype = %job.archetype, error = %e, "Failed to persist archetype");
        }

        summary.lock().await.record(&job.archetype, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::filter::FilterPredicate;
    use crate::report::SubsetReport;
    use crate::subset::FilterMetadata;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

    use crate::error::StoreError;

    fn artifacts(archetype: &str, subset_ids: &[&str]) -> ArchetypeArtifacts {
        let subsets = subset_ids
            .iter()
            .map(|id| Subset {
                id: id.to_string(),
                report: SubsetReport { deck_total: 2, items: Vec::new() },
                primary_filter: FilterPredicate::new(),
                alternate_filters: Vec::new(),
                filters: FilterMetadata {
                    include: Vec::new(),
                    exclude: Vec::new(),
                    base_deck_total: 4,
                },
            })
            .collect();
        ArchetypeArtifacts {
            tournament: "Worlds".to_string(),
            archetype: archetype.to_string(),
            index: ArchetypeIndex {
                archetype: archetype.to_string(),
                deck_total: 4,
                total_combinations: subset_ids.len() as u32,
                unique_subsets: subset_ids.len() as u32,
                duplicates_dropped: 0,
                reduction_pct: 0.0,
                cards: BTreeMap::new(),
                filter_map: BTreeMap::new(),
                subsets: BTreeMap::new(),
                generated_at: Utc::now(),
            },
            subsets,
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_stale_subsets() {
        let store = Arc::new(MemoryBlobStore::new());
        let gateway = PersistenceGateway::new(store.clone());

        let first = gateway
            .publish_archetype(&artifacts("Gardevoir ex", &["subset_001", "subset_002", "subset_003"]))
            .await
            .unwrap();
        assert_eq!(first, ArchetypeWrite { subsets_written: 3, stale_removed: 0 });

        let second = gateway
            .publish_archetype(&artifacts("Gardevoir ex", &["subset_001"]))
            .await
            .unwrap();
        assert_eq!(second, ArchetypeWrite { subsets_written: 1, stale_removed: 2 });

        assert!(gateway.read_subset("Worlds", "Gardevoir ex", "subset_001").await.is_some());
        assert!(gateway.read_subset("Worlds", "Gardevoir ex", "subset_002").await.is_none());
        let index = gateway.read_index("Worlds", "Gardevoir ex").await.unwrap();
        assert_eq!(index.unique_subsets, 1);
    }

    #[tokio::test]
    async fn test_unparseable_artifact_is_a_miss() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put(&keys::archetype_index("Worlds", "Gardevoir ex"), b"not json")
            .await
            .unwrap();
        let gateway = PersistenceGateway::new(store);

        assert!(gateway.read_index("Worlds", "Gardevoir ex").await.is_none());
        assert!(gateway
            .fetch_json::<ArchetypeIndex>(&keys::archetype_index("Worlds", "Gardevoir ex"))
            .await
            .is_err());
        assert!(gateway
            .fetch_json::<ArchetypeIndex>(&keys::archetype_index("Worlds", "Other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_archetype() {
        let store = Arc::new(MemoryBlobStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        gateway
            .publish_archetype(&artifacts("Gardevoir ex", &["subset_001"]))
            .await
            .unwrap();
        gateway
            .publish_archetype(&artifacts("Gardevoir", &["subset_001"]))
            .await
            .unwrap();

        assert_eq!(gateway.remove_archetype("Worlds", "Gardevoir ex").await.unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    /// Store that refuses writes for one archetype
    struct FailingStore {
        inner: MemoryBlobStore,
        poisoned: String,
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, data: &[u8]) -> std::result::Result<(), StoreError> {
            if key.contains(&self.poisoned) {
                return Err(StoreError::Http("503 from origin".into()));
            }
            self.inner.put(key, data).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn test_pool_isolates_failures() {
        let store = Arc::new(FailingStore {
            inner: MemoryBlobStore::new(),
            poisoned: "/Charizard_ex/".to_string(),
        });
        let gateway = PersistenceGateway::new(store.clone());
        let config = PersistenceConfig { concurrency: 2, queue_depth: 1 };
        let pool = PersistencePool::start(gateway.clone(), &config);

        for name in ["Gardevoir ex", "Charizard ex", "Dragapult ex", "Raging Bolt ex"] {
            pool.submit(artifacts(name, &["subset_001", "subset_002"])).await.unwrap();
        }
        let summary = pool.finish().await;

        assert_eq!(summary.archetypes_written, 3);
        assert_eq!(summary.subsets_written, 6);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "Charizard ex");
        assert!(gateway.read_index("Worlds", "Dragapult ex").await.is_some());
        assert!(gateway.read_index("Worlds", "Charizard ex").await.is_none());
    }
}
