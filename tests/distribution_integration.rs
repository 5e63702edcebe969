//! CloudRAID Distribution Integration Tests
//!
//! Drives the service end to end against in-memory connectors, the RAID5
//! codec and the in-memory metadata store:
//! - Store, read back and delete a file
//! - Degraded reads with one backend missing
//! - Partial distribution failure and retry
//! - Pool capacity and asynchronous mode

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use cloudraid::adapters::{InMemoryConnector, InMemoryEventCollector, InMemoryMetadataStore, Raid5Codec};
use cloudraid::config::{AcquireMode, CoreConfig, RetrievalPolicy};
use cloudraid::domain::ports::{
    ContentHash, FileId, FileStatus, MetadataStore, ShardIndex, StorageConnector, UserId,
};
use cloudraid::engine::{CloudRaidService, ConnectorSet, CoreContext, JobOutcome};
use cloudraid::error::FailureKind;
use cloudraid::metrics::CoreMetrics;

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    _dir: TempDir,
    service: CloudRaidService,
    store: Arc<InMemoryMetadataStore>,
    disks: Vec<Arc<InMemoryConnector>>,
    events: Arc<InMemoryEventCollector>,
    metrics: CoreMetrics,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut CoreConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = CoreConfig::with_staging_root(dir.path(), "correct horse battery staple");
        tweak(&mut config);

        let disks: Vec<Arc<InMemoryConnector>> = (0..3)
            .map(|i| {
                Arc::new(InMemoryConnector::new(
                    ShardIndex::new(i).unwrap(),
                    &config.split_output_dir,
                ))
            })
            .collect();
        let connectors = disks
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn StorageConnector>)
            .collect();

        let store = Arc::new(InMemoryMetadataStore::new());
        let events = Arc::new(InMemoryEventCollector::new());
        let metrics = CoreMetrics::new().unwrap();
        let codec = Raid5Codec::new(config.block_size).unwrap();

        let ctx = CoreContext::new(
            config,
            store.clone(),
            Arc::new(codec),
            ConnectorSet::new(connectors).unwrap(),
            events.clone(),
            metrics.clone(),
        );
        let service = CloudRaidService::new(ctx);
        assert!(service.connect_all().await.unwrap());

        Self {
            _dir: dir,
            service,
            store,
            disks,
            events,
            metrics,
        }
    }

    async fn new_record(&self, path: &str, owner: UserId) -> FileId {
        self.store
            .file_new(path, None, Utc::now(), owner)
            .await
            .unwrap()
    }

    /// Create a record and store `data` under it.
    async fn store_file(&self, path: &str, owner: UserId, data: &[u8]) -> FileId {
        let id = self.new_record(path, owner).await;
        let outcome = self.service.put_data(data, id, false).await;
        assert!(outcome.is_success(), "put failed: {:?}", outcome.failure());
        id
    }

    async fn read_back(&self, id: FileId) -> Vec<u8> {
        let mut file = match self.service.get_data(id).await {
            JobOutcome::Done(file) => file,
            other => panic!("get failed: {:?}", other.failure()),
        };
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn status(&self, id: FileId) -> FileStatus {
        self.store.file_by_id(id).await.unwrap().unwrap().status
    }

    async fn hash(&self, id: FileId) -> ContentHash {
        self.store
            .file_by_id(id)
            .await
            .unwrap()
            .unwrap()
            .content_hash
            .unwrap()
    }
}

/// Deterministic, non-repeating test payload.
fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

// =============================================================================
// Store / Read / Delete
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_walks_full_status_sequence() {
        let h = Harness::new().await;
        let data = payload(10 * 1024 * 1024, 1);

        let id = h.store_file("docs/report.pdf", UserId(42), &data).await;

        assert_eq!(
            h.store.status_history(id),
            vec![
                FileStatus::Uploading,
                FileStatus::Uploaded,
                FileStatus::Splitting,
                FileStatus::Splitted,
                FileStatus::Distributing,
                FileStatus::Distributed,
                FileStatus::Ready,
            ]
        );
        assert_eq!(
            h.events.status_trail(id),
            vec![
                FileStatus::Uploaded,
                FileStatus::Splitting,
                FileStatus::Splitted,
                FileStatus::Distributing,
                FileStatus::Distributed,
                FileStatus::Ready,
            ]
        );

        let hash = h.hash(id).await;
        for disk in &h.disks {
            assert!(disk.holds_shard(&hash));
            assert_eq!(disk.upload_count(), 1);
        }
        assert_eq!(h.events.events_of_type("DistributionCompleted").len(), 1);
        assert_eq!(h.metrics.job_count("put", "done"), 1);
    }

    #[tokio::test]
    async fn test_split_staging_is_cleaned_up() {
        let h = Harness::new().await;
        let id = h.store_file("a.txt", UserId(1), &payload(5000, 2)).await;
        let hash = h.hash(id).await;

        let config = h.service.config();
        assert!(!config
            .split_output_dir
            .join(hash.metadata_file_name())
            .exists());
        assert!(!config.split_input_dir.join("1").join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_read_back_is_byte_identical() {
        let h = Harness::new().await;
        let data = payload(10 * 1024 * 1024, 3);
        let id = h.store_file("docs/report.pdf", UserId(42), &data).await;

        assert_eq!(h.read_back(id).await, data);
        assert_eq!(h.status(id).await, FileStatus::Ready);
        assert_eq!(h.events.events_of_type("FileRetrieved").len(), 1);

        // The reassembled copy is gone once the reader has it open
        let owner_dir = h.service.config().merge_output_dir.join("42");
        let leftovers = walkdir::WalkDir::new(&owner_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_open_handle_outlives_merged_file() {
        let h = Harness::new().await;
        let data = payload(20_000, 7);
        let id = h.store_file("secret.txt", UserId(8), &data).await;

        let first = h.service.get_data(id).await.into_value().unwrap();
        let second = h.service.get_data(id).await.into_value().unwrap();
        let owner_dir = h.service.config().merge_output_dir.join("8");
        assert_eq!(std::fs::read_dir(&owner_dir).unwrap().count(), 0);

        for mut file in [first, second] {
            let mut out = Vec::new();
            file.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, data);
        }
    }

    #[tokio::test]
    async fn test_empty_file_round_trip() {
        let h = Harness::new().await;
        let id = h.store_file("empty", UserId(1), &[]).await;
        assert!(h.read_back(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_shards_and_record() {
        let h = Harness::new().await;
        let id = h.store_file("old.bin", UserId(7), &payload(4096, 4)).await;
        let hash = h.hash(id).await;

        let outcome = h.service.delete_data(id).await;
        assert!(outcome.is_success());

        assert!(h.store.file_by_id(id).await.unwrap().is_none());
        for disk in &h.disks {
            assert!(!disk.holds_shard(&hash));
            assert_eq!(disk.object_count(), 0);
        }
        let history = h.store.status_history(id);
        assert_eq!(
            &history[history.len() - 2..],
            &[FileStatus::Deleting, FileStatus::Deleted]
        );
        assert_eq!(h.events.events_of_type("FileDeleted").len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let h = Harness::new().await;
        let first = payload(3000, 5);
        let second = payload(7000, 6);
        let id = h.store_file("notes.md", UserId(3), &first).await;
        let old_hash = h.hash(id).await;

        h.store
            .file_update_state(id, FileStatus::Uploading)
            .await
            .unwrap();
        let outcome = h.service.put_data(&second[..], id, true).await;
        assert!(outcome.is_success());

        // Same path, same key: the shards are overwritten in place
        assert_eq!(h.hash(id).await, old_hash);
        for disk in &h.disks {
            assert_eq!(disk.update_count(), 1);
            assert_eq!(disk.delete_count(), 0);
            assert!(disk.holds_shard(&old_hash));
        }
        assert_eq!(h.read_back(id).await, second);
    }
}

// =============================================================================
// Records Sharing Content
// =============================================================================

mod shared_content_tests {
    use super::*;

    #[tokio::test]
    async fn test_equal_content_gets_separate_keys() {
        let h = Harness::new().await;
        let data = payload(5000, 20);
        let a = h.store_file("a.txt", UserId(1), &data).await;
        let b = h.store_file("b.txt", UserId(2), &data).await;
        let same_path = h.store_file("a.txt", UserId(2), &data).await;

        let keys = [h.hash(a).await, h.hash(b).await, h.hash(same_path).await];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
        for disk in &h.disks {
            // One device shard plus one metadata shard per record
            assert_eq!(disk.object_count(), 6);
        }
    }

    #[tokio::test]
    async fn test_delete_keeps_other_record_with_same_content() {
        let h = Harness::new().await;
        let data = payload(5000, 21);
        let a = h.store_file("a.txt", UserId(1), &data).await;
        let b = h.store_file("b.txt", UserId(2), &data).await;

        assert!(h.service.delete_data(a).await.is_success());

        assert_eq!(h.status(b).await, FileStatus::Ready);
        let key = h.hash(b).await;
        for disk in &h.disks {
            assert!(disk.holds_shard(&key));
        }
        assert_eq!(h.read_back(b).await, data);
    }

    #[tokio::test]
    async fn test_update_keeps_other_record_with_same_content() {
        let h = Harness::new().await;
        let data = payload(5000, 22);
        let a = h.store_file("a.txt", UserId(1), &data).await;
        let b = h.store_file("b.txt", UserId(2), &data).await;

        h.store
            .file_update_state(a, FileStatus::Uploading)
            .await
            .unwrap();
        let replacement = payload(6000, 23);
        assert!(h.service.put_data(&replacement[..], a, true).await.is_success());

        assert_eq!(h.read_back(a).await, replacement);
        assert_eq!(h.read_back(b).await, data);
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_same_content() {
        let h = Harness::new().await;
        let data = payload(50_000, 24);
        let ids = [
            h.new_record("one.bin", UserId(5)).await,
            h.new_record("two.bin", UserId(5)).await,
            h.new_record("three.bin", UserId(6)).await,
        ];

        let puts = ids.iter().map(|id| {
            let service = h.service.clone();
            let data = &data;
            async move { service.put_data(&data[..], *id, false).await }
        });
        for outcome in futures::future::join_all(puts).await {
            assert!(outcome.is_success(), "put failed: {:?}", outcome.failure());
        }

        for id in ids {
            assert_eq!(h.read_back(id).await, data);
        }
    }
}

// =============================================================================
// Degraded Reads
// =============================================================================

mod degraded_tests {
    use super::*;

    #[tokio::test]
    async fn test_read_survives_one_lost_backend() {
        for lost in 0..3 {
            let h = Harness::new().await;
            let data = payload(100_000, 10 + lost as u64);
            let id = h.store_file("x.bin", UserId(1), &data).await;
            let hash = h.hash(id).await;

            h.disks[lost].lose_shard(&hash);
            assert_eq!(h.read_back(id).await, data, "lost backend {}", lost);
            assert_eq!(h.metrics.backend_failure_count(lost, "get"), 1);
        }
    }

    #[tokio::test]
    async fn test_read_fails_with_two_lost_backends() {
        let h = Harness::new().await;
        let id = h.store_file("x.bin", UserId(1), &payload(10_000, 20)).await;
        let hash = h.hash(id).await;

        h.disks[0].lose_shard(&hash);
        h.disks[2].fail_gets(true);

        let outcome = h.service.get_data(id).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Codec);
        // A failed read leaves the record untouched
        assert_eq!(h.status(id).await, FileStatus::Ready);
    }

    #[tokio::test]
    async fn test_require_all_policy_rejects_degraded_read() {
        let h = Harness::with_config(|c| c.retrieval = RetrievalPolicy::RequireAll).await;
        let id = h.store_file("x.bin", UserId(1), &payload(10_000, 21)).await;
        let hash = h.hash(id).await;

        h.disks[1].lose_shard(&hash);
        let outcome = h.service.get_data(id).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Backend);
    }

    #[tokio::test]
    async fn test_metadata_shard_from_any_backend() {
        let h = Harness::new().await;
        let data = payload(20_000, 22);
        let id = h.store_file("x.bin", UserId(1), &data).await;
        let hash = h.hash(id).await;

        // Backend 0 still serves its device shard but not the metadata shard
        h.disks[0].lose_shard(&hash);
        h.disks[0].fail_gets(true);
        assert_eq!(h.read_back(id).await, data);
        assert_eq!(h.metrics.backend_failure_count(0, "get_metadata"), 1);
    }
}

// =============================================================================
// Failure Handling
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_failure_stops_at_distributing() {
        let h = Harness::new().await;
        h.disks[1].fail_uploads(true);

        let id = h.new_record("docs/report.pdf", UserId(42)).await;
        let data = payload(50_000, 30);
        let outcome = h.service.put_data(&data[..], id, false).await;

        assert!(!outcome.is_success());
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Backend);
        assert!(failure.retryable);
        assert_eq!(h.status(id).await, FileStatus::Distributing);

        // Every connector was still called
        for disk in &h.disks {
            assert_eq!(disk.upload_count(), 1);
        }
        assert_eq!(h.events.events_of_type("DistributionFailed").len(), 1);
        assert_eq!(h.metrics.backend_failure_count(1, "upload"), 1);
        assert_eq!(h.metrics.job_count("put", "failed"), 1);
    }

    #[tokio::test]
    async fn test_retry_completes_distribution() {
        let h = Harness::new().await;
        h.disks[2].fail_uploads(true);

        let id = h.new_record("retry.bin", UserId(5)).await;
        let data = payload(30_000, 31);
        assert!(!h.service.put_data(&data[..], id, false).await.is_success());

        h.disks[2].fail_uploads(false);
        let outcome = h.service.retry_distribution(id).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure());

        assert_eq!(h.status(id).await, FileStatus::Ready);
        let hash = h.hash(id).await;
        for disk in &h.disks {
            assert!(disk.holds_shard(&hash));
            assert_eq!(disk.update_count(), 1);
        }
        assert_eq!(h.read_back(id).await, data);
    }

    #[tokio::test]
    async fn test_get_requires_ready() {
        let h = Harness::new().await;
        let id = h.new_record("pending.txt", UserId(1)).await;

        let outcome = h.service.get_data(id).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::IllegalState);
        assert_eq!(failure.status_code().as_u16(), 409);
    }

    #[tokio::test]
    async fn test_put_requires_uploading() {
        let h = Harness::new().await;
        let id = h.store_file("done.txt", UserId(1), b"hello").await;

        let outcome = h.service.put_data(&b"again"[..], id, false).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::IllegalState);
        assert_eq!(h.status(id).await, FileStatus::Ready);
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let h = Harness::new().await;
        let outcome = h.service.delete_data(FileId(999)).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(failure.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_delete_failure_stops_at_deleting() {
        let h = Harness::new().await;
        let id = h.store_file("keep.txt", UserId(1), b"data").await;
        h.disks[0].fail_deletes(true);

        let outcome = h.service.delete_data(id).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Backend);
        assert_eq!(h.status(id).await, FileStatus::Deleting);
    }

    #[tokio::test]
    async fn test_record_removal_can_be_finished_later() {
        let h = Harness::new().await;
        let id = h.store_file("stale.txt", UserId(1), b"data").await;
        let key = h.hash(id).await;
        h.store.fail_deletes(true);

        let outcome = h.service.delete_data(id).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::DataAccess);
        assert_eq!(h.status(id).await, FileStatus::Deleted);
        for disk in &h.disks {
            assert!(!disk.holds_shard(&key));
        }

        h.store.fail_deletes(false);
        assert!(h.service.delete_data(id).await.is_success());
        assert!(h.store.file_by_id(id).await.unwrap().is_none());
        assert_eq!(h.events.events_of_type("FileDeleted").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_rejects_record_still_distributing() {
        let h = Harness::new().await;
        let id = h.new_record("busy.txt", UserId(1)).await;
        h.disks[1].fail_uploads(true);
        assert!(!h.service.put_data(&b"data"[..], id, false).await.is_success());

        let failure = h.service.delete_data(id).await.failure().cloned().unwrap();
        assert_eq!(failure.kind, FailureKind::IllegalState);
        assert!(failure.message.contains("READY or DELETED"), "{}", failure.message);
        assert_eq!(h.status(id).await, FileStatus::Distributing);
    }

    #[tokio::test]
    async fn test_metadata_store_outage() {
        let h = Harness::new().await;
        let id = h.new_record("a.txt", UserId(1)).await;
        h.store.set_available(false);

        let outcome = h.service.put_data(&b"data"[..], id, false).await;
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::DataAccess);
    }
}

// =============================================================================
// Pool and Modes
// =============================================================================

mod pool_tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_state_reset_after_job() {
        let h = Harness::new().await;
        let capacity = h.service.pool().capacity();
        h.store_file("a.txt", UserId(1), b"abc").await;

        assert_eq!(h.service.pool().available(), capacity);
        assert_eq!(h.metrics.active_slots(), 0);

        let slot = h.service.get_slot().await.unwrap();
        assert!(slot.state().unwrap().is_empty());
        assert_eq!(h.metrics.active_slots(), 1);
        drop(slot);
        assert_eq!(h.metrics.active_slots(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_acquire_reports_capacity() {
        let h = Harness::with_config(|c| {
            c.slots = 1;
            c.acquire_mode = AcquireMode::FailFast;
        })
        .await;
        let id = h.store_file("a.txt", UserId(1), b"abc").await;

        let held = h.service.get_slot().await.unwrap();
        let outcome = h.service.get_data(id).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Capacity);
        assert_eq!(failure.status_code().as_u16(), 503);
        assert_eq!(h.metrics.job_count("get", "failed"), 1);

        drop(held);
        assert_eq!(h.read_back(id).await, b"abc");
    }

    #[tokio::test]
    async fn test_concurrent_jobs_share_pool() {
        let h = Harness::with_config(|c| c.slots = 2).await;
        let files: Vec<(String, Vec<u8>)> = (0..6)
            .map(|i| (format!("f{}.bin", i), payload(20_000 + i * 100, 40 + i as u64)))
            .collect();

        let mut ids = Vec::new();
        for (path, _) in &files {
            ids.push(h.new_record(path, UserId(9)).await);
        }
        let puts = files.iter().zip(&ids).map(|((_, data), id)| {
            let service = h.service.clone();
            async move { service.put_data(&data[..], *id, false).await }
        });
        for outcome in futures::future::join_all(puts).await {
            assert!(outcome.is_success());
        }

        for ((_, data), id) in files.iter().zip(&ids) {
            assert_eq!(&h.read_back(*id).await, data);
        }
        assert_eq!(h.service.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_asynchronous_put_dispatches() {
        let h = Harness::with_config(|c| c.asynchronous = true).await;
        let id = h.new_record("async.bin", UserId(2)).await;
        let data = payload(64_000, 50);

        let outcome = h.service.put_data(&data[..], id, false).await;
        assert!(matches!(outcome, JobOutcome::Dispatched));
        assert_eq!(h.metrics.job_count("put", "dispatched"), 1);

        h.service.wait_idle().await;
        assert_eq!(h.status(id).await, FileStatus::Ready);
        assert_eq!(h.metrics.job_count("distribute", "done"), 1);
        assert_eq!(h.read_back(id).await, data);
    }

    #[tokio::test]
    async fn test_inline_put_ignores_asynchronous_mode() {
        let h = Harness::with_config(|c| c.asynchronous = true).await;
        let id = h.new_record("inline.bin", UserId(2)).await;
        let data = payload(64_000, 51);

        let outcome = h.service.put_data_inline(&data[..], id, false).await;
        assert!(matches!(outcome, JobOutcome::Done(())));
        assert_eq!(h.status(id).await, FileStatus::Ready);
        assert_eq!(h.service.pool().available(), h.service.pool().capacity());
        assert_eq!(h.metrics.job_count("put", "done"), 1);
    }
}
