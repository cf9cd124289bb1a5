//! Integration tests for the content cache

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hotload_cache::*;
use hotload_errors::{Error, StateError, StorageError};
use hotload_events::{AppEvent, CacheEvent, EventReceiver};
use hotload_hash::Hash;
use hotload_manifest::{LoadedManifest, Manifest, Module};
use hotload_types::{FileState, ManualClock};
use tempfile::TempDir;

const APP: &str = "red";

struct Fixture {
    _dir: TempDir,
    directory: PathBuf,
    clock: Arc<ManualClock>,
    cache: ContentCache,
}

async fn open(max_size_bytes: u64) -> Fixture {
    let dir = TempDir::new().unwrap();
    let directory = dir.path().join("cache");
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = ContentCache::builder(&directory)
        .max_size_bytes(max_size_bytes)
        .clock(clock.clone())
        .open()
        .await
        .unwrap();
    Fixture {
        _dir: dir,
        directory,
        clock,
        cache,
    }
}

fn entry_files(directory: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("entry-"))
        })
        .collect();
    files.sort();
    files
}

fn manifest_for(modules: &[(&str, &[u8])], fresh_at: i64) -> LoadedManifest {
    let mut builder = Manifest::builder();
    for (id, content) in modules {
        builder = builder.module(*id, Module::new(format!("{id}.bin"), Hash::from_data(content)));
    }
    LoadedManifest::from_manifest(builder.build().unwrap(), fresh_at).unwrap()
}

#[tokio::test]
async fn test_write_then_read() {
    let f = open(u64::MAX).await;
    let content = b"alpha module";
    let hash = Hash::from_data(content);

    let entry = f.cache.write(APP, &hash, content).await.unwrap().unwrap();
    assert_eq!(entry.sha256_hex, hash.to_hex());

    let stored = f.cache.entry(&hash).await.unwrap().unwrap();
    assert_eq!(stored.file_state, FileState::Ready);
    assert_eq!(stored.size_bytes, content.len() as i64);
    assert_eq!(entry_files(&f.directory), vec![f.directory.join(stored.file_name())]);

    assert_eq!(f.cache.read(&hash).await.unwrap().unwrap(), content);
    assert!(f.cache.is_pinned(APP, &hash).await.unwrap());
}

#[tokio::test]
async fn test_read_absent_is_miss() {
    let f = open(u64::MAX).await;
    assert!(f.cache.read(&Hash::from_data(b"nothing")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_touches_last_used() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"touch me");
    f.cache.write(APP, &hash, b"touch me").await.unwrap();

    f.clock.set(5_000);
    f.cache.read(&hash).await.unwrap().unwrap();
    let entry = f.cache.entry(&hash).await.unwrap().unwrap();
    assert_eq!(entry.last_used_at_epoch_ms, 5_000);
}

#[tokio::test]
async fn test_only_one_writer_per_hash() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"contended");

    let attempts = (0..8).map(|_| f.cache.open_for_write(APP, &hash, None));
    let results = futures::future::join_all(attempts).await;

    let winners = results
        .into_iter()
        .map(Result::unwrap)
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);

    let entry = f.cache.entry(&hash).await.unwrap().unwrap();
    assert_eq!(entry.file_state, FileState::Dirty);
    assert!(f.cache.read(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_write_to_ready_entry_is_skipped() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"once");
    assert!(f.cache.write(APP, &hash, b"once").await.unwrap().is_some());
    assert!(f.cache.write(APP, &hash, b"once").await.unwrap().is_none());
    assert_eq!(f.cache.count_files().await.unwrap(), 1);
}

#[tokio::test]
async fn test_set_ready_requires_dirty() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"twice");
    let entry = f.cache.open_for_write(APP, &hash, None).await.unwrap().unwrap();
    std::fs::write(f.directory.join(entry.file_name()), b"twice").unwrap();

    f.cache.set_ready(&entry, 5).await.unwrap();
    let err = f.cache.set_ready(&entry, 5).await.unwrap_err();
    assert!(matches!(
        err,
        Error::State(StateError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_get_or_put_downloads_once() {
    let f = open(u64::MAX).await;
    let content = b"downloaded".to_vec();
    let hash = Hash::from_data(&content);
    let downloads = AtomicUsize::new(0);

    for _ in 0..2 {
        let (downloads, body) = (&downloads, &content);
        let bytes = f
            .cache
            .get_or_put(APP, &hash, || async move {
                downloads.fetch_add(1, Ordering::SeqCst);
                Ok(body.clone())
            })
            .await
            .unwrap();
        assert_eq!(bytes, content);
    }

    assert_eq!(downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_put_rejects_wrong_content() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"expected");

    let err = f
        .cache
        .get_or_put(APP, &hash, || async { Ok(b"tampered".to_vec()) })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Storage(StorageError::HashMismatch { .. })
    ));
    assert!(err.is_integrity());
    assert_eq!(f.cache.count_files().await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_or_put_propagates_download_error() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"unreachable");
    let err = f
        .cache
        .get_or_put(APP, &hash, || async { Err(Error::internal("offline")) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert_eq!(f.cache.count_files().await.unwrap(), 0);
}

#[tokio::test]
async fn test_corrupt_file_is_evicted_on_read() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"pristine");
    let entry = f.cache.write(APP, &hash, b"pristine").await.unwrap().unwrap();

    std::fs::write(f.directory.join(entry.file_name()), b"bit rot").unwrap();

    assert!(f.cache.read(&hash).await.unwrap().is_none());
    assert!(f.cache.entry(&hash).await.unwrap().is_none());
    assert!(entry_files(&f.directory).is_empty());
    assert_eq!(f.cache.count_pins().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_file_is_evicted_on_read() {
    let f = open(u64::MAX).await;
    let hash = Hash::from_data(b"vanishing");
    let entry = f.cache.write(APP, &hash, b"vanishing").await.unwrap().unwrap();

    std::fs::remove_file(f.directory.join(entry.file_name())).unwrap();

    assert!(f.cache.read(&hash).await.unwrap().is_none());
    assert_eq!(f.cache.count_files().await.unwrap(), 0);
}

async fn open_with_faults() -> (Fixture, Arc<FaultInjectingFileSystem>, EventReceiver) {
    let dir = TempDir::new().unwrap();
    let directory = dir.path().join("cache");
    let clock = Arc::new(ManualClock::new(1_000));
    let file_system = Arc::new(FaultInjectingFileSystem::default());
    let (events, received) = hotload_events::channel();
    let cache = ContentCache::builder(&directory)
        .file_system(file_system.clone())
        .event_listener(Arc::new(events))
        .clock(clock.clone())
        .open()
        .await
        .unwrap();
    let fixture = Fixture {
        _dir: dir,
        directory,
        clock,
        cache,
    };
    (fixture, file_system, received)
}

#[tokio::test]
async fn test_unremovable_corrupt_file_keeps_its_row() {
    let (f, file_system, mut received) = open_with_faults().await;
    let hash = Hash::from_data(b"pristine");
    let entry = f.cache.write(APP, &hash, b"pristine").await.unwrap().unwrap();
    std::fs::write(f.directory.join(entry.file_name()), b"bit rot").unwrap();

    file_system.set_remove_error(Some(std::io::ErrorKind::PermissionDenied));
    assert!(f.cache.read(&hash).await.unwrap().is_none());
    assert!(f.cache.entry(&hash).await.unwrap().is_some());
    assert_eq!(entry_files(&f.directory).len(), 1);
    let reported = received.try_recv().unwrap();
    assert!(matches!(
        reported.event,
        AppEvent::Cache(CacheEvent::StorageFailed { .. })
    ));

    // Once the file can be removed the next read evicts it.
    file_system.set_remove_error(None);
    assert!(f.cache.read(&hash).await.unwrap().is_none());
    assert!(f.cache.entry(&hash).await.unwrap().is_none());
    assert!(entry_files(&f.directory).is_empty());
}

#[tokio::test]
async fn test_missing_file_row_is_dropped_when_remove_reports_not_found() {
    let (f, file_system, mut received) = open_with_faults().await;
    let loaded = manifest_for(&[("alpha", b"x".as_slice())], 1_000);
    f.cache.pin_manifest(APP, &loaded).await.unwrap();
    let entry = f
        .cache
        .entry(&Hash::from_data(&loaded.manifest_bytes))
        .await
        .unwrap()
        .unwrap();
    std::fs::remove_file(f.directory.join(entry.file_name())).unwrap();

    file_system.set_remove_error(Some(std::io::ErrorKind::NotFound));
    assert!(f.cache.get_pinned_manifest(APP).await.unwrap().is_none());
    assert_eq!(f.cache.count_files().await.unwrap(), 0);
    assert_eq!(f.cache.count_pins().await.unwrap(), 0);
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_prune_removes_least_recently_used_unpinned() {
    let f = open(10).await;
    let a = Hash::from_data(b"aaaa");
    let b = Hash::from_data(b"bbbb");
    let c = Hash::from_data(b"cccc");

    f.cache.write(APP, &a, b"aaaa").await.unwrap();
    f.clock.advance(1);
    f.cache.write(APP, &b, b"bbbb").await.unwrap();
    f.cache.unpin(APP, &a).await.unwrap();
    f.cache.unpin(APP, &b).await.unwrap();

    // a becomes most recently used, so b is the oldest.
    f.clock.advance(1);
    f.cache.read(&a).await.unwrap().unwrap();

    f.clock.advance(1);
    f.cache.write(APP, &c, b"cccc").await.unwrap();

    assert!(f.cache.entry(&a).await.unwrap().is_some());
    assert!(f.cache.entry(&b).await.unwrap().is_none());
    assert!(f.cache.entry(&c).await.unwrap().is_some());
    assert_eq!(f.cache.ready_bytes().await.unwrap(), 8);
    assert_eq!(entry_files(&f.directory).len(), 2);
}

#[tokio::test]
async fn test_pinned_entries_survive_prune_but_count() {
    let f = open(u64::MAX).await;
    let pinned = Hash::from_data(b"pinned!!");
    let loose = Hash::from_data(b"loose");
    f.cache.write(APP, &pinned, b"pinned!!").await.unwrap();
    f.cache.write("blue", &loose, b"loose").await.unwrap();
    f.cache.unpin("blue", &loose).await.unwrap();

    // pinned bytes alone exceed the budget, so the unpinned entry goes
    f.cache.prune_to(6).await.unwrap();

    assert!(f.cache.entry(&pinned).await.unwrap().is_some());
    assert!(f.cache.entry(&loose).await.unwrap().is_none());
    assert_eq!(f.cache.ready_bytes().await.unwrap(), 8);
}

#[tokio::test]
async fn test_oversized_entry_lives_until_unpinned() {
    let f = open(4).await;
    let big = Hash::from_data(b"much too large");

    f.cache.write(APP, &big, b"much too large").await.unwrap().unwrap();
    assert_eq!(f.cache.read(&big).await.unwrap().unwrap(), b"much too large");

    f.cache.unpin(APP, &big).await.unwrap();
    f.cache.prune().await.unwrap();
    assert!(f.cache.entry(&big).await.unwrap().is_none());
    assert!(entry_files(&f.directory).is_empty());
}

#[tokio::test]
async fn test_initialize_deletes_dirty_entries() {
    let dir = TempDir::new().unwrap();
    let directory = dir.path().join("cache");
    let hash = Hash::from_data(b"half written");

    {
        let cache = ContentCache::builder(&directory).open().await.unwrap();
        let entry = cache.open_for_write(APP, &hash, None).await.unwrap().unwrap();
        std::fs::write(directory.join(entry.file_name()), b"half").unwrap();
        cache.close().await;
    }

    let cache = ContentCache::builder(&directory).open().await.unwrap();
    assert_eq!(cache.count_files().await.unwrap(), 0);
    assert_eq!(cache.count_pins().await.unwrap(), 0);
    assert!(entry_files(&directory).is_empty());

    // the hash is writable again
    assert!(cache.write(APP, &hash, b"half written").await.unwrap().is_some());
}

#[tokio::test]
async fn test_initialize_prunes_to_new_budget() {
    let dir = TempDir::new().unwrap();
    let directory = dir.path().join("cache");
    let hash = Hash::from_data(b"0123456789");

    {
        let cache = ContentCache::builder(&directory).open().await.unwrap();
        cache.write(APP, &hash, b"0123456789").await.unwrap();
        cache.unpin(APP, &hash).await.unwrap();
        cache.close().await;
    }

    let cache = ContentCache::builder(&directory)
        .max_size_bytes(5)
        .open()
        .await
        .unwrap();
    assert_eq!(cache.count_files().await.unwrap(), 0);
}

#[tokio::test]
async fn test_database_name_must_end_in_db() {
    let dir = TempDir::new().unwrap();
    let err = ContentCache::builder(dir.path())
        .database_name("hotload.sqlite")
        .open()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidPath { .. })));
}

#[tokio::test]
async fn test_pin_manifest_replaces_application_pins() {
    let f = open(u64::MAX).await;
    let old_module: &[u8] = b"old module";
    let new_module: &[u8] = b"new module";
    f.cache.write(APP, &Hash::from_data(old_module), old_module).await.unwrap();
    f.cache.write(APP, &Hash::from_data(new_module), new_module).await.unwrap();

    let new_manifest = manifest_for(&[("alpha", new_module)], 2_000);
    f.cache.pin_manifest(APP, &new_manifest).await.unwrap();

    assert!(f.cache.is_pinned(APP, &Hash::from_data(new_module)).await.unwrap());
    assert!(!f.cache.is_pinned(APP, &Hash::from_data(old_module)).await.unwrap());
    assert!(f
        .cache
        .is_pinned(APP, &Hash::from_data(&new_manifest.manifest_bytes))
        .await
        .unwrap());

    let pinned = f.cache.get_pinned_manifest(APP).await.unwrap().unwrap();
    assert_eq!(pinned.manifest_bytes, new_manifest.manifest_bytes);
    assert_eq!(pinned.fresh_at_epoch_ms, 2_000);
    assert!(f.cache.get_pinned_manifest("blue").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unpin_manifest_falls_back_to_previous() {
    let f = open(u64::MAX).await;
    let v1: &[u8] = b"release one";
    let v2: &[u8] = b"release two";
    f.cache.write(APP, &Hash::from_data(v1), v1).await.unwrap();
    let good = manifest_for(&[("alpha", v1)], 1_000);
    f.cache.pin_manifest(APP, &good).await.unwrap();

    // A refresh stores v2 and its manifest, then fails.
    f.cache.write(APP, &Hash::from_data(v2), v2).await.unwrap();
    let failed = manifest_for(&[("alpha", v2)], 3_000);
    f.cache.update_manifest_fresh_at(APP, &failed).await.unwrap();
    f.cache.unpin_manifest(APP, &failed).await.unwrap();

    let pinned = f.cache.get_pinned_manifest(APP).await.unwrap().unwrap();
    assert_eq!(pinned.manifest_bytes, good.manifest_bytes);
    assert!(f.cache.is_pinned(APP, &Hash::from_data(v1)).await.unwrap());
    assert!(!f.cache.is_pinned(APP, &Hash::from_data(v2)).await.unwrap());
}

#[tokio::test]
async fn test_unpin_manifest_without_fallback_drops_all_pins() {
    let f = open(u64::MAX).await;
    let module: &[u8] = b"only release";
    f.cache.write(APP, &Hash::from_data(module), module).await.unwrap();
    let only = manifest_for(&[("alpha", module)], 1_000);

    f.cache.unpin_manifest(APP, &only).await.unwrap();

    assert_eq!(f.cache.count_pins().await.unwrap(), 0);
    assert!(f.cache.get_pinned_manifest(APP).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_manifest_fresh_at() {
    let f = open(u64::MAX).await;
    let module: &[u8] = b"fresh module";
    let loaded = manifest_for(&[("alpha", module)], 1_000);
    f.cache.pin_manifest(APP, &loaded).await.unwrap();

    let refreshed = LoadedManifest {
        fresh_at_epoch_ms: 9_000,
        ..loaded.clone()
    };
    f.cache.update_manifest_fresh_at(APP, &refreshed).await.unwrap();

    let pinned = f.cache.get_pinned_manifest(APP).await.unwrap().unwrap();
    assert_eq!(pinned.fresh_at_epoch_ms, 9_000);
}

#[tokio::test]
async fn test_corrupt_pinned_manifest_reads_as_absent() {
    let f = open(u64::MAX).await;
    let loaded = manifest_for(&[("alpha", b"x".as_slice())], 1_000);
    f.cache.pin_manifest(APP, &loaded).await.unwrap();

    let entry = f
        .cache
        .entry(&Hash::from_data(&loaded.manifest_bytes))
        .await
        .unwrap()
        .unwrap();
    std::fs::write(f.directory.join(entry.file_name()), b"{}").unwrap();

    assert!(f.cache.get_pinned_manifest(APP).await.unwrap().is_none());
    assert_eq!(f.cache.count_files().await.unwrap(), 0);
}
