//! End-to-end backup and restore scenarios

use chunkvault_core::{
    BackupOptions, BlobStore, CancelToken, FsBlobStore, FsMetadataStore, InputError,
    MemoryBlobStore, MemoryMetadataStore, MetadataStore, Pipeline, PipelineConfig, PipelineError,
    RestoreOptions,
};
use chunkvault_files::tree_hash::{compute_merkle_root, compute_tree_hash};
use chunkvault_files::{
    ChunkDigest, FileChunker, FileSource, IntegrityTree, MembershipFilter, hash_chunk,
};
use chunkvault_integration_tests::{FlakyBlobStore, pipeline_with, sample_data};
use std::sync::Arc;
use tempfile::TempDir;

const CHUNK: usize = 512 * 1024;

#[test]
fn test_split_1_300_000_bytes() {
    let data = sample_data(1_300_000, 1);
    let chunks = FileChunker::new().split(&data, "video.mp4");

    let sizes: Vec<usize> = chunks.iter().map(|c| c.size()).collect();
    assert_eq!(sizes, vec![524_288, 524_288, 251_424]);
    assert!(chunks.iter().all(|c| c.total_chunks() == 3));

    let leaves: Vec<ChunkDigest> = chunks.iter().map(|c| hash_chunk(c.data())).collect();
    let tree = IntegrityTree::build(leaves).unwrap();
    assert_eq!(tree.leaf_count(), 3);
}

#[test]
fn test_tree_pads_odd_level_with_itself() {
    let leaves: Vec<ChunkDigest> = (0u8..5).map(|i| hash_chunk(&[i])).collect();
    let pair = |a: &ChunkDigest, b: &ChunkDigest| {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(a.as_bytes());
        buf.extend_from_slice(b.as_bytes());
        hash_chunk(&buf)
    };

    let l1 = [
        pair(&leaves[0], &leaves[1]),
        pair(&leaves[2], &leaves[3]),
        pair(&leaves[4], &leaves[4]),
    ];
    let l2 = [pair(&l1[0], &l1[1]), pair(&l1[2], &l1[2])];
    let expected = pair(&l2[0], &l2[1]);

    assert_eq!(compute_merkle_root(&leaves).unwrap(), expected);
    assert_eq!(compute_merkle_root(&leaves[..1]).unwrap(), leaves[0]);
    assert!(compute_merkle_root(&[]).is_err());
}

#[tokio::test]
async fn test_filesystem_roundtrip() {
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(FsBlobStore::open(dir.path().join("blobs")).await.unwrap());
    let manifests = FsMetadataStore::open(dir.path().join("manifests")).await.unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default(), blobs.clone()).unwrap();

    let path = dir.path().join("video.mp4");
    let data = sample_data(1_300_000, 2);
    std::fs::write(&path, &data).unwrap();
    let source = FileSource::open(&path).unwrap();

    let stored = pipeline
        .backup_and_record(
            &manifests,
            &source,
            "video.mp4",
            "video/mp4",
            BackupOptions::default()
                .with_owner("alice")
                .with_caption("holiday"),
        )
        .await
        .unwrap();

    assert_eq!(stored.manifest.chunk_count, 3);
    assert_eq!(stored.manifest.owner_id.as_deref(), Some("alice"));
    assert_eq!(
        compute_tree_hash(&path, CHUNK).unwrap().root(),
        stored.manifest.root_hash
    );

    let listed = manifests.list_manifests(Some("alice")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], stored);

    let fetched = manifests.get_manifest(&stored.id).await.unwrap().unwrap();
    let restored = pipeline
        .restore_file(&fetched.manifest, blobs.as_ref())
        .await
        .unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn test_out_of_order_chunks_reconstruct() {
    let store = Arc::new(MemoryBlobStore::new());
    let pipeline = pipeline_with(store, CHUNK);
    let data = sample_data(1_300_000, 3);
    let manifest = pipeline
        .backup_file(data.as_slice(), "a.bin", "application/octet-stream")
        .await
        .unwrap();

    let mut chunks = FileChunker::new().split(&data, "a.bin");
    let first = chunks.remove(0);
    chunks.push(first);
    chunks.swap(0, 1);
    let order: Vec<u64> = chunks.iter().map(|c| c.index()).collect();
    assert_eq!(order, vec![2, 0, 1]);

    let restored = pipeline.restore_from_chunks(&manifest, chunks).unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn test_missing_chunk_reports_incomplete() {
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
    let pipeline = Pipeline::new(PipelineConfig::default(), blobs.clone()).unwrap();
    let data = sample_data(1_300_000, 4);
    let manifest = pipeline.backup_file(data.as_slice(), "a", "x").await.unwrap();

    std::fs::remove_file(blobs.blob_path(&manifest.chunk_digests[1])).unwrap();

    match pipeline.restore_file(&manifest, blobs.as_ref()).await {
        Err(PipelineError::IncompleteData { file_name, missing }) => {
            assert_eq!(file_name, "a");
            assert_eq!(missing, vec![1]);
        }
        other => panic!("expected incomplete data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_altered_chunk_reports_integrity_error() {
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
    let pipeline = Pipeline::new(PipelineConfig::default(), blobs.clone()).unwrap();
    let data = sample_data(1_300_000, 5);
    let manifest = pipeline.backup_file(data.as_slice(), "a", "x").await.unwrap();

    let blob = blobs.blob_path(&manifest.chunk_digests[0]);
    let mut bytes = std::fs::read(&blob).unwrap();
    bytes[100] ^= 0x01;
    std::fs::write(&blob, bytes).unwrap();

    let err = pipeline
        .restore_file(&manifest, blobs.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Integrity { .. }));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_persistently_failing_chunk_is_reported() {
    let store = Arc::new(FlakyBlobStore::new());
    let pipeline = pipeline_with(store.clone(), 64 * 1024);
    let data = sample_data(64 * 1024 * 4, 6);
    let broken = hash_chunk(&data[2 * 64 * 1024..3 * 64 * 1024]);
    store.fail_puts(broken, u32::MAX);

    let err = pipeline
        .backup_file(data.as_slice(), "doc", "x")
        .await
        .unwrap_err();

    match err {
        PipelineError::UploadFailed {
            failed_chunk_indices,
            ..
        } => assert_eq!(failed_chunk_indices, vec![2]),
        other => panic!("expected upload failure, got {other:?}"),
    }
    assert_eq!(store.put_attempts(&broken), 3);
    assert_eq!(store.inner().len(), 3);
}

#[tokio::test]
async fn test_transient_failures_recovered() {
    let store = Arc::new(FlakyBlobStore::new());
    let pipeline = pipeline_with(store.clone(), 64 * 1024);
    let data = sample_data(64 * 1024 * 3, 7);
    let digests: Vec<ChunkDigest> = data.chunks(64 * 1024).map(hash_chunk).collect();
    store.fail_puts(digests[0], 2);
    store.fail_gets(digests[1], 2);

    let manifest = pipeline.backup_file(data.as_slice(), "doc", "x").await.unwrap();
    assert_eq!(store.put_attempts(&digests[0]), 3);

    let restored = pipeline
        .restore_file(&manifest, store.as_ref())
        .await
        .unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn test_shared_chunks_deduplicated_across_files() {
    let store = Arc::new(MemoryBlobStore::new());
    let pipeline = pipeline_with(store.clone(), 64 * 1024);

    let common = sample_data(64 * 1024 * 3, 8);
    let mut first = common.clone();
    first.extend(sample_data(64 * 1024, 9));
    let mut second = common;
    second.extend(sample_data(1000, 10));

    pipeline.backup_file(first.as_slice(), "first", "x").await.unwrap();
    let puts = store.put_count();
    let manifest = pipeline.backup_file(second.as_slice(), "second", "x").await.unwrap();

    assert_eq!(store.put_count() - puts, 1);
    assert_eq!(store.len(), 5);
    assert_eq!(
        pipeline.restore_file(&manifest, store.as_ref()).await.unwrap(),
        second
    );
}

#[tokio::test]
async fn test_independent_files_in_parallel() {
    let store = Arc::new(MemoryBlobStore::new());
    let pipeline = Arc::new(pipeline_with(store.clone(), 32 * 1024));

    let files: Vec<Vec<u8>> = (0..4).map(|i| sample_data(200_000 + i * 777, 20 + i as u64)).collect();
    let mut tasks = tokio::task::JoinSet::new();
    for (i, data) in files.iter().cloned().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            let manifest = pipeline
                .backup_file(data.as_slice(), &format!("file-{i}"), "x")
                .await
                .unwrap();
            (i, manifest)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, manifest) = joined.unwrap();
        let restored = pipeline.restore_file(&manifest, store.as_ref()).await.unwrap();
        assert_eq!(restored, files[i]);
    }
    assert_eq!(pipeline.session().stats().snapshot().files_backed_up, 4);
}

#[tokio::test]
async fn test_batch_restore_continues_past_failures() {
    let store = Arc::new(MemoryBlobStore::new());
    let metadata = MemoryMetadataStore::new();
    let pipeline = pipeline_with(store.clone(), 16 * 1024);

    let mut expected = Vec::new();
    for i in 0..3u64 {
        let data = sample_data(40_000, 30 + i);
        let stored = pipeline
            .backup_and_record(
                &metadata,
                data.as_slice(),
                &format!("f{i}"),
                "x",
                BackupOptions::default().with_owner("bob"),
            )
            .await
            .unwrap();
        expected.push((stored, data));
    }
    pipeline
        .backup_and_record(
            &metadata,
            sample_data(100, 99).as_slice(),
            "other",
            "x",
            BackupOptions::default().with_owner("carol"),
        )
        .await
        .unwrap();

    // Chunk missing from f0, chunk altered in f1, f2 intact.
    store.remove(&expected[0].0.manifest.chunk_digests[2]);
    store.overwrite(&expected[1].0.manifest.chunk_digests[0], vec![0; 16 * 1024]);

    let report = pipeline
        .restore_all(&metadata, Some("bob"), store.as_ref())
        .await
        .unwrap();

    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.restored[0].file_name, "f2");
    assert_eq!(report.restored[0].data, expected[2].1);

    assert_eq!(report.failed.len(), 2);
    for failure in &report.failed {
        match (failure.file_name.as_str(), &failure.error) {
            ("f0", PipelineError::IncompleteData { missing, .. }) => assert_eq!(missing, &vec![2]),
            ("f1", PipelineError::Integrity { .. }) => {}
            (name, error) => panic!("unexpected failure for {name}: {error}"),
        }
    }
}

#[tokio::test]
async fn test_empty_file_rejected_without_side_effects() {
    let store = Arc::new(MemoryBlobStore::new());
    let metadata = MemoryMetadataStore::new();
    let pipeline = pipeline_with(store.clone(), CHUNK);

    let empty: &[u8] = &[];
    let err = pipeline
        .backup_and_record(&metadata, empty, "empty", "x", BackupOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Input(InputError::EmptyFile(_))));
    assert!(!err.is_transient());
    assert!(store.is_empty());
    assert_eq!(metadata.len().await, 0);
}

#[tokio::test]
async fn test_cancelled_restore() {
    let store = Arc::new(MemoryBlobStore::new());
    let pipeline = pipeline_with(store.clone(), CHUNK);
    let data = sample_data(1_300_000, 11);
    let manifest = pipeline.backup_file(data.as_slice(), "a", "x").await.unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let options = RestoreOptions {
        progress: None,
        cancel: Some(cancel),
    };

    assert!(matches!(
        pipeline.restore_file_with(&manifest, store.as_ref(), &options).await,
        Err(PipelineError::Cancelled)
    ));
}

#[tokio::test]
async fn test_filter_false_positive_rate_at_double_load() {
    let filter = MembershipFilter::new(10_000, 3).unwrap();
    for i in 0u64..20_000 {
        filter.add(&hash_chunk(&i.to_le_bytes()));
    }

    for i in 0u64..20_000 {
        assert!(filter.might_contain(&hash_chunk(&i.to_le_bytes())));
    }

    let trials = 20_000u64;
    let false_positives = (0..trials)
        .filter(|i| filter.might_contain(&hash_chunk(&(i + 1_000_000).to_le_bytes())))
        .count();
    let rate = false_positives as f64 / trials as f64;
    assert!(rate <= 0.05, "false positive rate {rate}");
}

#[tokio::test]
async fn test_dedup_confirms_with_store() {
    // A filter hit for a chunk the store lost must still upload it.
    let store = Arc::new(MemoryBlobStore::new());
    let pipeline = pipeline_with(store.clone(), 64 * 1024);
    let data = sample_data(64 * 1024 * 2, 12);

    let manifest = pipeline.backup_file(data.as_slice(), "a", "x").await.unwrap();
    store.remove(&manifest.chunk_digests[0]);
    assert!(pipeline.session().filter().might_contain(&manifest.chunk_digests[0]));

    pipeline.backup_file(data.as_slice(), "a", "x").await.unwrap();
    assert!(store.exists(&manifest.chunk_digests[0]).await.unwrap());
    assert_eq!(pipeline.session().stats().snapshot().false_positives, 1);
    assert_eq!(
        pipeline.restore_file(&manifest, store.as_ref()).await.unwrap(),
        data
    );
}
