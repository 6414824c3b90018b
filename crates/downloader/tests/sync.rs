mod common;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use common::{MockFile, MockHub};
use hfsync_downloader::{
    DownloadError, Downloader, DownloaderBuilder, Phase, RepositorySync, TransferReason,
    VerificationMethod,
};
use hfsync_manifest::ApiError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const REPO: &str = "org/model";
const LFS: &[u8] = b"This is the content of the LFS file.\n";
const REGULAR: &[u8] = b"This is a regular file.\n";

fn basic_files() -> Vec<MockFile> {
    vec![MockFile::large("lfs.bin", LFS), MockFile::regular("regular.txt", REGULAR)]
}

fn downloader(hub: &MockHub, dest: &Path) -> DownloaderBuilder {
    Downloader::builder(REPO)
        .base_url(hub.url.clone())
        .destination(dest)
        .retry(1, Duration::ZERO)
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn fresh_sync_downloads_every_file() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();

    let report = downloader(&hub, dest.path())
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.bytes_transferred, 61);

    let root = dest.path().join("org_model");
    assert_eq!(std::fs::read(root.join("lfs.bin")).unwrap(), LFS);
    assert_eq!(std::fs::read(root.join("regular.txt")).unwrap(), REGULAR);

    let methods: HashMap<_, _> = report.files.iter().map(|f| (f.path.as_str(), f.method)).collect();
    assert_eq!(methods["lfs.bin"], VerificationMethod::Hash);
    assert_eq!(methods["regular.txt"], VerificationMethod::SizeOnly);

    // Job scratch space is gone.
    let mut names: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, ["lfs.bin", "regular.txt"]);
}

#[tokio::test]
async fn second_run_transfers_nothing() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let d = downloader(&hub, dest.path()).build().unwrap();

    d.run(&cancel).await.unwrap();
    let fetched = hub.content_requests();

    let repository = d.fetch_repository().await.unwrap();
    let plan = d.build_plan(&repository, &cancel).await.unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.to_skip.len(), 2);
    assert!(plan.to_skip.iter().all(|s| s.reason == TransferReason::ValidSkip));
    assert_eq!(plan.total_skip_bytes, 61);
    assert_eq!(plan.total_transfer_bytes, 0);

    let report = d.run(&cancel).await.unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.skipped, 2);
    assert_eq!(hub.content_requests(), fetched);
}

#[tokio::test]
async fn corrupted_local_copy_is_replaced() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();
    let root = dest.path().join("org_model");
    std::fs::create_dir_all(&root).unwrap();
    // Same size, different bytes.
    std::fs::write(root.join("lfs.bin"), vec![b'x'; LFS.len()]).unwrap();
    std::fs::write(root.join("regular.txt"), REGULAR).unwrap();

    let cancel = CancellationToken::new();
    let d = downloader(&hub, dest.path()).build().unwrap();
    let repository = d.fetch_repository().await.unwrap();
    let plan = d.build_plan(&repository, &cancel).await.unwrap();
    assert_eq!(plan.to_transfer.len(), 1);
    assert_eq!(plan.to_transfer[0].file.path, "lfs.bin");
    assert_eq!(plan.to_transfer[0].reason, TransferReason::HashMismatch);

    let report = d.run(&cancel).await.unwrap();
    assert_eq!(report.files.len(), 1);
    assert_eq!(std::fs::read(root.join("lfs.bin")).unwrap(), LFS);
}

#[tokio::test]
async fn hash_check_can_be_skipped() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();
    let root = dest.path().join("org_model");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("lfs.bin"), vec![b'x'; LFS.len()]).unwrap();

    let cancel = CancellationToken::new();
    let d = downloader(&hub, dest.path()).skip_hash_check(true).build().unwrap();
    let repository = d.fetch_repository().await.unwrap();
    let plan = d.build_plan(&repository, &cancel).await.unwrap();

    let reasons: HashMap<_, _> = plan
        .to_transfer
        .iter()
        .chain(&plan.to_skip)
        .map(|d| (d.file.path.as_str(), d.reason))
        .collect();
    assert_eq!(reasons["lfs.bin"], TransferReason::ValidSkip);
    assert_eq!(reasons["regular.txt"], TransferReason::Missing);
}

#[tokio::test]
async fn bad_remote_hash_fails_only_that_file() {
    let files = vec![
        MockFile::large("lfs.bin", LFS).with_hash(&"0".repeat(64)),
        MockFile::regular("regular.txt", REGULAR),
    ];
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let err = downloader(&hub, dest.path())
        .retry(3, Duration::ZERO)
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    let DownloadError::Job(failure) = &err else {
        panic!("expected job failure, got {err:?}");
    };
    assert_eq!(failure.succeeded, 1);
    assert_eq!(failure.failed_paths().collect::<Vec<_>>(), ["lfs.bin"]);
    assert!(err.to_string().contains("lfs.bin"));

    let root = dest.path().join("org_model");
    assert!(!root.join("lfs.bin").exists());
    assert_eq!(std::fs::read(root.join("regular.txt")).unwrap(), REGULAR);
    // Verification failures are not retried.
    assert_eq!(hub.content_requests(), 2);
}

#[tokio::test]
async fn include_patterns_limit_the_job() {
    let mut files = basic_files();
    files.push(MockFile::regular("config.json", b"{}"));
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let report = downloader(&hub, dest.path())
        .include(["*.json"])
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].path, "config.json");
    assert_eq!(report.skipped, 2);

    let root = dest.path().join("org_model");
    assert!(root.join("config.json").exists());
    assert!(!root.join("lfs.bin").exists());
    assert!(!root.join("regular.txt").exists());
}

#[tokio::test]
async fn escaping_path_is_never_written() {
    let mut files = basic_files();
    files.push(MockFile::regular("../escape.txt", b"outside"));
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let d = downloader(&hub, dest.path()).build().unwrap();

    let repository = d.fetch_repository().await.unwrap();
    let plan = d.build_plan(&repository, &cancel).await.unwrap();
    let unsafe_skip = plan
        .to_skip
        .iter()
        .find(|s| s.file.path == "../escape.txt")
        .unwrap();
    assert_eq!(unsafe_skip.reason, TransferReason::UnsafePath);
    assert!(unsafe_skip.note.is_some());

    let report = d.run(&cancel).await.unwrap();
    assert_eq!(report.files.len(), 2);
    assert!(!dest.path().join("escape.txt").exists());
}

#[tokio::test]
async fn nested_directories_are_walked() {
    let files = vec![
        MockFile::regular("README.md", b"# model\n"),
        MockFile::regular("sub/dir/notes.txt", b"notes\n"),
        MockFile::large("sub/weights.bin", LFS),
    ];
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let report = downloader(&hub, dest.path())
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files.len(), 3);
    let root = dest.path().join("org_model");
    assert_eq!(std::fs::read(root.join("sub/dir/notes.txt")).unwrap(), b"notes\n");
    assert_eq!(std::fs::read(root.join("sub/weights.bin")).unwrap(), LFS);
}

#[tokio::test]
async fn multi_stream_matches_single_stream() {
    let content = patterned(2 * 1024 * 1024 + 123);
    let hub = MockHub::start(REPO, vec![MockFile::large("big.bin", &content)]).await;
    let cancel = CancellationToken::new();

    let split = TempDir::new().unwrap();
    let report = downloader(&hub, split.path())
        .connections(2)
        .build()
        .unwrap()
        .run(&cancel)
        .await
        .unwrap();
    assert!(report.files[0].multi_stream);
    assert_eq!(hub.range_requests(), 2);

    // Below connections * 1 MiB a single stream is used.
    let single = TempDir::new().unwrap();
    let report = downloader(&hub, single.path())
        .connections(8)
        .build()
        .unwrap()
        .run(&cancel)
        .await
        .unwrap();
    assert!(!report.files[0].multi_stream);
    assert_eq!(hub.range_requests(), 2);

    let a = std::fs::read(split.path().join("org_model/big.bin")).unwrap();
    let b = std::fs::read(single.path().join("org_model/big.bin")).unwrap();
    assert_eq!(a, content);
    assert_eq!(a, b);
}

#[tokio::test]
async fn failed_range_worker_aborts_only_that_file() {
    let files = vec![
        MockFile::large("big.bin", &patterned(2 * 1024 * 1024 + 5)).ignoring_range(),
        MockFile::regular("r.txt", REGULAR),
    ];
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let err = downloader(&hub, dest.path())
        .connections(2)
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    let DownloadError::Job(failure) = &err else {
        panic!("expected job failure, got {err:?}");
    };
    assert_eq!(failure.succeeded, 1);
    assert_eq!(failure.failed_paths().collect::<Vec<_>>(), ["big.bin"]);
    assert!(matches!(
        &failure.failures[0].error,
        DownloadError::Chunk { source, .. }
            if matches!(**source, DownloadError::RangeNotSupported { status: 200 })
    ));

    // Neither the file nor its chunk scratch space is left behind.
    let root = dest.path().join("org_model");
    let names: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, ["r.txt"]);
    assert_eq!(std::fs::read(root.join("r.txt")).unwrap(), REGULAR);
}

#[tokio::test]
async fn progress_is_monotonic_per_file() {
    let mut files = basic_files();
    files.push(MockFile::large("big.bin", &patterned(3 * 1024 * 1024)));
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let d = downloader(&hub, dest.path())
        .connections(3)
        .progress_channel(10_000)
        .build()
        .unwrap();
    let mut rx = d.progress().unwrap();
    d.run(&CancellationToken::new()).await.unwrap();
    drop(d);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let mut last: HashMap<String, u64> = HashMap::new();
    for event in events.iter().filter(|e| e.phase == Phase::Transferring) {
        assert!(event.bytes_so_far <= event.total_bytes);
        let prev = last.insert(event.file_path.clone(), event.bytes_so_far).unwrap_or(0);
        assert!(event.bytes_so_far >= prev, "{} went backwards", event.file_path);
    }

    for path in ["lfs.bin", "regular.txt", "big.bin"] {
        let done = events
            .iter()
            .find(|e| e.file_path == path && e.phase == Phase::Done)
            .unwrap();
        assert_eq!(done.bytes_so_far, done.total_bytes);
    }
    assert!(
        events
            .iter()
            .any(|e| e.file_path == "lfs.bin" && e.phase == Phase::Verified)
    );
    assert!(
        !events
            .iter()
            .any(|e| e.file_path == "regular.txt" && e.phase == Phase::Verified)
    );
}

#[tokio::test]
async fn unauthorized_is_fatal() {
    let hub = MockHub::unauthorized(REPO).await;
    let dest = TempDir::new().unwrap();

    let err = downloader(&hub, dest.path())
        .retry(3, Duration::ZERO)
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Api(ApiError::Authentication)));
    assert_eq!(hub.requests(), 1);
}

#[tokio::test]
async fn force_transfers_valid_files_again() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    downloader(&hub, dest.path()).build().unwrap().run(&cancel).await.unwrap();

    let d = downloader(&hub, dest.path()).force(true).build().unwrap();
    let repository = d.fetch_repository().await.unwrap();
    let plan = d.build_plan(&repository, &cancel).await.unwrap();
    assert!(plan.to_skip.is_empty());
    assert!(plan.to_transfer.iter().all(|t| t.reason == TransferReason::Forced));

    let report = d.run(&cancel).await.unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.bytes_transferred, 61);
}

#[tokio::test]
async fn tree_layout_nests_by_owner() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();

    downloader(&hub, dest.path())
        .tree_layout(true)
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert!(dest.path().join("org/model/lfs.bin").exists());
    assert!(!dest.path().join("org_model").exists());
}

#[tokio::test]
async fn stalled_body_hits_idle_timeout() {
    let files = vec![
        MockFile::regular("slow.txt", &patterned(1000)).stalling(),
        MockFile::regular("regular.txt", REGULAR),
    ];
    let hub = MockHub::start(REPO, files).await;
    let dest = TempDir::new().unwrap();

    let err = downloader(&hub, dest.path())
        .idle_timeout(Duration::from_millis(500))
        .build()
        .unwrap()
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    let DownloadError::Job(failure) = err else {
        panic!("expected job failure");
    };
    assert_eq!(failure.succeeded, 1);
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.failures[0].path, "slow.txt");
    assert!(matches!(failure.failures[0].error, DownloadError::IdleTimeout(_)));
}

#[tokio::test]
async fn cancelled_job_stops() {
    let hub = MockHub::start(REPO, basic_files()).await;
    let dest = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = downloader(&hub, dest.path())
        .build()
        .unwrap()
        .run(&cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Cancelled));
    assert_eq!(hub.requests(), 0);
}
