//! Capture-file scanning and log-file queue draining.

use fetchqd::database::Database;
use fetchqd::models::Owner;
use fetchqd::reconciler;

async fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["logs", "temp", "data"] {
        std::fs::create_dir_all(dir.path().join(sub)).unwrap();
    }
    let db = Database::open_in_memory(dir.path()).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn capture_scan_counts_files_and_consumes_the_capture() {
    let (dir, db) = test_db().await;
    let owner = Owner::Url(1);

    let new_file = dir.path().join("data").join("new.jpg");
    let seen_file = dir.path().join("data").join("seen.jpg");
    std::fs::write(&new_file, b"a").unwrap();
    std::fs::write(&seen_file, b"b").unwrap();

    let capture = reconciler::capture_file_path(dir.path(), owner);
    std::fs::write(
        &capture,
        format!(
            "{}\n# {}\nsome progress message\n\n",
            new_file.display(),
            seen_file.display()
        ),
    )
    .unwrap();

    let (new_files, already_seen) = reconciler::process_capture_file(&db, owner).await.unwrap();
    assert_eq!(new_files, 1);
    assert_eq!(already_seen, 1);
    assert!(!capture.exists());

    let files = db.get_last_files(owner, 10).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.contains(&"data/new.jpg".to_string()));
    assert!(files.contains(&"data/seen.jpg".to_string()));
}

#[tokio::test]
async fn missing_capture_file_yields_zero_counts() {
    let (_dir, db) = test_db().await;
    let counts = reconciler::process_capture_file(&db, Owner::Url(99))
        .await
        .unwrap();
    assert_eq!(counts, (0, 0));
}

#[tokio::test]
async fn relative_capture_lines_resolve_against_the_data_directory() {
    let (dir, db) = test_db().await;
    let owner = Owner::Subscription(3);
    std::fs::write(dir.path().join("data").join("rel.png"), b"x").unwrap();

    let capture = reconciler::capture_file_path(dir.path(), owner);
    std::fs::write(&capture, "data/rel.png\n").unwrap();

    let (new_files, _) = reconciler::process_capture_file(&db, owner).await.unwrap();
    assert_eq!(new_files, 1);
}

#[tokio::test]
async fn startup_sweep_replays_orphaned_captures() {
    let (dir, db) = test_db().await;
    let file = dir.path().join("data").join("orphan.jpg");
    std::fs::write(&file, b"x").unwrap();

    let capture = reconciler::capture_file_path(dir.path(), Owner::Subscription(7));
    std::fs::write(&capture, format!("{}\n", file.display())).unwrap();
    // Junk in temp/ is left alone.
    std::fs::write(dir.path().join("temp").join("unrelated.txt"), b"x").unwrap();

    reconciler::sweep_leftover_captures(&db).await.unwrap();

    assert!(!capture.exists());
    assert!(dir.path().join("temp").join("unrelated.txt").exists());
    let files = db
        .get_last_files(Owner::Subscription(7), 10)
        .await
        .unwrap();
    assert_eq!(files, vec!["data/orphan.jpg".to_string()]);
}

#[tokio::test]
async fn log_drain_extracts_urls_into_the_known_url_cache() {
    let (dir, db) = test_db().await;
    let log = reconciler::log_file_path(dir.path(), Owner::Subscription(5));
    std::fs::write(
        &log,
        concat!(
            "[urllib3.connectionpool][debug] https://img.example.com:443 \"GET /full/pic.jpg HTTP/1.1\" 200\n",
            "Starting DownloadJob for 'https://example.com/gallery/1'\n",
            "unrelated noise line\n",
        ),
    )
    .unwrap();
    db.add_log_file_to_parse_queue(&log, "subscriptions")
        .await
        .unwrap();

    reconciler::parse_queued_log_files(&db).await.unwrap();

    assert!(db.get_queued_log_file().await.unwrap().is_none());
    let known = db
        .get_known_urls(&[
            "https://img.example.com/full/pic.jpg".to_string(),
            "https://example.com/gallery/1".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(known.len(), 2);
}

#[tokio::test]
async fn log_drain_drops_entries_for_missing_files() {
    let (dir, db) = test_db().await;
    let log = dir.path().join("logs").join("single-url-4-latest.txt");
    db.add_log_file_to_parse_queue(&log, "single-urls")
        .await
        .unwrap();

    reconciler::parse_queued_log_files(&db).await.unwrap();
    assert!(db.get_queued_log_file().await.unwrap().is_none());
}

#[tokio::test]
async fn rotate_appends_and_removes_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let latest = dir.path().join("latest.txt");
    let old = dir.path().join("old.txt");
    std::fs::write(&latest, "first run").unwrap();

    reconciler::rotate_file(&latest, &old).await.unwrap();
    assert!(!latest.exists());
    assert_eq!(std::fs::read_to_string(&old).unwrap(), "first run\n");

    std::fs::write(&latest, "second run\n").unwrap();
    reconciler::rotate_file(&latest, &old).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&old).unwrap(),
        "first run\nsecond run\n"
    );
}
