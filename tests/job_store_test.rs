//! Job store semantics: upserts, normalization, associations, missed
//! checks and the schema version guard.

use std::collections::HashMap;
use std::path::Path;

use fetchqd::database::{migrations, Database};
use fetchqd::models::*;
use fetchqd::utils::unix_time;

async fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["logs", "temp", "data"] {
        std::fs::create_dir_all(dir.path().join(sub)).unwrap();
    }
    let db = Database::open_in_memory(dir.path()).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

async fn add_sub(db: &Database, keywords: &str) -> i64 {
    let payload = SubscriptionUpsert {
        keywords: Some(keywords.to_string()),
        downloader: Some("testdl".to_string()),
        ..Default::default()
    };
    db.add_or_update_subscriptions(&[payload], &HashMap::new())
        .await
        .unwrap()[0]
}

#[tokio::test]
async fn upsert_with_id_touches_only_supplied_fields() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "artist1").await;

    db.add_or_update_subscriptions(
        &[SubscriptionUpsert {
            id: Some(id),
            priority: Some(7),
            ..Default::default()
        }],
        &HashMap::new(),
    )
    .await
    .unwrap();

    let sub = db.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.priority, 7);
    assert_eq!(sub.keywords, "artist1");
    assert_eq!(sub.downloader, "testdl");
}

#[tokio::test]
async fn insert_without_required_fields_is_skipped() {
    let (_dir, db) = test_db().await;
    let ids = db
        .add_or_update_subscriptions(
            &[SubscriptionUpsert {
                keywords: Some("no-downloader".to_string()),
                ..Default::default()
            }],
            &HashMap::new(),
        )
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn per_downloader_defaults_fill_missing_insert_fields() {
    let (_dir, db) = test_db().await;
    let mut defaults = HashMap::new();
    defaults.insert(
        "testdl".to_string(),
        fetchqd::config::SubscriptionDefaults {
            check_interval: Some(1234),
            abort_after: Some(5),
            ..Default::default()
        },
    );

    let ids = db
        .add_or_update_subscriptions(
            &[SubscriptionUpsert {
                keywords: Some("artist".to_string()),
                downloader: Some("testdl".to_string()),
                ..Default::default()
            }],
            &defaults,
        )
        .await
        .unwrap();

    let sub = db.get_subscription(ids[0]).await.unwrap().unwrap();
    assert_eq!(sub.check_interval, 1234);
    assert_eq!(sub.abort_after, 5);
}

#[tokio::test]
async fn queued_urls_are_normalized_on_insert_and_lookup() {
    let (_dir, db) = test_db().await;
    db.add_or_update_urls(&[QueuedUrlUpsert {
        url: Some("https://example.com/page#section".to_string()),
        ..Default::default()
    }])
    .await
    .unwrap();

    // A different fragment still hits the same normalized row.
    let rows = db
        .check_single_queue_for_url("https://example.com/page#other")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "https://example.com/page");
    assert_eq!(rows[0].status, URL_STATUS_PENDING);
}

#[tokio::test]
async fn list_selector_supports_ranges_and_archived_flag() {
    let (_dir, db) = test_db().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.extend(
            db.add_or_update_urls(&[QueuedUrlUpsert {
                url: Some(format!("https://example.com/{i}")),
                ..Default::default()
            }])
            .await
            .unwrap(),
        );
    }
    db.add_or_update_urls(&[QueuedUrlUpsert {
        id: Some(ids[1]),
        archived: Some(true),
        ..Default::default()
    }])
    .await
    .unwrap();

    let selector = ListSelector {
        from: Some(ids[0]),
        to: Some(ids[2]),
        ..Default::default()
    };
    let rows = db.get_queued_urls(&selector).await.unwrap();
    let got: Vec<i64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(got, vec![ids[0], ids[2]]);

    let selector = ListSelector {
        from: Some(ids[0]),
        to: Some(ids[2]),
        archived: true,
        ..Default::default()
    };
    assert_eq!(db.get_queued_urls(&selector).await.unwrap().len(), 3);
}

#[tokio::test]
async fn associate_additional_data_is_idempotent() {
    let (dir, db) = test_db().await;
    let id = add_sub(&db, "artist").await;
    let file = dir.path().join("data").join("pic.jpg");
    std::fs::write(&file, b"x").unwrap();

    db.associate_additional_data(&file, Owner::Subscription(id))
        .await
        .unwrap();
    db.associate_additional_data(&file, Owner::Subscription(id))
        .await
        .unwrap();

    assert_eq!(db.count_file_results().await.unwrap(), 1);
    let files = db.get_last_files(Owner::Subscription(id), 10).await.unwrap();
    assert_eq!(files, vec!["data/pic.jpg".to_string()]);
}

#[tokio::test]
async fn known_urls_dedup_across_both_caches() {
    let (_dir, db) = test_db().await;
    let urls = vec!["https://example.com/a".to_string()];
    db.add_known_urls(&urls, Some(Owner::Url(1))).await.unwrap();
    db.add_known_urls(&urls, Some(Owner::Url(1))).await.unwrap();

    let known = db.get_known_urls(&urls).await.unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].url, "https://example.com/a");
    assert_eq!(known[0].status, 0);

    let shared_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM known_urls")
        .fetch_one(db.shared_pool())
        .await
        .unwrap();
    assert_eq!(shared_rows, 1);
}

#[tokio::test]
async fn log_file_queue_round_trip() {
    let (dir, db) = test_db().await;
    let log = dir.path().join("logs").join("subscription-1-latest.txt");

    db.add_log_file_to_parse_queue(&log, "subscriptions")
        .await
        .unwrap();
    let queued = db.get_queued_log_file().await.unwrap();
    assert_eq!(queued.as_deref(), Some("logs/subscription-1-latest.txt"));

    db.remove_log_file_from_parse_queue(&log).await.unwrap();
    assert!(db.get_queued_log_file().await.unwrap().is_none());
}

#[tokio::test]
async fn successful_check_sets_both_check_times_failed_only_last() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "artist").await;
    let t1 = unix_time();

    db.update_subscription_check_times(id, t1, Some(t1))
        .await
        .unwrap();
    let sub = db.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.last_check, Some(t1));
    assert_eq!(sub.last_successful_check, Some(t1));
    assert!(!sub.in_error_state());

    let t2 = t1 + 100;
    db.update_subscription_check_times(id, t2, None).await.unwrap();
    let sub = db.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.last_check, Some(t2));
    assert_eq!(sub.last_successful_check, Some(t1));
    assert!(sub.in_error_state());
}

#[tokio::test]
async fn missed_check_provisional_row_lifecycle() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "artist").await;
    let sub = db.get_subscription(id).await.unwrap().unwrap();
    let now = unix_time();

    // Start of a run leaves a provisional in-progress row.
    let provisional = db.begin_missed_check(&sub, now).await.unwrap();
    let rows = db.get_missed_checks(Some(id), false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, MissedCheckReason::InProgress);

    // Success removes it.
    db.resolve_missed_check(provisional, true, 3, "ok").await.unwrap();
    assert!(db.get_missed_checks(Some(id), false).await.unwrap().is_empty());

    // Failure with new files converts it to a permanent record.
    let provisional = db.begin_missed_check(&sub, now).await.unwrap();
    db.resolve_missed_check(provisional, false, 2, "http error")
        .await
        .unwrap();
    let rows = db.get_missed_checks(Some(id), false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, MissedCheckReason::ErroredWithFiles);

    // Failure without files leaves nothing extra behind.
    let provisional = db.begin_missed_check(&sub, now).await.unwrap();
    db.resolve_missed_check(provisional, false, 0, "http error")
        .await
        .unwrap();
    assert_eq!(db.get_missed_checks(Some(id), false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_start_records_a_permanent_stale_row() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "artist").await;
    let now = unix_time();
    db.update_subscription_check_times(id, now - 86400 * 3, Some(now - 86400 * 3))
        .await
        .unwrap();
    let sub = db.get_subscription(id).await.unwrap().unwrap();

    let provisional = db.begin_missed_check(&sub, now).await.unwrap();
    db.resolve_missed_check(provisional, true, 0, "ok").await.unwrap();

    let rows = db.get_missed_checks(Some(id), false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, MissedCheckReason::Stale);
    assert!(rows[0].note.as_deref().unwrap().contains("late"));
}

#[tokio::test]
async fn archived_history_rows_are_excluded_by_default() {
    let (_dir, db) = test_db().await;
    let sub_id = add_sub(&db, "artist").await;
    let now = unix_time();

    let check_id = db
        .add_subscription_check(sub_id, 5, 0, now, now + 10, "ok")
        .await
        .unwrap();
    db.add_or_update_subscription_checks(&[SubscriptionCheckUpsert {
        id: Some(check_id),
        archived: Some(true),
        ..Default::default()
    }])
    .await
    .unwrap();
    assert!(db
        .get_subscription_checks(Some(sub_id), false)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        db.get_subscription_checks(Some(sub_id), true)
            .await
            .unwrap()
            .len(),
        1
    );

    db.add_or_update_missed_checks(&[MissedCheckUpsert {
        subscription_id: Some(sub_id),
        reason: Some(1),
        note: Some("manually recorded".to_string()),
        ..Default::default()
    }])
    .await
    .unwrap();
    let missed = db.get_missed_checks(Some(sub_id), false).await.unwrap();
    assert_eq!(missed.len(), 1);

    db.add_or_update_missed_checks(&[MissedCheckUpsert {
        id: Some(missed[0].id),
        archived: Some(true),
        ..Default::default()
    }])
    .await
    .unwrap();
    assert!(db.get_missed_checks(Some(sub_id), false).await.unwrap().is_empty());

    db.delete_subscription_checks(&[check_id]).await.unwrap();
    assert!(db
        .get_subscription_checks(Some(sub_id), true)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn reverse_lookup_insert_requires_exactly_one_source() {
    let (_dir, db) = test_db().await;

    let both = ReverseLookupJobUpsert {
        file_path: Some("a.jpg".to_string()),
        file_url: Some("https://example.com/a.jpg".to_string()),
        ..Default::default()
    };
    let neither = ReverseLookupJobUpsert::default();
    assert!(db
        .add_or_update_reverse_lookup_jobs(&[both, neither])
        .await
        .unwrap()
        .is_empty());

    let ok = ReverseLookupJobUpsert {
        file_url: Some("https://example.com/a.jpg".to_string()),
        ..Default::default()
    };
    let ids = db.add_or_update_reverse_lookup_jobs(&[ok]).await.unwrap();
    assert_eq!(ids.len(), 1);

    let due = db.get_due_reverse_lookup_jobs().await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].status, URL_STATUS_PENDING);
}

#[tokio::test]
async fn newer_stored_schema_version_is_fatal() {
    let (_dir, db) = test_db().await;
    sqlx::query("UPDATE version SET version = 999")
        .execute(db.pool())
        .await
        .unwrap();

    assert!(migrations::run(db.pool()).await.is_err());
}

#[tokio::test]
async fn relative_paths_are_stored_for_files_under_the_root() {
    let (dir, db) = test_db().await;
    assert_eq!(
        db.relative_to_root(&dir.path().join("data").join("f.png")),
        "data/f.png"
    );
    assert_eq!(db.relative_to_root(Path::new("/elsewhere/f.png")), "/elsewhere/f.png");
}
