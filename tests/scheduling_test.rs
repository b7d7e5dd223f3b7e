//! Due-selection ordering for the subscription queue.

use std::collections::HashMap;

use fetchqd::database::subscriptions::MIN_RECHECK_FLOOR_SECS;
use fetchqd::database::Database;
use fetchqd::models::SubscriptionUpsert;
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

async fn add_sub(db: &Database, keywords: &str, interval: i64, priority: i64) -> i64 {
    let payload = SubscriptionUpsert {
        keywords: Some(keywords.to_string()),
        downloader: Some("testdl".to_string()),
        check_interval: Some(interval),
        priority: Some(priority),
        ..Default::default()
    };
    db.add_or_update_subscriptions(&[payload], &HashMap::new())
        .await
        .unwrap()[0]
}

#[tokio::test]
async fn new_subscription_is_due_immediately() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "fresh", 3600, 0).await;

    let due = db.get_due_subscriptions(unix_time()).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, id);
}

#[tokio::test]
async fn paused_subscriptions_are_never_due() {
    let (_dir, db) = test_db().await;
    let id = add_sub(&db, "sleepy", 3600, 0).await;
    db.add_or_update_subscriptions(
        &[SubscriptionUpsert {
            id: Some(id),
            paused: Some(true),
            ..Default::default()
        }],
        &HashMap::new(),
    )
    .await
    .unwrap();

    let due = db.get_due_subscriptions(unix_time()).await.unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn healthy_group_precedes_errored_regardless_of_priority() {
    let (_dir, db) = test_db().await;
    let now = unix_time();

    // Healthy with low priority: last check succeeded, interval elapsed.
    let healthy = add_sub(&db, "healthy", 3600, 0).await;
    db.update_subscription_check_times(healthy, now - 7200, Some(now - 7200))
        .await
        .unwrap();

    // Errored with high priority: last check failed.
    let errored = add_sub(&db, "errored", 3600, 100).await;
    db.update_subscription_check_times(errored, now - 7200, None)
        .await
        .unwrap();

    let due = db.get_due_subscriptions(now).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].id, healthy);
    assert_eq!(due[1].id, errored);
}

#[tokio::test]
async fn recheck_floor_applies_to_both_groups() {
    let (_dir, db) = test_db().await;
    let now = unix_time();

    // Healthy with a tiny interval, attempted half a floor ago: the
    // interval has elapsed but the floor has not.
    let healthy = add_sub(&db, "tiny-interval", 10, 0).await;
    db.update_subscription_check_times(healthy, now - 30, Some(now - 30))
        .await
        .unwrap();

    // Errored, attempted half a floor ago.
    let errored = add_sub(&db, "recently-failed", 3600, 0).await;
    db.update_subscription_check_times(errored, now - 30, None)
        .await
        .unwrap();

    assert!(db.get_due_subscriptions(now).await.unwrap().is_empty());

    // Both become due once the floor has passed.
    let later = now + MIN_RECHECK_FLOOR_SECS;
    let due = db.get_due_subscriptions(later).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].id, healthy);
    assert_eq!(due[1].id, errored);
}

#[tokio::test]
async fn interval_not_elapsed_means_not_due() {
    let (_dir, db) = test_db().await;
    let now = unix_time();

    let id = add_sub(&db, "on-schedule", 3600, 0).await;
    db.update_subscription_check_times(id, now - 600, Some(now - 600))
        .await
        .unwrap();

    assert!(db.get_due_subscriptions(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn within_group_priority_desc_then_oldest_attempt_first() {
    let (_dir, db) = test_db().await;
    let now = unix_time();

    let low_old = add_sub(&db, "low-old", 3600, 1).await;
    db.update_subscription_check_times(low_old, now - 9000, Some(now - 9000))
        .await
        .unwrap();

    let low_newer = add_sub(&db, "low-newer", 3600, 1).await;
    db.update_subscription_check_times(low_newer, now - 8000, Some(now - 8000))
        .await
        .unwrap();

    let high = add_sub(&db, "high", 3600, 5).await;
    db.update_subscription_check_times(high, now - 7200, Some(now - 7200))
        .await
        .unwrap();

    let due = db.get_due_subscriptions(now).await.unwrap();
    let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![high, low_old, low_newer]);
}

#[tokio::test]
async fn never_checked_subscriptions_sort_before_checked_ones() {
    let (_dir, db) = test_db().await;
    let now = unix_time();

    let checked = add_sub(&db, "checked", 3600, 0).await;
    db.update_subscription_check_times(checked, now - 7200, Some(now - 7200))
        .await
        .unwrap();

    let fresh = add_sub(&db, "fresh", 3600, 0).await;

    let due = db.get_due_subscriptions(now).await.unwrap();
    let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![fresh, checked]);
}
