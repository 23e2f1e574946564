use std::sync::Arc;

use burrow_core::{LinkRecord, LinkRepository, ShortCode};
use burrow_storage::MySqlRepository;
use burrow_tasks::{run_once, ArchiveExpiredLinks, ArchiveSettings, ManualClock};
use burrow_test_infra::mysql::MySqlServer;
use jiff::Timestamp;

async fn count(pool: &sqlx::MySqlPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM `{table}`"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

fn ts(value: &str) -> Timestamp {
    value.parse().unwrap()
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn scheduled_archive_moves_expired_links() {
    let mysql = MySqlServer::start().await.expect("start mysql");
    let pool = mysql
        .pool_with_schema(include_str!("../../burrow-storage/ddl/mysql/short_links.sql"))
        .await
        .expect("mysql pool");

    let repo = Arc::new(MySqlRepository::new(pool.clone()));
    for (id, code, expires_at) in [
        (1, "gone-one", "2025-01-01T00:00:00Z"),
        (2, "gone-two", "2025-01-05T00:00:00Z"),
        (3, "gone-three", "2025-01-10T00:00:00Z"),
        (4, "still-here", "2025-03-01T00:00:00Z"),
    ] {
        let record = LinkRecord::new(
            ShortCode::new_unchecked(code),
            "https://example.com",
            ts("2024-12-01T00:00:00Z"),
            ts(expires_at),
        )
        .with_id(id);
        repo.insert(&record).await.unwrap();
    }

    let task = Arc::new(ArchiveExpiredLinks::with_clock(
        Arc::clone(&repo),
        ArchiveSettings::default(),
        ManualClock::new(ts("2025-01-15T12:00:00Z")),
    ));

    run_once(task.clone()).await.unwrap();

    assert_eq!(count(&pool, "short_links").await, 1);
    assert_eq!(count(&pool, "short_links_history_2501").await, 3);

    // A second run finds nothing left to move.
    let report = task.archive().await.unwrap();
    assert_eq!(report.moved, 0);
    assert_eq!(count(&pool, "short_links_history_2501").await, 3);
}
