//! Integration tests for database migrations and connection pooling.
//!
//! Each test creates a unique temporary database inside a shared
//! containerized PostgreSQL instance (via testcontainers), runs
//! migrations, and drops it on completion so tests are fully isolated and
//! idempotent.

use uuid::Uuid;

use marlin_meta::config::DbConfig;
use marlin_meta::pool;

use marlin_test_utils::{create_test_db, drop_test_db, pg_url};

/// Expected tables created by the initial migration.
const EXPECTED_TABLES: &[&str] = &["index_builds"];

#[tokio::test]
async fn migrations_create_all_tables() {
    let (temp_pool, db_name) = create_test_db().await;

    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' AND tablename NOT LIKE '\\_sqlx%' \
         ORDER BY tablename",
    )
    .fetch_all(&temp_pool)
    .await
    .expect("should list tables");

    let names: Vec<&str> = rows.iter().map(|(n,)| n.as_str()).collect();
    assert_eq!(names, EXPECTED_TABLES);

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (temp_pool, db_name) = create_test_db().await;

    // create_test_db already ran the migrations once; a second run must
    // be a no-op.
    pool::run_migrations(&temp_pool)
        .await
        .expect("second migration run should succeed");

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_creates_and_tolerates_existing() {
    let base_url = pg_url().await;
    let db_name = format!("marlin_ensure_{}", Uuid::new_v4().simple());
    let config = DbConfig::new(format!("{base_url}/{db_name}"));

    pool::ensure_database_exists(&config)
        .await
        .expect("first ensure should create the database");
    pool::ensure_database_exists(&config)
        .await
        .expect("second ensure should be a no-op");

    let pool = pool::create_pool(&config)
        .await
        .expect("pool should connect to the created database");
    pool::run_migrations(&pool)
        .await
        .expect("migrations should run on the created database");

    pool.close().await;
    drop_test_db(&db_name).await;
}
