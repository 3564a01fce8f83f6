use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            upload_id UUID NOT NULL,
            name VARCHAR(255) NOT NULL,
            kind VARCHAR(20) NOT NULL,
            phase VARCHAR(20) NOT NULL,
            status_detail TEXT,
            entry_file TEXT NOT NULL,
            dependency_hints TEXT[] NOT NULL DEFAULT '{}',
            resources JSONB NOT NULL,
            env JSONB NOT NULL DEFAULT '{}',
            ttl_seconds BIGINT,
            build_handle JSONB,
            exec_handle JSONB,
            session JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // History is append-only; the unique key makes replays harmless.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_events (
            seq BIGSERIAL PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            timestamp TIMESTAMPTZ NOT NULL,
            label VARCHAR(20) NOT NULL,
            message TEXT NOT NULL,
            UNIQUE (job_id, timestamp, label, message)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_phase ON jobs(phase)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_events_job_id ON job_events(job_id, seq)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
