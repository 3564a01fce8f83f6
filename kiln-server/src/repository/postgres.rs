//! PostgreSQL job registry
//!
//! Durable registry for deployments that must survive restarts. Every
//! read-modify-write runs in a transaction holding a row lock on the job, so
//! the merge rules in the parent module see a consistent view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    JobHandle, JobRegistry, PhaseChange, RegistryError, apply_handle, apply_phase, merge_events,
};
use kiln_core::domain::event::StatusEvent;
use kiln_core::domain::job::{Job, JobPhase};

const JOB_COLUMNS: &str = r#"
    id, upload_id, name, kind, phase, status_detail, entry_file, dependency_hints,
    resources, env, ttl_seconds, build_handle, exec_handle, session, created_at, updated_at
"#;

pub struct PgJobRegistry {
    pool: PgPool,
}

impl PgJobRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, RegistryError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::NotFound(id))?;

        Job::try_from(row)
    }
}

/// Loads a job and locks its row until the transaction ends
async fn fetch_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Job, RegistryError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
        JOB_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(RegistryError::NotFound(id))?;

    Job::try_from(row)
}

#[async_trait]
impl JobRegistry for PgJobRegistry {
    async fn create(&self, job: Job) -> Result<Job, RegistryError> {
        let ttl = job
            .ttl_seconds
            .map(i64::try_from)
            .transpose()
            .map_err(|_| RegistryError::Corrupt("ttl_seconds out of range".to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, upload_id, name, kind, phase, status_detail, entry_file,
                              dependency_hints, resources, env, ttl_seconds, build_handle,
                              exec_handle, session, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.upload_id)
        .bind(&job.name)
        .bind(job.kind.as_str())
        .bind(job.phase.as_str())
        .bind(&job.status_detail)
        .bind(&job.entry_file)
        .bind(job.dependency_hints.iter().cloned().collect::<Vec<String>>())
        .bind(Json(&job.resources))
        .bind(Json(&job.env))
        .bind(ttl)
        .bind(job.build_handle.as_ref().map(Json))
        .bind(job.exec_handle.as_ref().map(Json))
        .bind(job.session.as_ref().map(Json))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::Conflict(job.id));
        }

        tracing::info!("Job created: {} ({})", job.id, job.name);
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job, RegistryError> {
        self.fetch(id).await
    }

    async fn list_all(&self) -> Result<Vec<Job>, RegistryError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn upsert_phase(
        &self,
        id: Uuid,
        phase: JobPhase,
        detail: Option<String>,
    ) -> Result<Job, RegistryError> {
        let mut tx = self.pool.begin().await?;
        let mut job = fetch_for_update(&mut *tx, id).await?;

        if apply_phase(&mut job, phase, detail) != PhaseChange::Ignored {
            sqlx::query(
                r#"
                UPDATE jobs
                SET phase = $1, status_detail = $2, updated_at = $3
                WHERE id = $4
                "#,
            )
            .bind(job.phase.as_str())
            .bind(&job.status_detail)
            .bind(job.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn attach_handle(&self, id: Uuid, handle: JobHandle) -> Result<Job, RegistryError> {
        let mut tx = self.pool.begin().await?;
        let mut job = fetch_for_update(&mut *tx, id).await?;

        apply_handle(&mut job, handle);

        sqlx::query(
            r#"
            UPDATE jobs
            SET build_handle = $1, exec_handle = $2, session = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(job.build_handle.as_ref().map(Json))
        .bind(job.exec_handle.as_ref().map(Json))
        .bind(job.session.as_ref().map(Json))
        .bind(job.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn append_events(&self, id: Uuid, events: Vec<StatusEvent>) -> Result<usize, RegistryError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        // Row lock serializes concurrent appends for the same job.
        fetch_for_update(&mut *tx, id).await?;

        let existing = load_history(&mut *tx, id).await?;
        let accepted = merge_events(&existing, events);

        for event in &accepted {
            sqlx::query(
                r#"
                INSERT INTO job_events (job_id, timestamp, label, message)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(event.timestamp)
            .bind(event.label.as_str())
            .bind(&event.message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(accepted.len())
    }

    async fn history(&self, id: Uuid) -> Result<Vec<StatusEvent>, RegistryError> {
        let mut conn = self.pool.acquire().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(RegistryError::NotFound(id));
        }

        load_history(&mut *conn, id).await
    }
}

async fn load_history(conn: &mut PgConnection, id: Uuid) -> Result<Vec<StatusEvent>, RegistryError> {
    let rows: Vec<(DateTime<Utc>, String, String)> = sqlx::query_as(
        r#"
        SELECT timestamp, label, message
        FROM job_events
        WHERE job_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(id)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|(timestamp, label, message)| -> Result<StatusEvent, RegistryError> {
            Ok(StatusEvent {
                timestamp,
                label: label.parse().map_err(RegistryError::Corrupt)?,
                message,
            })
        })
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    upload_id: Uuid,
    name: String,
    kind: String,
    phase: String,
    status_detail: Option<String>,
    entry_file: String,
    dependency_hints: Vec<String>,
    resources: serde_json::Value,
    env: serde_json::Value,
    ttl_seconds: Option<i64>,
    build_handle: Option<serde_json::Value>,
    exec_handle: Option<serde_json::Value>,
    session: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn decode<T: DeserializeOwned>(column: &str, value: serde_json::Value) -> Result<T, RegistryError> {
    serde_json::from_value(value)
        .map_err(|e| RegistryError::Corrupt(format!("column {}: {}", column, e)))
}

fn decode_opt<T: DeserializeOwned>(
    column: &str,
    value: Option<serde_json::Value>,
) -> Result<Option<T>, RegistryError> {
    value.map(|v| decode(column, v)).transpose()
}

impl TryFrom<JobRow> for Job {
    type Error = RegistryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            upload_id: row.upload_id,
            name: row.name,
            kind: row.kind.parse().map_err(RegistryError::Corrupt)?,
            phase: row.phase.parse().map_err(RegistryError::Corrupt)?,
            status_detail: row.status_detail,
            entry_file: row.entry_file,
            dependency_hints: row.dependency_hints.into_iter().collect(),
            resources: decode("resources", row.resources)?,
            env: decode("env", row.env)?,
            ttl_seconds: row
                .ttl_seconds
                .map(u64::try_from)
                .transpose()
                .map_err(|_| RegistryError::Corrupt("negative ttl_seconds".to_string()))?,
            build_handle: decode_opt("build_handle", row.build_handle)?,
            exec_handle: decode_opt("exec_handle", row.exec_handle)?,
            session: decode_opt("session", row.session)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
