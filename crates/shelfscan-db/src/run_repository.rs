use chrono::{DateTime, Utc};
use shelfscan_core::error::AppError;
use shelfscan_core::job::{BatchRun, BatchSummary, Job, JobStatus};
use shelfscan_core::traits::RunArchive;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

const RUN_COLUMNS: &str =
    "id, label, total, succeeded, failed, skipped, cancelled, created, updated, started_at, finished_at";

/// Finished batch runs, kept after the orchestrator lets go of them.
#[derive(Clone)]
pub struct BatchRunRepository {
    pool: Pool<Postgres>,
}

impl BatchRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load an archived run with its jobs in submission order.
    pub async fn find(&self, run_id: Uuid) -> Result<Option<BatchRun>, AppError> {
        let Some(run) = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM batch_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?
        else {
            return Ok(None);
        };

        let jobs = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT idx, locator, status, platform, enqueued_at, started_at, finished_at,
                   error_message, product_id
            FROM batch_jobs
            WHERE run_id = $1
            ORDER BY idx
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(Some(BatchRun {
            id: run.id,
            label: run.label,
            jobs: jobs.into_iter().map(Into::into).collect(),
            cancelled: run.cancelled,
            completed_count: (run.succeeded + run.failed) as usize,
            succeeded: run.succeeded as usize,
            failed: run.failed as usize,
            created: run.created as usize,
            updated: run.updated as usize,
            started_at: run.started_at,
            finished_at: run.finished_at,
        }))
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    label: Option<String>,
    total: i32,
    succeeded: i32,
    failed: i32,
    skipped: i32,
    cancelled: bool,
    created: i32,
    updated: i32,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<RunRow> for BatchSummary {
    fn from(row: RunRow) -> Self {
        BatchSummary {
            run_id: row.id,
            label: row.label,
            total: row.total as usize,
            succeeded: row.succeeded as usize,
            failed: row.failed as usize,
            skipped: row.skipped as usize,
            cancelled: row.cancelled,
            created: row.created as usize,
            updated: row.updated as usize,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    idx: i32,
    locator: String,
    status: String,
    platform: Option<String>,
    enqueued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    product_id: Option<Uuid>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            index: row.idx as usize,
            locator: row.locator,
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            platform: row.platform,
            enqueued_at: row.enqueued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error_message,
            product_id: row.product_id,
        }
    }
}

// -- Trait implementation --

impl RunArchive for BatchRunRepository {
    async fn archive(&self, run: &BatchRun) -> Result<(), AppError> {
        let summary = run.summary();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO batch_runs (id, label, total, succeeded, failed, skipped, cancelled,
                                    created, updated, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET succeeded = EXCLUDED.succeeded,
                failed = EXCLUDED.failed,
                skipped = EXCLUDED.skipped,
                cancelled = EXCLUDED.cancelled,
                created = EXCLUDED.created,
                updated = EXCLUDED.updated,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(summary.run_id)
        .bind(&summary.label)
        .bind(summary.total as i32)
        .bind(summary.succeeded as i32)
        .bind(summary.failed as i32)
        .bind(summary.skipped as i32)
        .bind(summary.cancelled)
        .bind(summary.created as i32)
        .bind(summary.updated as i32)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM batch_jobs WHERE run_id = $1")
            .bind(run.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if !run.jobs.is_empty() {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO batch_jobs (run_id, idx, locator, status, platform, enqueued_at, \
                 started_at, finished_at, error_message, product_id) ",
            );
            qb.push_values(&run.jobs, |mut b, job| {
                b.push_bind(run.id)
                    .push_bind(job.index as i32)
                    .push_bind(&job.locator)
                    .push_bind(job.status.as_str())
                    .push_bind(&job.platform)
                    .push_bind(job.enqueued_at)
                    .push_bind(job.started_at)
                    .push_bind(job.finished_at)
                    .push_bind(&job.error)
                    .push_bind(job.product_id);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(run_id = %run.id, jobs = run.jobs.len(), "Batch run archived");
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<BatchSummary>, AppError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM batch_runs \
             ORDER BY finished_at DESC NULLS LAST, started_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
