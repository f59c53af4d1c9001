//! The job dispatcher (`spec.md` §4.4): `registerJobHandler`/`ensureJob`,
//! minute-granularity cron dispatch per declared IANA time zone, and a
//! per-handler-id mutex so a job never overlaps itself.

use chrono::Utc;
use model::job::{JobDefinition, JobRun};
use model::persistence::{JobRunRead, JobRunWrite};
use model::JobOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{info, warn};

use crate::handler::JobHandler;

/// Failure modes this crate's public contract can surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The underlying cron scheduler failed to build or accept a job.
    #[error("cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),
    /// `ensureJob` referenced a handler id with no registered handler.
    #[error("no handler registered for job type {0:?}")]
    UnknownHandler(String),
}

/// Persistence port this crate needs: both halves of the `jobs`/`job_runs`
/// tables. A blanket impl lets any type implementing both traits serve here.
pub trait JobRunStore: JobRunRead + JobRunWrite {}
impl<T: JobRunRead + JobRunWrite> JobRunStore for T {}

/// The C4 Job Scheduler: owns the cron engine, the handler registry, and the
/// per-handler-id serialization lock.
pub struct Scheduler {
    cron: JobScheduler,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    run_locks: HashMap<String, Arc<Mutex<()>>>,
    job_run: Arc<dyn JobRunStore>,
}

impl Scheduler {
    /// Build a scheduler backed by `job_run` for the `jobs`/`job_runs`
    /// tables. Does not start dispatching until [`Scheduler::start`].
    pub async fn new(job_run: Arc<dyn JobRunStore>) -> Result<Self, SchedulerError> {
        Ok(Self {
            cron: JobScheduler::new().await?,
            handlers: HashMap::new(),
            run_locks: HashMap::new(),
            job_run,
        })
    }

    /// `registerJobHandler` — associate a handler id with its execution
    /// logic. Must be called before the matching `ensureJob`.
    pub fn register_job_handler(&mut self, handler: Arc<dyn JobHandler>) {
        let id = handler.id().to_string();
        self.run_locks.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(())));
        self.handlers.insert(id, handler);
    }

    /// `ensureJob` — upsert the job definition, then, if enabled, schedule
    /// its cron trigger against the declared IANA time zone.
    pub async fn ensure_job(&mut self, definition: JobDefinition) -> Result<(), SchedulerError> {
        let handler = self
            .handlers
            .get(&definition.job_type)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownHandler(definition.job_type.clone()))?;

        if let Err(err) = self.job_run.ensure_job(&definition).await {
            warn!(job_id = %definition.id, error = %err, "failed to persist job definition");
        }

        if !definition.enabled {
            return Ok(());
        }

        let job_run = self.job_run.clone();
        let lock = self
            .run_locks
            .get(&definition.job_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())));
        let job_id = definition.id.clone();
        let timezone = definition.timezone.clone();
        let six_field_cron = six_field_cron(&definition.cron);

        let tz: chrono_tz::Tz = timezone
            .parse()
            .unwrap_or(chrono_tz::America::New_York);

        let cron_job = Job::new_async_tz(six_field_cron.as_str(), tz, move |_uuid, _l| {
            let handler = handler.clone();
            let job_run = job_run.clone();
            let lock = lock.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                run_one_tick(handler, job_run, lock, job_id).await;
            })
        })?;

        self.cron.add(cron_job).await?;
        Ok(())
    }

    /// Start the cron engine's internal dispatch loop.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        self.cron.start().await?;
        info!(jobs = self.handlers.len(), "scheduler started");
        Ok(())
    }

    /// Stop the cron engine, letting in-flight handler executions finish.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.cron.shutdown().await?;
        Ok(())
    }
}

/// One cron firing: enforce the at-most-once-per-minute property
/// (`spec.md` §8), serialize against any other firing for the same handler
/// id, run the handler, and persist only durable results (`spec.md` §4.4).
async fn run_one_tick(handler: Arc<dyn JobHandler>, job_run: Arc<dyn JobRunStore>, lock: Arc<Mutex<()>>, job_id: String) {
    let _guard = lock.lock().await;
    let minute = truncate_to_minute(Utc::now());

    match job_run.has_run_this_minute(&job_id, minute).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            warn!(job_id, error = %err, "failed to check job-run idempotency, running anyway");
        }
    }

    let started_at = Utc::now();
    let result = handler.execute().await;
    let ended_at = Utc::now();

    if !result.is_durable() {
        return;
    }

    let outcome = if !result.success {
        JobOutcome::Failed
    } else if result.skipped {
        JobOutcome::Skipped
    } else {
        JobOutcome::Success
    };

    let run = JobRun {
        job_id: job_id.clone(),
        started_at,
        ended_at,
        outcome,
        reason: result.reason.or(result.error),
        data: result.data,
    };

    if let Err(err) = job_run.record_job_run(&run).await {
        warn!(job_id, error = %err, "failed to persist job run");
    }
}

fn truncate_to_minute(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let secs = now.timestamp() - now.timestamp().rem_euclid(60);
    chrono::DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

/// `tokio-cron-scheduler` requires a leading seconds field; this crate's
/// `JobDefinition.cron` follows `spec.md`'s five-field form (minute hour day
/// month weekday), so prepend `"0 "` to pin seconds to zero.
fn six_field_cron(five_field: &str) -> String {
    format!("0 {five_field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_seconds_field() {
        assert_eq!(six_field_cron("55 15 * * 1-5"), "0 55 15 * * 1-5");
    }

    #[test]
    fn minute_truncation_drops_seconds() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-03-02T15:07:42Z").unwrap().with_timezone(&Utc);
        let truncated = truncate_to_minute(now);
        assert_eq!(truncated.format("%H:%M:%S").to_string(), "15:07:00");
    }
}
