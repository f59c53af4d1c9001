//! `jobs` and `job_runs` tables (`spec.md` §3, §4.4, §8).

use crate::database::Database;
use crate::error::{ConversionError, IntoDomainModel};
use crate::schema::{job_runs, jobs};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use diesel::prelude::*;
use model::job::{JobDefinition, JobOutcome, JobRun};
use model::persistence::{JobRunRead, JobRunWrite};
use uuid::Uuid;

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = jobs)]
struct JobSQLite {
    id: String,
    name: String,
    cron: String,
    timezone: String,
    enabled: bool,
    job_type: String,
    config: String,
}

impl TryFrom<&JobDefinition> for JobSQLite {
    type Error = ConversionError;

    fn try_from(job: &JobDefinition) -> Result<Self, Self::Error> {
        Ok(Self {
            id: job.id.clone(),
            name: job.name.clone(),
            cron: job.cron.clone(),
            timezone: job.timezone.clone(),
            enabled: job.enabled,
            job_type: job.job_type.clone(),
            config: job.config.to_string(),
        })
    }
}

impl IntoDomainModel<JobDefinition> for JobSQLite {
    fn into_domain_model(self) -> Result<JobDefinition, ConversionError> {
        Ok(JobDefinition {
            id: self.id,
            name: self.name,
            cron: self.cron,
            timezone: self.timezone,
            enabled: self.enabled,
            job_type: self.job_type,
            config: serde_json::from_str(&self.config)
                .map_err(|e| ConversionError::new("config", e.to_string()))?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = job_runs)]
struct NewJobRunRow {
    id: String,
    job_id: String,
    started_at: chrono::NaiveDateTime,
    ended_at: chrono::NaiveDateTime,
    outcome: String,
    reason: Option<String>,
    data: Option<String>,
}

fn outcome_to_str(outcome: JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Success => "success",
        JobOutcome::Failed => "failed",
        JobOutcome::Skipped => "skipped",
    }
}

pub(crate) struct WorkerJob;

impl WorkerJob {
    fn ensure(connection: &mut SqliteConnection, job: &JobDefinition) -> anyhow::Result<()> {
        let row = JobSQLite::try_from(job)?;
        diesel::insert_into(jobs::table)
            .values(&row)
            .on_conflict(jobs::id)
            .do_update()
            .set(&row)
            .execute(connection)?;
        Ok(())
    }

    fn list_enabled(connection: &mut SqliteConnection) -> anyhow::Result<Vec<JobDefinition>> {
        let rows = jobs::table
            .filter(jobs::enabled.eq(true))
            .load::<JobSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }

    fn record_run(connection: &mut SqliteConnection, run: &JobRun) -> anyhow::Result<()> {
        let data = run
            .data
            .as_ref()
            .map(|v| v.to_string());
        let row = NewJobRunRow {
            id: Uuid::new_v4().to_string(),
            job_id: run.job_id.clone(),
            started_at: run.started_at.naive_utc(),
            ended_at: run.ended_at.naive_utc(),
            outcome: outcome_to_str(run.outcome).to_string(),
            reason: run.reason.clone(),
            data,
        };
        diesel::insert_into(job_runs::table)
            .values(&row)
            .execute(connection)?;
        Ok(())
    }

    fn has_run_this_minute(
        connection: &mut SqliteConnection,
        job_id: &str,
        minute: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        use diesel::dsl::count_star;
        let floor = minute
            .naive_utc()
            .date()
            .and_hms_opt(minute.naive_utc().time().hour(), minute.naive_utc().time().minute(), 0)
            .unwrap_or(minute.naive_utc());
        let ceiling = floor + chrono::Duration::minutes(1);
        let n: i64 = job_runs::table
            .filter(job_runs::job_id.eq(job_id))
            .filter(job_runs::started_at.ge(floor))
            .filter(job_runs::started_at.lt(ceiling))
            .select(count_star())
            .first(connection)?;
        Ok(n > 0)
    }
}

#[async_trait]
impl JobRunRead for Database {
    async fn list_enabled_jobs(&self) -> anyhow::Result<Vec<JobDefinition>> {
        self.with_conn(WorkerJob::list_enabled).await
    }

    async fn has_run_this_minute(&self, job_id: &str, minute: DateTime<Utc>) -> anyhow::Result<bool> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| WorkerJob::has_run_this_minute(conn, &job_id, minute))
            .await
    }
}

#[async_trait]
impl JobRunWrite for Database {
    async fn ensure_job(&self, job: &JobDefinition) -> anyhow::Result<()> {
        let job = job.clone();
        self.with_conn(move |conn| WorkerJob::ensure(conn, &job)).await
    }

    async fn record_job_run(&self, run: &JobRun) -> anyhow::Result<()> {
        let run = run.clone();
        self.with_conn(move |conn| WorkerJob::record_run(conn, &run)).await
    }
}
