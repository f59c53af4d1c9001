use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scheduled job (`spec.md` §3 "JobDefinition").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Stable identifier, also the handler registration key.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Five-field cron expression.
    pub cron: String,
    /// IANA time zone the cron expression is interpreted in, e.g.
    /// `America/New_York`.
    pub timezone: String,
    /// Whether the scheduler should dispatch this job at all.
    pub enabled: bool,
    /// Handler type tag, e.g. `"0dte-closer"`.
    pub job_type: String,
    /// Opaque per-job configuration (e.g. `{"skipMarketCheck": true}`).
    pub config: serde_json::Value,
}

/// Outcome of one run of a [`JobDefinition`]'s handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The handler completed its intended work.
    Success,
    /// The handler raised an error.
    Failed,
    /// The handler declined to act (e.g. market closed, already done today).
    Skipped,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobOutcome::Success => "success",
            JobOutcome::Failed => "failed",
            JobOutcome::Skipped => "skipped",
        })
    }
}

/// The structured result a job handler returns to the scheduler
/// (`spec.md` §4.4 `JobResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Whether the handler's intended action succeeded.
    pub success: bool,
    /// Set when the handler chose not to act this tick.
    pub skipped: bool,
    /// Why the handler skipped, or failed, when applicable.
    pub reason: Option<String>,
    /// Error message, when `success` is false and not merely skipped.
    pub error: Option<String>,
    /// Structured context for the audit trail (e.g. which trades closed).
    pub data: Option<serde_json::Value>,
}

impl JobResult {
    /// A successful, non-skipped result with no extra context.
    pub fn success() -> Self {
        Self {
            success: true,
            skipped: false,
            reason: None,
            error: None,
            data: None,
        }
    }

    /// A routine no-op tick; per `spec.md` §4.4 this may be elided rather
    /// than persisted as a durable [`JobRun`].
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            skipped: true,
            reason: Some(reason.into()),
            error: None,
            data: None,
        }
    }

    /// A failed run with an error message and optional structured context.
    pub fn failed(error: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            skipped: false,
            reason: None,
            error: Some(error.into()),
            data,
        }
    }

    /// True when this result should be written as a durable [`JobRun`]
    /// rather than aggregated away: anything other than a plain routine
    /// skip (`spec.md` §4.4 — "retains only significant events").
    pub fn is_durable(&self) -> bool {
        !self.success || !self.skipped
    }
}

/// A persisted record of one job execution (`spec.md` §3 "JobRun").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Which job this run belongs to.
    pub job_id: String,
    /// When the handler started.
    pub started_at: DateTime<Utc>,
    /// When the handler finished.
    pub ended_at: DateTime<Utc>,
    /// success/failed/skipped.
    pub outcome: JobOutcome,
    /// Human-readable reason, when present.
    pub reason: Option<String>,
    /// Structured context captured from the [`JobResult`].
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_skip_is_not_durable() {
        let result = JobResult::skipped("aggregated");
        assert!(!result.is_durable());
    }

    #[test]
    fn failure_is_durable() {
        let result = JobResult::failed("boom", None);
        assert!(result.is_durable());
    }

    #[test]
    fn explicit_non_aggregated_skip_is_durable() {
        let mut result = JobResult::skipped("exit alert");
        result.success = true;
        result.skipped = false;
        assert!(result.is_durable());
    }
}
