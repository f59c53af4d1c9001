//! The job-handler contract (`spec.md` §4.4 `registerJobHandler`).

use async_trait::async_trait;
use model::JobResult;

/// One registered handler, keyed by a stable id. Two [`model::JobDefinition`]
/// cron entries may share a handler id (the 0DTE closer's regular- and
/// early-close firings); the handler itself decides whether this particular
/// firing is the right one (`spec.md` §4.4).
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Stable identifier, matched against `JobDefinition.job_type`.
    fn id(&self) -> &str;

    /// Human-readable name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Run one tick. Implementations are responsible for their own
    /// idempotency check (`spec.md` §4.4 "the handler's responsibility").
    async fn execute(&self) -> JobResult;
}
