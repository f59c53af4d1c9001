//! `sessions_audit` table: append-only log of handshake-step outcomes
//! (`spec.md` §4.1 "All auth-step outcomes are written to an audit sink.").

use crate::database::Database;
use crate::schema::sessions_audit;
use async_trait::async_trait;
use diesel::prelude::*;
use model::persistence::{SessionAuditEntry, SessionAuditWrite};
use uuid::Uuid;

#[derive(Insertable)]
#[diesel(table_name = sessions_audit)]
struct NewSessionAuditRow {
    id: String,
    credential_id: String,
    step: String,
    status: Option<i32>,
    request_id: Option<String>,
    body_snippet: Option<String>,
    recorded_at: chrono::NaiveDateTime,
}

pub(crate) struct WorkerSessionAudit;

impl WorkerSessionAudit {
    fn record(
        connection: &mut SqliteConnection,
        entry: SessionAuditEntry,
    ) -> anyhow::Result<()> {
        let row = NewSessionAuditRow {
            id: Uuid::new_v4().to_string(),
            credential_id: entry.credential_id,
            step: entry.step.to_string(),
            status: entry.status.map(i32::from),
            request_id: entry.request_id,
            body_snippet: entry.body_snippet,
            recorded_at: entry.recorded_at.naive_utc(),
        };
        diesel::insert_into(sessions_audit::table)
            .values(&row)
            .execute(connection)?;
        Ok(())
    }
}

#[async_trait]
impl SessionAuditWrite for Database {
    async fn record_auth_step(&self, entry: SessionAuditEntry) -> anyhow::Result<()> {
        self.with_conn(move |conn| WorkerSessionAudit::record(conn, entry))
            .await
    }
}
