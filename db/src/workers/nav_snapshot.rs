//! `nav_snapshots` table: unique on `(date, snapshot_type, user_id)`
//! (`spec.md` §6); upserts in place.

use crate::database::Database;
use crate::schema::nav_snapshots;
use async_trait::async_trait;
use diesel::prelude::*;
use model::nav_snapshot::{NavSnapshot, SnapshotType};
use model::persistence::NavSnapshotWrite;
use uuid::Uuid;

#[derive(Insertable)]
#[diesel(table_name = nav_snapshots)]
struct NewNavSnapshotRow {
    id: String,
    date: chrono::NaiveDate,
    snapshot_type: String,
    nav: String,
    user_id: String,
}

fn snapshot_type_to_str(kind: SnapshotType) -> &'static str {
    match kind {
        SnapshotType::Opening => "opening",
        SnapshotType::Closing => "closing",
    }
}

pub(crate) struct WorkerNavSnapshot;

impl WorkerNavSnapshot {
    fn upsert(connection: &mut SqliteConnection, snapshot: &NavSnapshot) -> anyhow::Result<()> {
        let existing_id: Option<String> = nav_snapshots::table
            .filter(nav_snapshots::date.eq(snapshot.date))
            .filter(nav_snapshots::snapshot_type.eq(snapshot_type_to_str(snapshot.snapshot_type)))
            .filter(nav_snapshots::user_id.eq(&snapshot.user_id))
            .select(nav_snapshots::id)
            .first(connection)
            .optional()?;

        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let row = NewNavSnapshotRow {
            id: id.clone(),
            date: snapshot.date,
            snapshot_type: snapshot_type_to_str(snapshot.snapshot_type).to_string(),
            nav: snapshot.nav.to_string(),
            user_id: snapshot.user_id.clone(),
        };

        diesel::replace_into(nav_snapshots::table)
            .values(&row)
            .execute(connection)?;
        Ok(())
    }
}

#[async_trait]
impl NavSnapshotWrite for Database {
    async fn upsert_nav_snapshot(&self, snapshot: &NavSnapshot) -> anyhow::Result<()> {
        let snapshot = snapshot.clone();
        self.with_conn(move |conn| WorkerNavSnapshot::upsert(conn, &snapshot)).await
    }
}
