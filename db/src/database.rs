use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::{Arc, Mutex};

/// SQLite-backed implementation of every persistence port this workspace
/// needs (`model::persistence`), mirroring the teacher's single-connection
/// `Arc<Mutex<SqliteConnection>>` design rather than a pool: this process
/// has one writer (the Order & Position Service) and a handful of readers,
/// so pool contention was never a real concern (`spec.md` §5).
pub struct Database {
    pub(crate) connection: Arc<Mutex<SqliteConnection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &"Arc<Mutex<SqliteConnection>>")
            .finish()
    }
}

mod embedded {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations};
    pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
}

fn configure_connection(connection: &mut SqliteConnection) -> anyhow::Result<()> {
    diesel::sql_query("PRAGMA foreign_keys = ON;").execute(connection)?;
    Ok(())
}

impl Database {
    /// Open (and, for a new file, migrate) the database at `database_url`.
    pub fn new(database_url: &str) -> anyhow::Result<Self> {
        let db_exists = std::path::Path::new(database_url).exists();
        let mut connection = SqliteConnection::establish(database_url)?;

        if !db_exists {
            use diesel_migrations::MigrationHarness;
            connection
                .run_pending_migrations(embedded::MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("failed to run migrations on new database: {e}"))?;
        }
        configure_connection(&mut connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// An in-memory database, fully migrated, for tests.
    #[doc(hidden)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        use diesel_migrations::MigrationHarness;
        let mut connection = SqliteConnection::establish(":memory:")?;
        connection
            .run_pending_migrations(embedded::MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("failed to run migrations on in-memory database: {e}"))?;
        configure_connection(&mut connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run a blocking Diesel closure against the shared connection off the
    /// async runtime's worker threads, the bridge every trait impl in this
    /// crate uses to offer an `async fn` surface over a sync ORM.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| anyhow::anyhow!("database connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| anyhow::anyhow!("database worker task panicked: {e}"))?
    }
}
