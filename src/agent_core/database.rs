//! SQLite database shared by the call-record, comment, and conversation stores.
//!
//! Uses `rusqlite` through an `r2d2` pool so tool handlers running for
//! different conversations can write concurrently. WAL mode is enabled on
//! every pooled connection.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use super::errors::AgentError;

/// Type alias for the connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a checked-out connection.
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Milliseconds a writer waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u32 = 5_000;

// ─── Database ───────────────────────────────────────────────────────────────

/// Pooled SQLite handle. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct AgentDatabase {
    pool: DbPool,
}

impl AgentDatabase {
    /// Open (or create) the agent database at the given path.
    pub fn open(path: &str, pool_size: u32) -> Result<Self, AgentError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode=WAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout={BUSY_TIMEOUT_MS};"
            ))
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let db = Self { pool };
        db.create_tables()?;
        Ok(db)
    }

    /// In-memory database with a single pooled connection (tests, embedders).
    ///
    /// Every in-memory connection is a separate database, so the pool is
    /// capped at one connection to keep a single shared schema.
    pub fn open_in_memory() -> Result<Self, AgentError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.create_tables()?;
        Ok(db)
    }

    /// Check out a connection from the pool.
    pub fn get_conn(&self) -> Result<DbConn, r2d2::Error> {
        self.pool.get()
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), AgentError> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS function_calls (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                call_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '{}',
                result TEXT,
                error TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_function_calls_latest
                ON function_calls(tool_name, actor_id, project_id, created_at);

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                doc_version INTEGER NOT NULL,
                doc_sha1 TEXT NOT NULL,
                quote_position INTEGER NOT NULL,
                quote_text TEXT NOT NULL,
                comment TEXT NOT NULL,
                importance TEXT NOT NULL,
                doc_path TEXT NOT NULL,
                section TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'no_action',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comments_project
                ON comments(actor_id, project_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                language_model TEXT NOT NULL,
                model_history TEXT NOT NULL DEFAULT '[]',
                user_history TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_actor
                ON conversations(actor_id, project_id, updated_at);
            ",
        )?;
        Ok(())
    }
}

/// Current wall-clock time as Unix milliseconds, the storage format of all
/// timestamp columns.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a stored millisecond timestamp back to a `DateTime<Utc>`.
pub fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &AgentDatabase) -> Vec<String> {
        let conn = db.get_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_in_memory_creates_tables() {
        let db = AgentDatabase::open_in_memory().unwrap();
        let names = table_names(&db);
        assert!(names.contains(&"function_calls".to_string()));
        assert!(names.contains(&"comments".to_string()));
        assert!(names.contains(&"conversations".to_string()));
    }

    #[test]
    fn test_file_database_shares_schema_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        let db = AgentDatabase::open(path.to_str().unwrap(), 4).unwrap();

        // Two simultaneously checked-out connections see the same tables.
        let a = db.get_conn().unwrap();
        let b = db.get_conn().unwrap();
        a.execute(
            "INSERT INTO conversations (id, actor_id, project_id, title, language_model,
                                        created_at, updated_at)
             VALUES ('c1', 'u1', 'p1', 'New Conversation', 'gpt-5', 0, 0)",
            [],
        )
        .unwrap();
        let count: i64 = b
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        AgentDatabase::open(path.to_str().unwrap(), 2).unwrap();
        let db = AgentDatabase::open(path.to_str().unwrap(), 2).unwrap();
        assert_eq!(table_names(&db).len(), 3);
    }

    #[test]
    fn test_millis_round_trip() {
        let now = now_millis();
        assert_eq!(from_millis(now).timestamp_millis(), now);
    }
}
