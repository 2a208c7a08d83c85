use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::StorageBackend;
use crate::error::{Result, SitesmithError};
use crate::model::*;

/// SQLite-backed storage for users, projects, versions, conversations and
/// credit purchases.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks.  All blocking SQLite calls go through
/// [`with_conn`](Self::with_conn) which runs them on the Tokio blocking
/// thread-pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

const PROJECT_COLUMNS: &str = "p.id, p.user_id, p.name, p.initial_prompt, p.current_code, \
     p.current_version_index, p.is_published, p.created_at, p.updated_at";

impl SqliteStorage {
    /// Open (or create) a file-backed SQLite database at `path`.
    ///
    /// Sets WAL journal mode and enables foreign keys, then creates all
    /// tables and indexes if they don't already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SitesmithError::Storage(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(&path)
            .map_err(|e| SitesmithError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SitesmithError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── helpers ────────────────────────────────────────────────────────

    /// Shared initialisation: pragmas + table creation.
    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| SitesmithError::Storage(format!("failed to set WAL mode: {e}")))?;

        // Versions and messages cascade with their project.
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| SitesmithError::Storage(format!("failed to enable foreign keys: {e}")))?;

        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| SitesmithError::Storage(format!("failed to set busy timeout: {e}")))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        Ok(storage)
    }

    /// Create all tables and indexes (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SitesmithError::Storage(format!("failed to acquire database lock: {e}")))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
                total_creation INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                initial_prompt TEXT NOT NULL,
                current_code TEXT,
                current_version_index TEXT NOT NULL DEFAULT '',
                is_published INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                code TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                credits INTEGER NOT NULL,
                is_paid INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_projects_user_id ON projects(user_id, updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_projects_published ON projects(is_published, updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_versions_project_id ON versions(project_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_project_id ON messages(project_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions(user_id);
            ",
        )
        .map_err(|e| SitesmithError::Storage(format!("failed to create tables: {e}")))?;

        Ok(())
    }

    /// Run a blocking closure against the SQLite connection on the Tokio
    /// blocking thread-pool.  Every trait method goes through here.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                SitesmithError::Storage(format!("failed to acquire database lock: {e}"))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| SitesmithError::Storage(format!("task join error: {e}")))?
    }
}

// ── row mapping ────────────────────────────────────────────────────────

/// Fixed-width so lexical order matches chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        credits: row.get(3)?,
        total_creation: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: uuid_col(row, 0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        initial_prompt: row.get(3)?,
        current_code: row.get(4)?,
        current_version_index: row.get(5)?,
        is_published: row.get(6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        id: uuid_col(row, 0)?,
        project_id: uuid_col(row, 1)?,
        code: row.get(2)?,
        description: row.get(3)?,
        timestamp: ts_col(row, 4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = role
        .parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;
    Ok(Message {
        id: uuid_col(row, 0)?,
        project_id: uuid_col(row, 1)?,
        role,
        content: row.get(3)?,
        timestamp: ts_col(row, 4)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: uuid_col(row, 0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        amount: row.get(3)?,
        credits: row.get(4)?,
        is_paid: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

fn select_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, plan_id, amount, credits, is_paid, created_at
             FROM transactions WHERE id = ?1",
            params![id],
            transaction_from_row,
        )
        .optional()?)
}

fn current_balance(conn: &Connection, user_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT credits FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?)
}

impl StorageBackend for SqliteStorage {
    // -- Users & sessions --

    async fn save_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, credits, total_creation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email",
                params![
                    user.id,
                    user.name,
                    user.email,
                    user.credits,
                    user.total_creation,
                    ts(&user.created_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, email, credits, total_creation, created_at
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| SitesmithError::NotFound(format!("user {id}")))
        })
        .await
    }

    async fn debit_credits(&self, user_id: &str, amount: i64, count_creation: bool) -> Result<i64> {
        let user_id = user_id.to_string();
        let creation = i64::from(count_creation);
        self.with_conn(move |conn| {
            let balance: Option<i64> = conn
                .query_row(
                    "UPDATE users
                     SET credits = credits - ?2, total_creation = total_creation + ?3
                     WHERE id = ?1 AND credits >= ?2
                     RETURNING credits",
                    params![user_id, amount, creation],
                    |row| row.get(0),
                )
                .optional()?;

            match balance {
                Some(b) => Ok(b),
                None => match current_balance(conn, &user_id)? {
                    Some(available) => Err(SitesmithError::InsufficientCredits {
                        needed: amount,
                        available,
                    }),
                    None => Err(SitesmithError::NotFound(format!("user {user_id}"))),
                },
            }
        })
        .await
    }

    async fn add_credits(&self, user_id: &str, amount: i64) -> Result<i64> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "UPDATE users SET credits = credits + ?2 WHERE id = ?1 RETURNING credits",
                params![user_id, amount],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| SitesmithError::NotFound(format!("user {user_id}")))
        })
        .await
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![session.token, session.user_id, ts(&session.expires_at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<String>> {
        let token = token.to_string();
        let now = ts(&Utc::now());
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                    params![token, now],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    // -- Projects --

    async fn create_project(&self, project: &Project) -> Result<()> {
        let p = project.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, user_id, name, initial_prompt, current_code,
                    current_version_index, is_published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    p.id.to_string(),
                    p.user_id,
                    p.name,
                    p.initial_prompt,
                    p.current_code,
                    p.current_version_index,
                    p.is_published,
                    ts(&p.created_at),
                    ts(&p.updated_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_project(&self, id: Uuid) -> Result<Project> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?1"),
                params![id.to_string()],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| SitesmithError::NotFound(format!("project {id}")))
        })
        .await
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects p
                 WHERE p.user_id = ?1
                 ORDER BY p.updated_at DESC, p.rowid DESC"
            ))?;
            let rows = stmt
                .query_map(params![user_id], project_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_published(&self) -> Result<Vec<PublishedProject>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS}, COALESCE(u.name, '')
                 FROM projects p LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.is_published = 1
                   AND p.current_code IS NOT NULL AND p.current_code != ''
                 ORDER BY p.updated_at DESC, p.rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    let project = project_from_row(row)?;
                    let name: String = row.get(9)?;
                    Ok(PublishedProject {
                        user: ProjectOwner {
                            id: project.user_id.clone(),
                            name,
                        },
                        project,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn set_current_code(&self, project_id: Uuid, code: &str, version_index: &str) -> Result<()> {
        let code = code.to_string();
        let version_index = version_index.to_string();
        let now = ts(&Utc::now());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE projects
                 SET current_code = ?2, current_version_index = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![project_id.to_string(), code, version_index, now],
            )?;
            if changed == 0 {
                return Err(SitesmithError::NotFound(format!("project {project_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn toggle_published(&self, project_id: Uuid, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let now = ts(&Utc::now());
        self.with_conn(move |conn| {
            conn.query_row(
                "UPDATE projects SET is_published = NOT is_published, updated_at = ?3
                 WHERE id = ?1 AND user_id = ?2
                 RETURNING is_published",
                params![project_id.to_string(), user_id, now],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| SitesmithError::NotFound(format!("project {project_id}")))
        })
        .await
    }

    async fn delete_project(&self, id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            let changed =
                conn.execute("DELETE FROM projects WHERE id = ?1", params![id.to_string()])?;
            if changed == 0 {
                return Err(SitesmithError::NotFound(format!("project {id}")));
            }
            Ok(())
        })
        .await
    }

    // -- Versions --

    async fn commit_version(&self, version: &Version) -> Result<()> {
        let v = version.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO versions (id, project_id, code, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    v.id.to_string(),
                    v.project_id.to_string(),
                    v.code,
                    v.description,
                    ts(&v.timestamp)
                ],
            )?;
            let changed = tx.execute(
                "UPDATE projects
                 SET current_code = ?2, current_version_index = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    v.project_id.to_string(),
                    v.code,
                    v.id.to_string(),
                    ts(&Utc::now())
                ],
            )?;
            if changed == 0 {
                return Err(SitesmithError::NotFound(format!("project {}", v.project_id)));
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_versions(&self, project_id: Uuid) -> Result<Vec<Version>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, code, description, created_at
                 FROM versions WHERE project_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id.to_string()], version_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_version(&self, id: Uuid) -> Result<Version> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, project_id, code, description, created_at
                 FROM versions WHERE id = ?1",
                params![id.to_string()],
                version_from_row,
            )
            .optional()?
            .ok_or_else(|| SitesmithError::NotFound(format!("version {id}")))
        })
        .await
    }

    // -- Conversation --

    async fn append_message(&self, message: &Message) -> Result<()> {
        let m = message.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, project_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    m.id.to_string(),
                    m.project_id.to_string(),
                    m.role.to_string(),
                    m.content,
                    ts(&m.timestamp)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, project_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, role, content, created_at
                 FROM messages WHERE project_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id.to_string()], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    // -- Transactions --

    async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        let t = transaction.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO transactions (id, user_id, plan_id, amount, credits, is_paid, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    t.id.to_string(),
                    t.user_id,
                    t.plan_id,
                    t.amount,
                    t.credits,
                    t.is_paid,
                    ts(&t.created_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction> {
        self.with_conn(move |conn| {
            select_transaction(conn, &id.to_string())?
                .ok_or_else(|| SitesmithError::NotFound(format!("transaction {id}")))
        })
        .await
    }

    async fn settle_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.with_conn(move |conn| {
            let id = id.to_string();
            let tx = conn.unchecked_transaction()?;

            let flipped = tx.execute(
                "UPDATE transactions SET is_paid = 1 WHERE id = ?1 AND is_paid = 0",
                params![id],
            )?;
            let Some(transaction) = select_transaction(&tx, &id)? else {
                return Err(SitesmithError::NotFound(format!("transaction {id}")));
            };
            if flipped == 0 {
                return Ok(None);
            }

            let credited = tx.execute(
                "UPDATE users SET credits = credits + ?2 WHERE id = ?1",
                params![transaction.user_id, transaction.credits],
            )?;
            if credited == 0 {
                // Dropping `tx` rolls back the is_paid flip.
                return Err(SitesmithError::NotFound(format!(
                    "user {}",
                    transaction.user_id
                )));
            }
            tx.commit()?;
            Ok(Some(transaction))
        })
        .await
    }

    // -- Health --

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
