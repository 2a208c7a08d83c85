mod backend;
mod sqlite;

pub use backend::StorageBackend;
pub use sqlite::SqliteStorage;

use crate::config::SitesmithConfig;
use crate::error::{Result, SitesmithError};

/// Open the configured SQLite database, creating it if needed.
pub fn create_backend(config: &SitesmithConfig) -> Result<SqliteStorage> {
    let path = match &config.storage.path {
        Some(p) if p == ":memory:" => return SqliteStorage::open_in_memory(),
        Some(p) => std::path::PathBuf::from(p),
        None => default_sqlite_path()?,
    };
    tracing::info!(path = %path.display(), "opening sqlite storage");
    SqliteStorage::open(&path)
}

/// Default SQLite path: `~/.config/sitesmith/sitesmith.db`
fn default_sqlite_path() -> Result<std::path::PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("sitesmith").join("sitesmith.db"))
        .ok_or_else(|| SitesmithError::Config("cannot determine config directory".to_string()))
}
