//! Backend selection from a database URL.

use std::sync::Arc;

use portal_storage::{Store, StoreError};
use portal_store_postgres::PostgresStore;
use portal_store_sqlite::SqliteStore;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://portal.db?mode=rwc";

/// Open the store named by `url`, running pending migrations.
///
/// `postgres:` and `postgresql:` URLs select Postgres; anything else is
/// handed to SQLite.
pub async fn open_store(url: &str) -> Result<Arc<dyn Store>, StoreError> {
    if is_postgres(url) {
        Ok(Arc::new(PostgresStore::open(url).await?))
    } else {
        Ok(Arc::new(SqliteStore::open(url).await?))
    }
}

pub fn is_postgres(url: &str) -> bool {
    url.starts_with("postgres:") || url.starts_with("postgresql:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        assert!(is_postgres("postgres://localhost/portal"));
        assert!(is_postgres("postgresql://localhost/portal"));
        assert!(!is_postgres(DEFAULT_DATABASE_URL));
        assert!(!is_postgres("sqlite::memory:"));
    }

    #[tokio::test]
    async fn test_opens_in_memory_sqlite() {
        let store = open_store("sqlite::memory:").await.unwrap();
        assert!(store.list_tags().await.unwrap().is_empty());
    }
}
