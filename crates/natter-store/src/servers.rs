use chrono::Utc;
use rusqlite::params;

use natter_shared::ServerIdentity;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Record a server identity the first time it is seen.
    /// Returns `true` if the server was new.
    pub fn register_server(&self, identity: &ServerIdentity) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO servers (identity, first_seen) VALUES (?1, ?2)",
            params![identity.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Every server the cache holds data for, ordered by identity.
    pub fn list_servers(&self) -> Result<Vec<ServerIdentity>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT identity FROM servers ORDER BY identity ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0).map(ServerIdentity))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("cache.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn register_is_idempotent() {
        let (_dir, db) = open();
        let server = ServerIdentity::new("srv-1");

        assert!(db.register_server(&server).unwrap());
        assert!(!db.register_server(&server).unwrap());

        assert_eq!(db.list_servers().unwrap(), vec![server]);
    }

    #[test]
    fn first_seen_is_kept_on_reregister() {
        let (_dir, db) = open();
        let server = ServerIdentity::new("srv-1");
        db.register_server(&server).unwrap();

        let first_seen = |db: &Database| -> String {
            db.conn()
                .query_row(
                    "SELECT first_seen FROM servers WHERE identity = ?1",
                    params![server.as_str()],
                    |row| row.get(0),
                )
                .unwrap()
        };
        let before = first_seen(&db);
        assert!(chrono::DateTime::parse_from_rfc3339(&before).is_ok());

        db.register_server(&server).unwrap();
        assert_eq!(first_seen(&db), before);
    }

    #[test]
    fn servers_are_listed_in_order() {
        let (_dir, db) = open();
        db.register_server(&ServerIdentity::new("beta")).unwrap();
        db.register_server(&ServerIdentity::new("alpha")).unwrap();

        assert_eq!(
            db.list_servers().unwrap(),
            vec![ServerIdentity::new("alpha"), ServerIdentity::new("beta")]
        );
    }
}
