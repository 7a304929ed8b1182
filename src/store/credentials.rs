//! Exchange API credential storage. At most one active pair per user;
//! rotating in a new pair deactivates the previous one.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::store::Db;

/// An access/secret key pair for the exchange, owned by a user.
#[derive(Debug, Clone)]
pub struct ApiCredential {
    pub user_id: Uuid,
    pub access_key: String,
    pub secret_key: String,
}

pub struct CredentialStore {
    db: Arc<Db>,
}

impl CredentialStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// The user's currently-active credential pair.
    pub fn get_active(&self, user_id: Uuid) -> Result<ApiCredential> {
        self.db
            .with(|conn| {
                conn.query_row(
                    "SELECT access_key, secret_key FROM api_credentials
                     WHERE user_id = ?1 AND active = 1",
                    params![user_id.to_string()],
                    |row| {
                        Ok(ApiCredential {
                            user_id,
                            access_key: row.get(0)?,
                            secret_key: row.get(1)?,
                        })
                    },
                )
                .optional()
            })?
            .ok_or(TradingError::MissingCredentials(user_id))
    }

    /// Store a new active pair, deactivating any previous one. Callers must
    /// also evict the user's cached exchange client so the rotation takes
    /// effect on next use.
    pub fn set_active(&self, user_id: Uuid, access_key: &str, secret_key: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE api_credentials SET active = 0 WHERE user_id = ?1",
                params![user_id.to_string()],
            )?;
            conn.execute(
                r#"
                INSERT INTO api_credentials (user_id, access_key, secret_key, active, created_at)
                VALUES (?1, ?2, ?3, 1, ?4)
                ON CONFLICT(user_id, access_key) DO UPDATE SET
                    secret_key = ?3, active = 1
                "#,
                params![
                    user_id.to_string(),
                    access_key,
                    secret_key,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        info!(user_id = %user_id, "Exchange credentials rotated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials() {
        let store = CredentialStore::new(Db::open_in_memory().unwrap());
        let err = store.get_active(Uuid::new_v4());
        assert!(matches!(err, Err(TradingError::MissingCredentials(_))));
    }

    #[test]
    fn test_rotation_replaces_active_pair() {
        let store = CredentialStore::new(Db::open_in_memory().unwrap());
        let user = Uuid::new_v4();

        store.set_active(user, "access-1", "secret-1").unwrap();
        assert_eq!(store.get_active(user).unwrap().access_key, "access-1");

        store.set_active(user, "access-2", "secret-2").unwrap();
        let active = store.get_active(user).unwrap();
        assert_eq!(active.access_key, "access-2");
        assert_eq!(active.secret_key, "secret-2");
    }
}
