//! crates/chat_core/src/directory.rs
//!
//! The transaction boundary around the user record store.
//!
//! The store only knows whole-document load and save, so every logical
//! operation reads the full mapping, migrates and mutates one record in
//! memory, and writes the full mapping back. A single directory-wide lock
//! serialises these read-modify-write cycles; without it two users'
//! concurrent saves could overwrite each other's changes.

use crate::domain::UserRecord;
use crate::error::CoreResult;
use crate::migration;
use crate::ports::UserStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    lock: Mutex<()>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Account identifiers are emails, compared trimmed and lowercased.
    pub fn normalize_account(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    /// Creates the record on first login or signup; returns the existing
    /// record otherwise.
    pub async fn provision(&self, account: &str) -> CoreResult<UserRecord> {
        self.view(account).await
    }

    /// The read path: the migrated, normalized record. Repairs are persisted.
    pub async fn view(&self, account: &str) -> CoreResult<UserRecord> {
        self.transact(account, |record| Ok(record.clone())).await
    }

    /// Runs `apply` against one record as a single load-mutate-save unit.
    ///
    /// If `apply` fails its changes are discarded; migration repairs made
    /// while loading are still saved.
    pub async fn transact<T, F>(&self, account: &str, apply: F) -> CoreResult<T>
    where
        F: FnOnce(&mut UserRecord) -> CoreResult<T>,
    {
        let account = Self::normalize_account(account);
        let _guard = self.lock.lock().await;

        let mut users = self.store.load().await?;
        let now = Utc::now();
        let stored = users.remove(&account);
        let created = stored.is_none();
        let (mut record, mut repaired) = migration::decode(stored.unwrap_or_default(), now)?;
        repaired |= record.ensure_active(now);
        if created {
            info!(account = %account, "Created user record.");
        }

        let loaded = record.clone();
        match apply(&mut record) {
            Ok(value) => {
                if record != loaded || repaired {
                    users.insert(account, migration::encode(&record)?);
                    self.store.save(&users).await?;
                }
                Ok(value)
            }
            Err(e) => {
                if repaired {
                    users.insert(account, migration::encode(&loaded)?);
                    self.store.save(&users).await?;
                }
                Err(e)
            }
        }
    }
}
