use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;

use crate::config::StorageOptions;

mod schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of an [`LocalStore::update_item`] closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotUpdate {
    Keep,
    Set(String),
    Remove,
}

/// String key/value slots shared by every part of the app, modelled on a
/// browser's local storage.
///
/// `update_item` runs the closure against the current value and applies
/// its result atomically: no other writer can interleave between the read
/// and the write.
pub trait LocalStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn update_item(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<String>) -> Result<SlotUpdate>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct StorageHandle {
    store_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.store_path)
            .with_context(|| format!("opening store {}", self.store_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }
}

impl LocalStore for StorageHandle {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("reading slot '{key}'"))
        })
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            upsert(conn, key, value)?;
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])
                .with_context(|| format!("removing slot '{key}'"))?;
            Ok(())
        })
    }

    fn update_item(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<String>) -> Result<SlotUpdate>,
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("starting slot update transaction")?;
        let current = tx
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("reading slot '{key}'"))?;
        match update(current)? {
            SlotUpdate::Keep => {}
            SlotUpdate::Set(value) => upsert(&tx, key, &value)?,
            SlotUpdate::Remove => {
                tx.execute("DELETE FROM local_storage WHERE key = ?1", params![key])
                    .with_context(|| format!("removing slot '{key}'"))?;
            }
        }
        tx.commit()
            .with_context(|| format!("committing slot update '{key}'"))?;
        Ok(())
    }
}

/// In-process store used for `--ephemeral` runs and tests. Nothing
/// survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }

    fn update_item(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<String>) -> Result<SlotUpdate>,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        let current = slots.get(key).cloned();
        match update(current)? {
            SlotUpdate::Keep => {}
            SlotUpdate::Set(value) => {
                slots.insert(key.to_string(), value);
            }
            SlotUpdate::Remove => {
                slots.remove(key);
            }
        }
        Ok(())
    }
}

pub fn init(storage: &StorageOptions) -> Result<StorageHandle> {
    let store_path = &storage.store_path;
    if let Some(parent) = store_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(store_path)
        .with_context(|| format!("opening store {}", store_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    tracing::debug!(path = %store_path.display(), "local store ready");
    Ok(StorageHandle {
        store_path: Arc::new(store_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("setting busy timeout")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn upsert(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO local_storage (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                        updated_at = excluded.updated_at",
        params![key, value, now],
    )
    .with_context(|| format!("writing slot '{key}'"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let mut options = StorageOptions::default();
        options.store_path = temp.path().join("data").join("local-storage.db");
        let storage = init(&options)?;
        Ok((temp, storage))
    }

    #[test]
    fn sqlite_slots_round_trip_and_remove() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert_eq!(storage.get_item("theme")?, None);

        storage.set_item("theme", "light")?;
        storage.set_item("theme", "dark")?;
        assert_eq!(storage.get_item("theme")?.as_deref(), Some("dark"));

        storage.remove_item("theme")?;
        assert_eq!(storage.get_item("theme")?, None);
        // Removing an absent key is a no-op.
        storage.remove_item("theme")?;
        Ok(())
    }

    #[test]
    fn sqlite_slots_survive_reopen() -> anyhow::Result<()> {
        let (temp, storage) = init_storage()?;
        storage.set_item("contact_messages", "[]")?;
        drop(storage);

        let mut options = StorageOptions::default();
        options.store_path = temp.path().join("data").join("local-storage.db");
        let reopened = init(&options)?;
        assert_eq!(
            reopened.get_item("contact_messages")?.as_deref(),
            Some("[]")
        );
        Ok(())
    }

    #[test]
    fn update_item_applies_closure_result() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.update_item("counter", &mut |current| {
            assert_eq!(current, None);
            Ok(SlotUpdate::Set("1".into()))
        })?;
        storage.update_item("counter", &mut |current| {
            let next = current.unwrap_or_default().parse::<u32>()? + 1;
            Ok(SlotUpdate::Set(next.to_string()))
        })?;
        assert_eq!(storage.get_item("counter")?.as_deref(), Some("2"));

        storage.update_item("counter", &mut |_| Ok(SlotUpdate::Keep))?;
        assert_eq!(storage.get_item("counter")?.as_deref(), Some("2"));

        storage.update_item("counter", &mut |_| Ok(SlotUpdate::Remove))?;
        assert_eq!(storage.get_item("counter")?, None);
        Ok(())
    }

    #[test]
    fn update_item_error_leaves_slot_untouched() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.set_item("slot", "before")?;
        let result = storage.update_item("slot", &mut |_| Err(anyhow::anyhow!("refused")));
        assert!(result.is_err());
        assert_eq!(storage.get_item("slot")?.as_deref(), Some("before"));
        Ok(())
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || -> anyhow::Result<()> {
                    for _ in 0..10 {
                        storage.update_item("counter", &mut |current| {
                            let value = current.as_deref().unwrap_or("0").parse::<u32>()?;
                            Ok(SlotUpdate::Set((value + 1).to_string()))
                        })?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread panicked")?;
        }
        assert_eq!(storage.get_item("counter")?.as_deref(), Some("40"));
        Ok(())
    }

    #[test]
    fn memory_store_matches_slot_semantics() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set_item("theme", "light")?;
        store.update_item("theme", &mut |current| {
            assert_eq!(current.as_deref(), Some("light"));
            Ok(SlotUpdate::Set("dark".into()))
        })?;
        assert_eq!(store.get_item("theme")?.as_deref(), Some("dark"));
        assert_eq!(store.len(), 1);
        store.remove_item("theme")?;
        assert!(store.is_empty());
        Ok(())
    }
}
