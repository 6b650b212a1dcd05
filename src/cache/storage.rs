//! SQLite-backed persistent store with a live query.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::error::StoreError;
use super::traits::{CollectionKey, Persistable, PersistentStore, Snapshot};

/// Bookkeeping for the last write to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMeta {
  pub description: String,
  /// When the collection was last replaced
  pub refreshed_at: DateTime<Utc>,
  pub item_count: usize,
  /// Newest `updated_at` among the stored records
  pub max_updated: Option<DateTime<Utc>>,
}

/// SQLite storage for a single collection of `T`.
///
/// Records are returned in the order of the most recent `replace_all` call.
/// Duplicate keys within one write collapse to the last occurrence, which
/// keeps its own position. Several collections can share one database file;
/// each is scoped by its [`CollectionKey`] hash.
///
/// Writes made through this value reach live queries on commit. For
/// file-backed stores, commits from other connections (another store on the
/// same file, or another process) are picked up by polling
/// `PRAGMA data_version` every poll interval while a live query is open
/// inside a tokio runtime.
pub struct SqliteStore<T: Persistable> {
  inner: Arc<Inner<T>>,
  poll_interval: Duration,
}

/// Default delay before commits from other connections reach live queries
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Inner<T> {
  conn: Mutex<Connection>,
  collection: String,
  description: String,
  notify: watch::Sender<Snapshot<T>>,
  /// `PRAGMA data_version` as of the last snapshot sent; only touched under `conn`
  data_version: AtomicI64,
  file_backed: bool,
  watching: AtomicBool,
}

impl<T: Persistable> Clone for SqliteStore<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      poll_interval: self.poll_interval,
    }
  }
}

impl<T: Persistable> Inner<T> {
  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::LockPoisoned(e.to_string()))
  }

  /// Reload and publish the collection if another connection committed since
  /// the last check.
  fn reload_if_changed(&self) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let version = data_version(&conn)?;
    if version == self.data_version.load(Ordering::Acquire) {
      return Ok(false);
    }

    let items = load_items::<T>(&conn, &self.collection)?;
    self.data_version.store(version, Ordering::Release);
    debug!(collection = %self.description, count = items.len(), "reloaded after external write");
    self.notify.send_replace(Arc::new(items));
    Ok(true)
  }
}

impl<T: Persistable> SqliteStore<T> {
  /// Open (or create) the store at `path`.
  pub fn open(path: impl AsRef<Path>, key: &impl CollectionKey) -> Result<Self, StoreError> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    debug!(path = %path.display(), collection = %key.description(), "opened store");

    Self::with_connection(conn, key, true)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory(key: &impl CollectionKey) -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?, key, false)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Io("could not determine data directory".to_string()))?;

    Ok(data_dir.join("devbytes").join("cache.db"))
  }

  fn with_connection(
    conn: Connection,
    key: &impl CollectionKey,
    file_backed: bool,
  ) -> Result<Self, StoreError> {
    conn.execute_batch(STORE_SCHEMA)?;

    let collection = key.cache_hash();
    check_entity_type::<T>(&conn, &collection)?;
    let version = data_version(&conn)?;
    let initial = load_items::<T>(&conn, &collection)?;
    let (notify, _) = watch::channel(Arc::new(initial));

    Ok(Self {
      inner: Arc::new(Inner {
        conn: Mutex::new(conn),
        collection,
        description: key.description(),
        notify,
        data_version: AtomicI64::new(version),
        file_backed,
        watching: AtomicBool::new(false),
      }),
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  /// Set how often commits from other connections are checked for. Takes
  /// effect for the first live query opened on this store.
  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval.max(Duration::from_millis(1));
    self
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.inner.lock()
  }

  /// Start the external-write poller once per store, if there is a runtime
  /// to run it on. It stops when the last handle to the store is dropped.
  fn watch_external_writes(&self) {
    if !self.inner.file_backed || self.inner.watching.swap(true, Ordering::AcqRel) {
      return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      self.inner.watching.store(false, Ordering::Release);
      debug!(collection = %self.inner.description, "no runtime, external writes not watched");
      return;
    };

    let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
    let interval = self.poll_interval;
    runtime.spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        if let Err(e) = inner.reload_if_changed() {
          warn!(collection = %inner.description, error = %e, "failed to check for external writes");
        }
      }
    });
  }

  /// Read the committed contents of the collection.
  pub fn snapshot(&self) -> Result<Vec<T>, StoreError> {
    let conn = self.conn()?;
    load_items(&conn, &self.inner.collection)
  }

  /// Synchronous form of [`PersistentStore::replace_all`].
  pub fn replace_all_blocking(&self, records: &[T]) -> Result<(), StoreError> {
    let collection = &self.inner.collection;
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM collection_items WHERE collection_hash = ?",
      params![collection],
    )?;

    {
      let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO collection_items (collection_hash, entity_key, position, data, updated_at)
         VALUES (?, ?, ?, ?, ?)",
      )?;
      for (position, record) in records.iter().enumerate() {
        let data = serde_json::to_vec(record)?;
        stmt.execute(params![
          collection,
          record.cache_key(),
          position as i64,
          data,
          record.updated_at().map(format_datetime),
        ])?;
      }
    }

    let max_updated = records
      .iter()
      .filter_map(|r| r.updated_at())
      .max()
      .map(format_datetime);
    let stored = load_items::<T>(&tx, collection)?;

    tx.execute(
      "INSERT OR REPLACE INTO collections (collection_hash, description, entity_type, max_updated, refreshed_at, item_count)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        collection,
        self.inner.description,
        T::entity_type(),
        max_updated,
        format_datetime(Utc::now()),
        stored.len() as i64,
      ],
    )?;

    tx.commit()?;
    debug!(
      collection = %self.inner.description,
      count = stored.len(),
      "replaced collection"
    );

    // Still holding the connection lock, so notifications follow commit order
    self.inner.notify.send_replace(Arc::new(stored));
    Ok(())
  }

  /// Remove every record of the collection along with its bookkeeping.
  pub fn clear(&self) -> Result<(), StoreError> {
    let collection = &self.inner.collection;
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM collection_items WHERE collection_hash = ?",
      params![collection],
    )?;
    tx.execute(
      "DELETE FROM collections WHERE collection_hash = ?",
      params![collection],
    )?;
    tx.commit()?;
    debug!(collection = %self.inner.description, "cleared collection");

    self.inner.notify.send_replace(Arc::new(Vec::new()));
    Ok(())
  }

  /// Metadata of the last write, or `None` if the collection was never written.
  pub fn metadata(&self) -> Result<Option<CollectionMeta>, StoreError> {
    let conn = self.conn()?;

    let row: Option<(String, String, i64, Option<String>)> = conn
      .query_row(
        "SELECT description, refreshed_at, item_count, max_updated FROM collections
         WHERE collection_hash = ?",
        params![self.inner.collection],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    let Some((description, refreshed_at, item_count, max_updated)) = row else {
      return Ok(None);
    };

    Ok(Some(CollectionMeta {
      description,
      refreshed_at: parse_datetime(&refreshed_at)?,
      item_count: item_count as usize,
      max_updated: max_updated.as_deref().map(parse_datetime).transpose()?,
    }))
  }

  /// SHA-256 over the stored rows, in order. Equal fingerprints mean
  /// byte-identical collection contents.
  pub fn fingerprint(&self) -> Result<String, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT entity_key, position, data FROM collection_items
       WHERE collection_hash = ?
       ORDER BY position",
    )?;

    let mut hasher = Sha256::new();
    let mut rows = stmt.query(params![self.inner.collection])?;
    while let Some(row) = rows.next()? {
      let key: String = row.get(0)?;
      let position: i64 = row.get(1)?;
      let data: Vec<u8> = row.get(2)?;
      hasher.update(key.as_bytes());
      hasher.update(position.to_le_bytes());
      hasher.update(&data);
    }

    Ok(hex::encode(hasher.finalize()))
  }
}

#[async_trait]
impl<T: Persistable> PersistentStore for SqliteStore<T> {
  type Record = T;

  fn live_query(&self) -> watch::Receiver<Snapshot<T>> {
    self.watch_external_writes();
    let mut rx = self.inner.notify.subscribe();
    // A new subscriber always starts with the current snapshot
    rx.mark_changed();
    rx
  }

  async fn replace_all(&self, records: Vec<T>) -> Result<(), StoreError> {
    let store = self.clone();
    tokio::task::spawn_blocking(move || store.replace_all_blocking(&records))
      .await
      .map_err(|e| StoreError::Io(format!("write task failed: {}", e)))?
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
-- One row per collection
CREATE TABLE IF NOT EXISTS collections (
    collection_hash TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    max_updated TEXT,
    refreshed_at TEXT NOT NULL,
    item_count INTEGER NOT NULL
);

-- Records (serialized JSON), ordered by position within their collection
CREATE TABLE IF NOT EXISTS collection_items (
    collection_hash TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT,
    PRIMARY KEY (collection_hash, entity_key)
);

CREATE INDEX IF NOT EXISTS idx_collection_items_position
    ON collection_items(collection_hash, position);
"#;

fn load_items<T: Persistable>(conn: &Connection, collection: &str) -> Result<Vec<T>, StoreError> {
  let mut stmt = conn.prepare(
    "SELECT data FROM collection_items
     WHERE collection_hash = ?
     ORDER BY position",
  )?;

  let rows = stmt.query_map(params![collection], |row| row.get::<_, Vec<u8>>(0))?;

  let mut items = Vec::new();
  for data in rows {
    items.push(serde_json::from_slice(&data?)?);
  }
  Ok(items)
}

fn data_version(conn: &Connection) -> Result<i64, StoreError> {
  Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
}

fn check_entity_type<T: Persistable>(conn: &Connection, collection: &str) -> Result<(), StoreError> {
  let stored: Option<String> = conn
    .query_row(
      "SELECT entity_type FROM collections WHERE collection_hash = ?",
      params![collection],
      |row| row.get(0),
    )
    .optional()?;

  match stored {
    Some(entity_type) if entity_type != T::entity_type() => Err(StoreError::Serialization(format!(
      "collection holds '{}' records, expected '{}'",
      entity_type,
      T::entity_type()
    ))),
    _ => Ok(()),
  }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}
