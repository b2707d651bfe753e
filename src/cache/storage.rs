//! Cache storage trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, params_from_iter, Connection, Params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::traits::Cacheable;

/// SQLite caps bound parameters per statement; bulk lookups are chunked below it.
const KEY_CHUNK_SIZE: usize = 500;

/// Trait for cache storage backends.
///
/// Every method is scoped to one entity type's table. Reads that return
/// lists are ordered by name ascending and honour [`Cacheable::hide_unnamed`].
pub trait CacheStorage: Send + Sync {
  /// Full snapshot of the table.
  fn read_all<T: Cacheable>(&self) -> Result<Vec<T>>;

  /// A range of the ordered table.
  fn read_page<T: Cacheable>(&self, limit: usize, offset: usize) -> Result<Vec<T>>;

  /// Number of visible rows.
  fn count<T: Cacheable>(&self) -> Result<usize>;

  /// Insert or replace entities by key, stamping each with the write time.
  fn upsert_all<T: Cacheable>(&self, entities: &mut [T]) -> Result<()>;

  /// Remove every row of the table.
  fn delete_all<T: Cacheable>(&self) -> Result<()>;

  /// Get a single entity by key, hidden or not.
  fn get_by_key<T: Cacheable>(&self, key: &str) -> Result<Option<T>>;

  /// Get every entity whose key is in `keys`, in the order of `keys`.
  fn get_by_keys<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<T>>;

  /// Newest write timestamp in the table, if it has any rows.
  fn max_last_updated<T: Cacheable>(&self) -> Result<Option<i64>>;

  /// Receiver that observes a new generation after every mutation of the table.
  fn subscribe<T: Cacheable>(&self) -> Result<watch::Receiver<u64>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  /// Tables already created in this connection
  tables: Mutex<HashSet<&'static str>>,
  /// Change generation per table
  changes: Mutex<HashMap<&'static str, watch::Sender<u64>>>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "Opened cache database");
    Ok(Self::with_connection(conn))
  }

  /// Open a private in-memory database. Contents are lost on drop.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Ok(Self::with_connection(conn))
  }

  fn with_connection(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
      tables: Mutex::new(HashSet::new()),
      changes: Mutex::new(HashMap::new()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create the table for `table` on first use.
  fn ensure_table(&self, conn: &Connection, table: &'static str) -> Result<()> {
    let mut tables = self
      .tables
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if tables.contains(table) {
      return Ok(());
    }

    conn
      .execute_batch(&table_schema(table))
      .map_err(|e| eyre!("Failed to create cache table {}: {}", table, e))?;
    tables.insert(table);

    Ok(())
  }

  /// Bump the change generation of `table`, waking every subscriber.
  fn notify(&self, table: &'static str) {
    match self.changes.lock() {
      Ok(changes) => {
        if let Some(tx) = changes.get(table) {
          tx.send_modify(|generation| *generation += 1);
        }
      }
      Err(e) => warn!(table, "Change notification skipped: {}", e),
    }
  }

  fn query_entities<T: Cacheable, P: Params>(
    &self,
    conn: &Connection,
    sql: &str,
    params: P,
  ) -> Result<Vec<T>> {
    let entity_type = T::entity_type();

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare {} query: {}", entity_type, e))?;

    let rows = stmt
      .query_map(params, |row| {
        let data: Vec<u8> = row.get(0)?;
        let last_updated: i64 = row.get(1)?;
        Ok((data, last_updated))
      })
      .map_err(|e| eyre!("Failed to query {}: {}", entity_type, e))?;

    let mut entities = Vec::new();
    for row in rows {
      let (data, last_updated) =
        row.map_err(|e| eyre!("Failed to read {} row: {}", entity_type, e))?;
      match serde_json::from_slice::<T>(&data) {
        Ok(mut entity) => {
          entity.set_last_updated(last_updated);
          entities.push(entity);
        }
        Err(e) => warn!(entity = entity_type, "Skipping undecodable cached row: {}", e),
      }
    }

    Ok(entities)
  }
}

/// Schema for one entity table.
fn table_schema(table: &str) -> String {
  format!(
    r#"
CREATE TABLE IF NOT EXISTS {table} (
    url TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    last_updated INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{table}_name ON {table}(name);
"#
  )
}

fn visible_clause<T: Cacheable>() -> &'static str {
  if T::hide_unnamed() {
    "WHERE name != ''"
  } else {
    ""
  }
}

impl CacheStorage for SqliteStorage {
  fn read_all<T: Cacheable>(&self) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    let sql = format!(
      "SELECT data, last_updated FROM {} {} ORDER BY name ASC",
      table,
      visible_clause::<T>()
    );
    self.query_entities(&conn, &sql, [])
  }

  fn read_page<T: Cacheable>(&self, limit: usize, offset: usize) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    let sql = format!(
      "SELECT data, last_updated FROM {} {} ORDER BY name ASC LIMIT ?1 OFFSET ?2",
      table,
      visible_clause::<T>()
    );
    self.query_entities(&conn, &sql, params![limit as i64, offset as i64])
  }

  fn count<T: Cacheable>(&self) -> Result<usize> {
    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    let sql = format!("SELECT COUNT(*) FROM {} {}", table, visible_clause::<T>());
    let count: i64 = conn
      .query_row(&sql, [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count {}: {}", table, e))?;

    Ok(count as usize)
  }

  fn upsert_all<T: Cacheable>(&self, entities: &mut [T]) -> Result<()> {
    if entities.is_empty() {
      return Ok(());
    }

    let table = T::entity_type();
    let now = Utc::now().timestamp_millis();

    {
      let mut conn = self.lock()?;
      self.ensure_table(&conn, table)?;

      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      {
        let sql = format!(
          "INSERT OR REPLACE INTO {} (url, name, data, last_updated) VALUES (?1, ?2, ?3, ?4)",
          table
        );
        let mut stmt = tx
          .prepare(&sql)
          .map_err(|e| eyre!("Failed to prepare {} upsert: {}", table, e))?;

        for entity in entities.iter_mut() {
          entity.set_last_updated(now);
          let data =
            serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
          stmt
            .execute(params![entity.cache_key(), entity.name(), data, now])
            .map_err(|e| eyre!("Failed to store {} {}: {}", table, entity.cache_key(), e))?;
        }
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    }

    debug!(entity = table, count = entities.len(), "Upserted rows");
    self.notify(table);
    Ok(())
  }

  fn delete_all<T: Cacheable>(&self) -> Result<()> {
    let table = T::entity_type();

    {
      let conn = self.lock()?;
      self.ensure_table(&conn, table)?;
      conn
        .execute(&format!("DELETE FROM {}", table), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", table, e))?;
    }

    self.notify(table);
    Ok(())
  }

  fn get_by_key<T: Cacheable>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    let sql = format!("SELECT data, last_updated FROM {} WHERE url = ?1", table);
    let mut found = self.query_entities::<T, _>(&conn, &sql, params![key])?;

    Ok(found.pop())
  }

  fn get_by_keys<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<T>> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }

    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    let mut by_key: HashMap<String, T> = HashMap::new();
    for chunk in keys.chunks(KEY_CHUNK_SIZE) {
      let placeholders = vec!["?"; chunk.len()].join(", ");
      let sql = format!(
        "SELECT data, last_updated FROM {} WHERE url IN ({})",
        table, placeholders
      );
      for entity in self.query_entities::<T, _>(&conn, &sql, params_from_iter(chunk.iter()))? {
        by_key.insert(entity.cache_key().to_string(), entity);
      }
    }

    // Preserve the caller's order, one entry per key
    Ok(keys.iter().filter_map(|key| by_key.remove(key)).collect())
  }

  fn max_last_updated<T: Cacheable>(&self) -> Result<Option<i64>> {
    let conn = self.lock()?;
    let table = T::entity_type();
    self.ensure_table(&conn, table)?;

    conn
      .query_row(&format!("SELECT MAX(last_updated) FROM {}", table), [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to read newest {} timestamp: {}", table, e))
  }

  fn subscribe<T: Cacheable>(&self) -> Result<watch::Receiver<u64>> {
    let mut changes = self
      .changes
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      changes
        .entry(T::entity_type())
        .or_insert_with(|| watch::channel(0).0)
        .subscribe(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{book, character, house};
  use crate::wiki::{Book, Character, House};

  fn storage() -> SqliteStorage {
    SqliteStorage::open_in_memory().unwrap()
  }

  #[test]
  fn test_reads_are_ordered_by_name() {
    let storage = storage();
    let mut houses = vec![
      house("h/3", "House Tully"),
      house("h/1", "House Arryn"),
      house("h/2", "House Stark"),
    ];
    storage.upsert_all(&mut houses).unwrap();

    let names: Vec<String> = storage
      .read_all::<House>()
      .unwrap()
      .into_iter()
      .map(|h| h.name)
      .collect();
    assert_eq!(names, vec!["House Arryn", "House Stark", "House Tully"]);

    let page: Vec<String> = storage
      .read_page::<House>(2, 1)
      .unwrap()
      .into_iter()
      .map(|h| h.name)
      .collect();
    assert_eq!(page, vec!["House Stark", "House Tully"]);
  }

  #[test]
  fn test_unnamed_characters_are_stored_but_hidden() {
    let storage = storage();
    let mut characters = vec![character("c/1", "Jon Snow"), character("c/2", "")];
    storage.upsert_all(&mut characters).unwrap();

    assert_eq!(storage.count::<Character>().unwrap(), 1);
    assert_eq!(storage.read_all::<Character>().unwrap().len(), 1);
    assert_eq!(storage.read_page::<Character>(50, 0).unwrap().len(), 1);
    assert!(storage.get_by_key::<Character>("c/2").unwrap().is_some());
  }

  #[test]
  fn test_upsert_replaces_whole_row() {
    let storage = storage();
    let mut first = vec![book("b/1", "A Game of Thrones", "978-0553103540")];
    storage.upsert_all(&mut first).unwrap();

    let mut replacement = book("b/1", "A Game of Thrones", "");
    replacement.publisher = "Voyager".to_string();
    storage.upsert_all(&mut [replacement]).unwrap();

    let stored = storage.get_by_key::<Book>("b/1").unwrap().unwrap();
    assert_eq!(stored.isbn, "");
    assert_eq!(stored.publisher, "Voyager");
    assert_eq!(storage.count::<Book>().unwrap(), 1);
  }

  #[test]
  fn test_upsert_stamps_write_time() {
    let storage = storage();
    assert_eq!(storage.max_last_updated::<Book>().unwrap(), None);

    let before = Utc::now().timestamp_millis();
    let mut books = vec![book("b/1", "A Clash of Kings", "")];
    storage.upsert_all(&mut books).unwrap();

    assert!(books[0].last_updated >= before);
    let newest = storage.max_last_updated::<Book>().unwrap().unwrap();
    assert_eq!(newest, books[0].last_updated);
    let stored = storage.get_by_key::<Book>("b/1").unwrap().unwrap();
    assert_eq!(stored.last_updated, newest);
  }

  #[test]
  fn test_get_by_keys_follows_input_order() {
    let storage = storage();
    let mut books = vec![
      book("b/1", "A Game of Thrones", ""),
      book("b/2", "A Clash of Kings", ""),
    ];
    storage.upsert_all(&mut books).unwrap();

    let keys = vec![
      "b/2".to_string(),
      "b/missing".to_string(),
      "b/1".to_string(),
      "b/2".to_string(),
    ];
    let found: Vec<String> = storage
      .get_by_keys::<Book>(&keys)
      .unwrap()
      .into_iter()
      .map(|b| b.url)
      .collect();
    assert_eq!(found, vec!["b/2", "b/1"]);
    assert!(storage.get_by_keys::<Book>(&[]).unwrap().is_empty());
  }

  #[test]
  fn test_delete_all_is_per_table() {
    let storage = storage();
    storage
      .upsert_all(&mut [house("h/1", "House Stark")])
      .unwrap();
    storage
      .upsert_all(&mut [book("b/1", "A Game of Thrones", "")])
      .unwrap();

    storage.delete_all::<House>().unwrap();

    assert_eq!(storage.count::<House>().unwrap(), 0);
    assert_eq!(storage.count::<Book>().unwrap(), 1);
  }

  #[test]
  fn test_subscribers_see_mutations_of_their_table_only() {
    let storage = storage();
    let mut houses_rx = storage.subscribe::<House>().unwrap();
    let books_rx = storage.subscribe::<Book>().unwrap();

    storage
      .upsert_all(&mut [house("h/1", "House Stark")])
      .unwrap();
    assert!(houses_rx.has_changed().unwrap());
    assert!(!books_rx.has_changed().unwrap());

    let _ = houses_rx.borrow_and_update();
    storage.delete_all::<House>().unwrap();
    assert!(houses_rx.has_changed().unwrap());
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .upsert_all(&mut [house("h/1", "House Stark")])
        .unwrap();
    }

    let reopened = SqliteStorage::open(&path).unwrap();
    assert_eq!(reopened.count::<House>().unwrap(), 1);
  }
}
