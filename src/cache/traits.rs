//! Core traits for the caching system.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached in the local store.
///
/// Each implementor maps to its own table. The whole entity is persisted as
/// serialized JSON; the key, name and write timestamp are projected into
/// columns so the store can order, filter and judge staleness.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity (the canonical source URL).
  fn cache_key(&self) -> &str;

  /// Display name, used for ordering.
  fn name(&self) -> &str;

  /// Stamp the write time. Called by the store on upsert and on read.
  fn set_last_updated(&mut self, millis: i64);

  /// Table name for storage organization (e.g., "books").
  fn entity_type() -> &'static str;

  /// Whether rows with an empty name are hidden from streamed and paged reads.
  fn hide_unnamed() -> bool {
    false
  }
}
