//! Caching implementations for catalogue types.

use crate::cache::Cacheable;

use super::types::{Book, Character, House};

impl Cacheable for Book {
  fn cache_key(&self) -> &str {
    &self.url
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn set_last_updated(&mut self, millis: i64) {
    self.last_updated = millis;
  }

  fn entity_type() -> &'static str {
    "books"
  }
}

impl Cacheable for Character {
  fn cache_key(&self) -> &str {
    &self.url
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn set_last_updated(&mut self, millis: i64) {
    self.last_updated = millis;
  }

  fn entity_type() -> &'static str {
    "characters"
  }

  // Unnamed characters are incomplete upstream records
  fn hide_unnamed() -> bool {
    true
  }
}

impl Cacheable for House {
  fn cache_key(&self) -> &str {
    &self.url
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn set_last_updated(&mut self, millis: i64) {
    self.last_updated = millis;
  }

  fn entity_type() -> &'static str {
    "houses"
  }
}
