//! Resolution of a character's book references.

use color_eyre::Result;
use tracing::debug;

use crate::cache::CacheStorage;

use super::repository::WikiRepository;
use super::types::{Character, CharacterWithBooks};

impl<S: CacheStorage + 'static> WikiRepository<S> {
  /// A cached character with its appearance and POV book lists resolved.
  ///
  /// `Ok(None)` when the character is not in the store; nothing is resolved
  /// in that case. Store failures while resolving propagate.
  pub async fn character_with_books(&self, url: &str) -> Result<Option<CharacterWithBooks>> {
    let Some(character) = self.storage.get_by_key::<Character>(url)? else {
      debug!(url, "Character not cached");
      return Ok(None);
    };

    let books = self.books_by_urls(&character.books).await?;
    let pov_books = self.books_by_urls(&character.pov_books).await?;

    Ok(Some(CharacterWithBooks {
      character,
      books,
      pov_books,
    }))
  }
}
