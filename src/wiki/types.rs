use serde::{Deserialize, Serialize};

/// A published book, with its cover once resolved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
  pub url: String,
  pub name: String,
  pub isbn: String,
  pub authors: Vec<String>,
  pub number_of_pages: u32,
  pub publisher: String,
  pub country: String,
  pub media_type: String,
  pub released: String,
  pub characters: Vec<String>,
  pub pov_characters: Vec<String>,
  /// None when the book has no ISBN or the cover lookup failed
  pub cover_image_url: Option<String>,
  /// Epoch millis of the last cache write
  #[serde(skip)]
  pub last_updated: i64,
}

/// A character. Records with an empty name are incomplete upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
  pub url: String,
  pub name: String,
  pub gender: String,
  pub culture: String,
  pub born: String,
  pub died: String,
  pub titles: Vec<String>,
  pub aliases: Vec<String>,
  pub father: String,
  pub mother: String,
  pub spouse: String,
  pub allegiances: Vec<String>,
  /// Book URLs the character appears in
  pub books: Vec<String>,
  /// Book URLs narrated from this character's point of view
  pub pov_books: Vec<String>,
  pub tv_series: Vec<String>,
  pub played_by: Vec<String>,
  #[serde(skip)]
  pub last_updated: i64,
}

/// A noble house
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct House {
  pub url: String,
  pub name: String,
  pub region: String,
  pub coat_of_arms: String,
  pub words: String,
  pub titles: Vec<String>,
  pub seats: Vec<String>,
  pub current_lord: String,
  pub heir: String,
  pub overlord: String,
  pub founded: String,
  pub founder: String,
  pub died_out: String,
  pub ancestral_weapons: Vec<String>,
  pub cadet_branches: Vec<String>,
  pub sworn_members: Vec<String>,
  #[serde(skip)]
  pub last_updated: i64,
}

/// A character with its book references resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterWithBooks {
  pub character: Character,
  pub books: Vec<Book>,
  pub pov_books: Vec<Book>,
}
