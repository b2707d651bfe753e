//! Serde-deserializable types matching the catalogue API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! of the camelCase payloads (with upstream gaps filled by defaults) while
//! keeping domain types focused on application needs.

use serde::Deserialize;

use super::types::{Book, Character, House};

// ============================================================================
// Collection records
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiBook {
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
}

impl ApiBook {
  /// Convert to a domain book. The cover is resolved separately.
  pub fn into_book(self) -> Book {
    Book {
      url: self.url,
      name: self.name,
      isbn: self.isbn,
      authors: self.authors,
      number_of_pages: self.number_of_pages,
      publisher: self.publisher,
      country: self.country,
      media_type: self.media_type,
      released: self.released,
      characters: self.characters,
      pov_characters: self.pov_characters,
      cover_image_url: None,
      last_updated: 0,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiCharacter {
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
  pub books: Vec<String>,
  pub pov_books: Vec<String>,
  pub tv_series: Vec<String>,
  pub played_by: Vec<String>,
}

impl From<ApiCharacter> for Character {
  fn from(api: ApiCharacter) -> Self {
    Character {
      url: api.url,
      name: api.name,
      gender: api.gender,
      culture: api.culture,
      born: api.born,
      died: api.died,
      titles: api.titles,
      aliases: api.aliases,
      father: api.father,
      mother: api.mother,
      spouse: api.spouse,
      allegiances: api.allegiances,
      books: api.books,
      pov_books: api.pov_books,
      tv_series: api.tv_series,
      played_by: api.played_by,
      last_updated: 0,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiHouse {
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
}

impl From<ApiHouse> for House {
  fn from(api: ApiHouse) -> Self {
    House {
      url: api.url,
      name: api.name,
      region: api.region,
      coat_of_arms: api.coat_of_arms,
      words: api.words,
      titles: api.titles,
      seats: api.seats,
      current_lord: api.current_lord,
      heir: api.heir,
      overlord: api.overlord,
      founded: api.founded,
      founder: api.founder,
      died_out: api.died_out,
      ancestral_weapons: api.ancestral_weapons,
      cadet_branches: api.cadet_branches,
      sworn_members: api.sworn_members,
      last_updated: 0,
    }
  }
}

// ============================================================================
// Cover lookup response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCoverResponse {
  pub url: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_book_payload_uses_camel_case() {
    let json = r#"{
      "url": "https://www.anapioficeandfire.com/api/books/1",
      "name": "A Game of Thrones",
      "isbn": "978-0553103540",
      "authors": ["George R. R. Martin"],
      "numberOfPages": 694,
      "publisher": "Bantam Books",
      "country": "United States",
      "mediaType": "Hardcover",
      "released": "1996-08-01T00:00:00",
      "characters": ["https://www.anapioficeandfire.com/api/characters/2"],
      "povCharacters": ["https://www.anapioficeandfire.com/api/characters/148"]
    }"#;

    let book = serde_json::from_str::<ApiBook>(json).unwrap().into_book();
    assert_eq!(book.number_of_pages, 694);
    assert_eq!(book.media_type, "Hardcover");
    assert_eq!(book.pov_characters.len(), 1);
    assert_eq!(book.cover_image_url, None);
  }

  #[test]
  fn test_missing_fields_default_to_empty() {
    let json = r#"{"url": "https://www.anapioficeandfire.com/api/characters/1", "name": ""}"#;

    let character: Character = serde_json::from_str::<ApiCharacter>(json).unwrap().into();
    assert_eq!(character.name, "");
    assert!(character.books.is_empty());
    assert!(character.played_by.is_empty());
  }

  #[test]
  fn test_house_payload() {
    let json = r#"{
      "url": "https://www.anapioficeandfire.com/api/houses/362",
      "name": "House Stark of Winterfell",
      "region": "The North",
      "coatOfArms": "A running grey direwolf, on an ice-white field",
      "words": "Winter is Coming",
      "currentLord": "https://www.anapioficeandfire.com/api/characters/1",
      "swornMembers": ["https://www.anapioficeandfire.com/api/characters/2"],
      "unknownField": 7
    }"#;

    let house: House = serde_json::from_str::<ApiHouse>(json).unwrap().into();
    assert_eq!(house.words, "Winter is Coming");
    assert_eq!(house.sworn_members.len(), 1);
    assert!(house.cadet_branches.is_empty());
  }
}
