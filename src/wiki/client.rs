use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::wiki::api_types::{ApiBook, ApiCharacter, ApiCoverResponse, ApiHouse};
use crate::wiki::types::{Book, Character, House};

/// Remote side of the cache: the public catalogue plus the cover lookup.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// One page of the book collection. Covers are not resolved.
  async fn fetch_books(&self, page: u32, page_size: usize) -> Result<Vec<Book>>;

  /// One page of the character collection.
  async fn fetch_characters(&self, page: u32, page_size: usize) -> Result<Vec<Character>>;

  /// One page of the house collection.
  async fn fetch_houses(&self, page: u32, page_size: usize) -> Result<Vec<House>>;

  /// A single book by its canonical URL. `Ok(None)` when it does not exist.
  async fn fetch_book(&self, url: &str) -> Result<Option<Book>>;

  /// Cover image URL for an ISBN. `None` on any failure.
  async fn fetch_cover(&self, isbn: &str) -> Option<String>;
}

/// HTTP client for the An API of Ice and Fire catalogue
#[derive(Clone)]
pub struct IceAndFireClient {
  client: Client,
  base_url: Url,
  cover_url: Url,
}

impl IceAndFireClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid catalogue URL {}: {}", config.base_url, e))?;
    let cover_url = Url::parse(&config.cover_url)
      .map_err(|e| eyre!("Invalid cover URL {}: {}", config.cover_url, e))?;

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      cover_url,
    })
  }

  /// `base` with `segment` appended as one more path segment
  fn endpoint(base: &Url, segment: &str) -> Result<Url> {
    let mut url = base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("URL cannot be a base: {}", base))?
      .pop_if_empty()
      .push(segment);
    Ok(url)
  }

  async fn get_page<A: DeserializeOwned>(
    &self,
    collection: &str,
    page: u32,
    page_size: usize,
  ) -> Result<Vec<A>> {
    let url = Self::endpoint(&self.base_url, collection)?;
    debug!(%url, page, page_size, "Fetching collection page");

    let response = self
      .client
      .get(url)
      .query(&[("page", page as u64), ("pageSize", page_size as u64)])
      .send()
      .await
      .map_err(|e| eyre!("Failed to get {} page {}: {}", collection, page, e))?
      .error_for_status()
      .map_err(|e| eyre!("Failed to get {} page {}: {}", collection, page, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {} page {}: {}", collection, page, e))
  }
}

#[async_trait]
impl RemoteSource for IceAndFireClient {
  async fn fetch_books(&self, page: u32, page_size: usize) -> Result<Vec<Book>> {
    let books: Vec<ApiBook> = self.get_page("books", page, page_size).await?;
    Ok(books.into_iter().map(ApiBook::into_book).collect())
  }

  async fn fetch_characters(&self, page: u32, page_size: usize) -> Result<Vec<Character>> {
    let characters: Vec<ApiCharacter> = self.get_page("characters", page, page_size).await?;
    Ok(characters.into_iter().map(Character::from).collect())
  }

  async fn fetch_houses(&self, page: u32, page_size: usize) -> Result<Vec<House>> {
    let houses: Vec<ApiHouse> = self.get_page("houses", page, page_size).await?;
    Ok(houses.into_iter().map(House::from).collect())
  }

  async fn fetch_book(&self, url: &str) -> Result<Option<Book>> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to get book {}: {}", url, e))?;

    if response.status() == StatusCode::NOT_FOUND {
      debug!(url, "Book not found");
      return Ok(None);
    }

    let book: ApiBook = response
      .error_for_status()
      .map_err(|e| eyre!("Failed to get book {}: {}", url, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse book {}: {}", url, e))?;

    Ok(Some(book.into_book()))
  }

  async fn fetch_cover(&self, isbn: &str) -> Option<String> {
    let lookup = async {
      let url = Self::endpoint(&self.cover_url, isbn)?;
      let response: ApiCoverResponse = self
        .client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
      Ok::<_, color_eyre::Report>(response.url)
    };

    match lookup.await {
      Ok(url) => url,
      Err(e) => {
        debug!(isbn, "Cover lookup failed: {}", e);
        None
      }
    }
  }
}
