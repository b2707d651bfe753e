//! Offline-first repository over the catalogue.

use chrono::Duration;
use color_eyre::Result;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{
  CacheLayer, CacheStorage, PageFetcher, RefreshPolicy, SqliteStorage, TaskScope,
  DEFAULT_PAGE_SIZE,
};
use crate::config::Config;

use super::client::RemoteSource;
use super::types::{Book, Character, House};

/// Tunables for [`WikiRepository`].
#[derive(Debug, Clone, Copy)]
pub struct RepositoryOptions {
  pub page_size: usize,
  /// Cached books older than this are refreshed on read
  pub book_stale_time: Duration,
  /// Concurrent cover and book lookups per batch
  pub lookup_concurrency: usize,
}

impl Default for RepositoryOptions {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      book_stale_time: Duration::minutes(1),
      lookup_concurrency: 8,
    }
  }
}

impl From<&Config> for RepositoryOptions {
  fn from(config: &Config) -> Self {
    Self {
      page_size: config.api.page_size.max(1),
      book_stale_time: stale_time(config.cache.book_stale_secs),
      lookup_concurrency: config.cache.cover_concurrency.max(1),
    }
  }
}

/// Seconds to a duration, saturating at the largest representable one.
fn stale_time(secs: u64) -> Duration {
  i64::try_from(secs)
    .ok()
    .and_then(Duration::try_seconds)
    .unwrap_or(Duration::MAX)
}

/// Catalogue repository with transparent local caching.
///
/// Owns one [`CacheLayer`] per collection. All three share the store and the
/// background task scope; each keeps its own paging cursor.
pub struct WikiRepository<S: CacheStorage + 'static = SqliteStorage> {
  pub(super) remote: Arc<dyn RemoteSource>,
  pub(super) storage: Arc<S>,
  scope: TaskScope,
  books: CacheLayer<Book, S>,
  characters: CacheLayer<Character, S>,
  houses: CacheLayer<House, S>,
  lookup_concurrency: usize,
}

impl<S: CacheStorage + 'static> WikiRepository<S> {
  pub fn new(
    remote: Arc<dyn RemoteSource>,
    storage: Arc<S>,
    scope: TaskScope,
    options: RepositoryOptions,
  ) -> Self {
    let concurrency = options.lookup_concurrency.max(1);

    let books_fetcher: PageFetcher<Book> = {
      let remote = Arc::clone(&remote);
      Arc::new(move |page: u32, page_size: usize| {
        let remote = Arc::clone(&remote);
        async move {
          let books = remote.fetch_books(page, page_size).await?;
          Ok(attach_covers(remote.as_ref(), books, concurrency).await)
        }
        .boxed()
      })
    };

    let characters_fetcher: PageFetcher<Character> = {
      let remote = Arc::clone(&remote);
      Arc::new(move |page: u32, page_size: usize| {
        let remote = Arc::clone(&remote);
        async move { remote.fetch_characters(page, page_size).await }.boxed()
      })
    };

    let houses_fetcher: PageFetcher<House> = {
      let remote = Arc::clone(&remote);
      Arc::new(move |page: u32, page_size: usize| {
        let remote = Arc::clone(&remote);
        async move { remote.fetch_houses(page, page_size).await }.boxed()
      })
    };

    let books = CacheLayer::new(Arc::clone(&storage), scope.clone(), books_fetcher)
      .with_page_size(options.page_size)
      .with_policy(RefreshPolicy::WhenStale(options.book_stale_time));
    let characters = CacheLayer::new(Arc::clone(&storage), scope.clone(), characters_fetcher)
      .with_page_size(options.page_size);
    let houses = CacheLayer::new(Arc::clone(&storage), scope.clone(), houses_fetcher)
      .with_page_size(options.page_size);

    Self {
      remote,
      storage,
      scope,
      books,
      characters,
      houses,
      lookup_concurrency: concurrency,
    }
  }

  pub fn books(&self) -> &CacheLayer<Book, S> {
    &self.books
  }

  pub fn characters(&self) -> &CacheLayer<Character, S> {
    &self.characters
  }

  pub fn houses(&self) -> &CacheLayer<House, S> {
    &self.houses
  }

  /// Scope running background refreshes.
  pub fn scope(&self) -> &TaskScope {
    &self.scope
  }

  /// Drop every cached row and rewind all paging state.
  pub async fn clear_cache(&self) -> Result<()> {
    self.books.clear().await?;
    self.characters.clear().await?;
    self.houses.clear().await?;

    info!("Cleared local cache");
    Ok(())
  }

  /// Resolve book URLs, from the store where possible.
  ///
  /// 1. Look every URL up locally in one query
  /// 2. Fetch the missing ones; failures and unknown URLs are skipped
  /// 3. Resolve covers for what was fetched and store it in one batch
  ///
  /// Returns the local hits (in input order) followed by the fetched books.
  pub async fn books_by_urls(&self, urls: &[String]) -> Result<Vec<Book>> {
    if urls.is_empty() {
      return Ok(Vec::new());
    }

    let mut books = self.storage.get_by_keys::<Book>(urls)?;

    let mut seen: HashSet<&str> = books.iter().map(|b| b.url.as_str()).collect();
    let missing: Vec<&str> = urls
      .iter()
      .map(String::as_str)
      .filter(|url| seen.insert(*url))
      .collect();

    if missing.is_empty() {
      return Ok(books);
    }
    debug!(
      cached = books.len(),
      missing = missing.len(),
      "Fetching uncached books"
    );

    let remote = self.remote.as_ref();
    let fetched: Vec<Book> = stream::iter(missing)
      .map(move |url| async move {
        match remote.fetch_book(url).await {
          Ok(book) => book,
          Err(e) => {
            warn!(url, "Skipping book: {:#}", e);
            None
          }
        }
      })
      .buffered(self.lookup_concurrency)
      .filter_map(|book| async move { book })
      .collect()
      .await;

    let mut fetched = attach_covers(remote, fetched, self.lookup_concurrency).await;
    self.storage.upsert_all(&mut fetched)?;

    books.extend(fetched);
    Ok(books)
  }
}

/// Resolve covers for a batch of books, at most `concurrency` at a time.
///
/// Books with a blank ISBN are never looked up. Returns once every lookup
/// finished, in input order.
async fn attach_covers(
  remote: &dyn RemoteSource,
  books: Vec<Book>,
  concurrency: usize,
) -> Vec<Book> {
  stream::iter(books)
    .map(move |mut book| async move {
      book.cover_image_url = if book.isbn.trim().is_empty() {
        None
      } else {
        remote.fetch_cover(&book.isbn).await
      };
      book
    })
    .buffered(concurrency.max(1))
    .collect()
    .await
}
