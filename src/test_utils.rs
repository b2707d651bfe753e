//! Record builders and a scripted remote for unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::cache::{SqliteStorage, TaskScope};
use crate::wiki::{Book, Character, House, RemoteSource, RepositoryOptions, WikiRepository};

pub fn book(url: &str, name: &str, isbn: &str) -> Book {
  Book {
    url: url.to_string(),
    name: name.to_string(),
    isbn: isbn.to_string(),
    ..Default::default()
  }
}

pub fn character(url: &str, name: &str) -> Character {
  Character {
    url: url.to_string(),
    name: name.to_string(),
    ..Default::default()
  }
}

pub fn house(url: &str, name: &str) -> House {
  House {
    url: url.to_string(),
    name: name.to_string(),
    ..Default::default()
  }
}

type Pages<T> = Mutex<VecDeque<Result<Vec<T>, String>>>;

/// In-memory [`RemoteSource`].
///
/// Collection pages are served from per-collection queues in push order; an
/// empty queue serves empty pages. Every call is logged as `kind:arg`
/// (`books:1`, `book:<url>`, `cover:<isbn>`).
#[derive(Default)]
pub struct FakeRemote {
  books: Pages<Book>,
  characters: Pages<Character>,
  houses: Pages<House>,
  by_url: Mutex<HashMap<String, Book>>,
  failing: Mutex<HashSet<String>>,
  covers: Mutex<HashMap<String, String>>,
  calls: Mutex<Vec<String>>,
}

impl FakeRemote {
  pub fn push_books(&self, page: Result<Vec<Book>, String>) {
    self.books.lock().unwrap().push_back(page);
  }

  pub fn push_characters(&self, page: Result<Vec<Character>, String>) {
    self.characters.lock().unwrap().push_back(page);
  }

  pub fn push_houses(&self, page: Result<Vec<House>, String>) {
    self.houses.lock().unwrap().push_back(page);
  }

  /// Serve `book` from `fetch_book` under its URL.
  pub fn add_book(&self, book: Book) {
    self.by_url.lock().unwrap().insert(book.url.clone(), book);
  }

  /// Make `fetch_book(url)` fail.
  pub fn fail_book(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn set_cover(&self, isbn: &str, cover: &str) {
    self
      .covers
      .lock()
      .unwrap()
      .insert(isbn.to_string(), cover.to_string());
  }

  /// Number of logged calls starting with `prefix`.
  pub fn calls(&self, prefix: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|call| call.starts_with(prefix))
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }

  fn next_page<T>(queue: &Pages<T>) -> Result<Vec<T>> {
    match queue.lock().unwrap().pop_front() {
      Some(Ok(rows)) => Ok(rows),
      Some(Err(message)) => Err(eyre!(message)),
      None => Ok(Vec::new()),
    }
  }
}

#[async_trait]
impl RemoteSource for FakeRemote {
  async fn fetch_books(&self, page: u32, _page_size: usize) -> Result<Vec<Book>> {
    self.record(format!("books:{}", page));
    Self::next_page(&self.books)
  }

  async fn fetch_characters(&self, page: u32, _page_size: usize) -> Result<Vec<Character>> {
    self.record(format!("characters:{}", page));
    Self::next_page(&self.characters)
  }

  async fn fetch_houses(&self, page: u32, _page_size: usize) -> Result<Vec<House>> {
    self.record(format!("houses:{}", page));
    Self::next_page(&self.houses)
  }

  async fn fetch_book(&self, url: &str) -> Result<Option<Book>> {
    self.record(format!("book:{}", url));
    if self.failing.lock().unwrap().contains(url) {
      return Err(eyre!("connection reset fetching {}", url));
    }
    Ok(self.by_url.lock().unwrap().get(url).cloned())
  }

  async fn fetch_cover(&self, isbn: &str) -> Option<String> {
    self.record(format!("cover:{}", isbn));
    self.covers.lock().unwrap().get(isbn).cloned()
  }
}

/// Repository over an in-memory store and `remote`, on the test runtime.
pub fn repository(remote: FakeRemote) -> (WikiRepository<SqliteStorage>, Arc<FakeRemote>) {
  repository_with(remote, RepositoryOptions::default())
}

pub fn repository_with(
  remote: FakeRemote,
  options: RepositoryOptions,
) -> (WikiRepository<SqliteStorage>, Arc<FakeRemote>) {
  let remote = Arc::new(remote);
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let repo = WikiRepository::new(
    Arc::clone(&remote) as Arc<dyn RemoteSource>,
    storage,
    TaskScope::current().unwrap(),
    options,
  );
  (repo, remote)
}
