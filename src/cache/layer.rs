//! Cache layer that reconciles a paginated remote collection with local storage.

use chrono::{Duration, Utc};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::scope::TaskScope;
use super::storage::CacheStorage;
use super::traits::Cacheable;

/// Rows per local page and per remote request.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// The remote API numbers pages from 1.
pub const FIRST_PAGE: u32 = 1;

/// Fetches one remote page: `(page, page_size) -> entities`.
pub type PageFetcher<T> =
  Arc<dyn Fn(u32, usize) -> BoxFuture<'static, Result<Vec<T>>> + Send + Sync>;

/// When a read should kick off a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
  /// Every stream subscription and every non-empty `get`
  Always,
  /// Only when the table is empty or its newest row is older than the
  /// threshold. A stale table re-fetches the first remote page.
  WhenStale(Duration),
}

/// Paging state shared by every clone of a layer.
struct Paging {
  /// Next remote page to request. Held for the whole fetch-and-write, so
  /// refreshes of one resource never overlap.
  page: Mutex<u32>,
  has_more: AtomicBool,
}

/// Offline-first cache for one remote collection.
///
/// Reads are always answered from the local store. The layer decides when the
/// remote collection should be paged in, merges fetched pages into the store
/// and tracks how far through the collection it has got.
pub struct CacheLayer<T: Cacheable, S: CacheStorage> {
  storage: Arc<S>,
  scope: TaskScope,
  fetcher: PageFetcher<T>,
  paging: Arc<Paging>,
  page_size: usize,
  policy: RefreshPolicy,
}

impl<T: Cacheable, S: CacheStorage + 'static> CacheLayer<T, S> {
  /// Create a new cache layer over `storage`, paging from `fetcher`.
  pub fn new(storage: Arc<S>, scope: TaskScope, fetcher: PageFetcher<T>) -> Self {
    Self {
      storage,
      scope,
      fetcher,
      paging: Arc::new(Paging {
        page: Mutex::new(FIRST_PAGE),
        has_more: AtomicBool::new(true),
      }),
      page_size: DEFAULT_PAGE_SIZE,
      policy: RefreshPolicy::Always,
    }
  }

  /// Set the page size used for local reads and remote requests.
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  /// Set when reads trigger a background refresh.
  pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Live snapshots of the whole table, ordered by name.
  ///
  /// The first snapshot is the current table; another follows every
  /// mutation of the table. Subscribing schedules a background refresh
  /// according to the layer's policy.
  pub fn stream(&self) -> Result<BoxStream<'static, Vec<T>>> {
    // Subscribe before scheduling so the refresh's write is observed
    let changes = self.storage.subscribe::<T>()?;
    self.schedule_refresh();

    let storage = Arc::clone(&self.storage);
    let snapshots = stream::unfold(
      (storage, changes, true),
      |(storage, mut changes, mut first)| async move {
        loop {
          if !first && changes.changed().await.is_err() {
            return None;
          }
          first = false;

          match storage.read_all::<T>() {
            Ok(rows) => return Some((rows, (storage, changes, false))),
            Err(e) => warn!(entity = T::entity_type(), "Failed to read snapshot: {:#}", e),
          }
        }
      },
    );

    Ok(snapshots.boxed())
  }

  /// Read the first page.
  ///
  /// 1. Read the first local page
  /// 2. If it is empty, refresh from the network and read again
  /// 3. Otherwise return it and refresh in the background
  pub async fn get(&self) -> Result<Vec<T>> {
    let local = self.storage.read_page::<T>(self.page_size, 0)?;

    if local.is_empty() {
      debug!(
        entity = T::entity_type(),
        "Local cache empty, fetching synchronously"
      );
      self.refresh().await;
      return self.storage.read_page::<T>(self.page_size, 0);
    }

    self.schedule_refresh();
    Ok(local)
  }

  /// Read the page after everything currently visible.
  ///
  /// A short page while the remote collection is not exhausted pulls in the
  /// next remote page before reading again at the same offset.
  pub async fn load_more(&self) -> Result<Vec<T>> {
    let offset = self.storage.count::<T>()?;
    let local = self.storage.read_page::<T>(self.page_size, offset)?;

    if local.len() < self.page_size && self.has_more() {
      self.refresh().await;
      return self.storage.read_page::<T>(self.page_size, offset);
    }

    Ok(local)
  }

  /// Fetch the page at the cursor and merge it into the store.
  ///
  /// Never fails: remote and storage errors are logged and treated as
  /// "nothing new this time".
  pub async fn refresh(&self) {
    if let Err(e) = self.try_refresh().await {
      warn!(entity = T::entity_type(), "Refresh failed: {:#}", e);
    }
  }

  /// Whether the remote collection may still have unseen pages.
  pub fn has_more(&self) -> bool {
    self.paging.has_more.load(Ordering::SeqCst)
  }

  /// Next remote page the layer will request.
  pub async fn current_page(&self) -> u32 {
    *self.paging.page.lock().await
  }

  /// Local lookup by key. Never goes to the network.
  pub fn get_by_url(&self, url: &str) -> Result<Option<T>> {
    self.storage.get_by_key::<T>(url)
  }

  /// Delete every cached row and rewind paging to the start.
  ///
  /// Waits for an in-flight refresh of this resource to finish first; it is
  /// not cancelled.
  pub async fn clear(&self) -> Result<()> {
    let mut page = self.paging.page.lock().await;
    *page = FIRST_PAGE;
    self.paging.has_more.store(true, Ordering::SeqCst);

    self.storage.delete_all::<T>()
  }

  /// Whether the newest cached row is older than `stale_time`. An empty table
  /// is always stale.
  fn is_stale(&self, stale_time: Duration) -> Result<bool> {
    Ok(match self.storage.max_last_updated::<T>()? {
      Some(newest) => Utc::now().timestamp_millis() - newest > stale_time.num_milliseconds(),
      None => true,
    })
  }

  fn schedule_refresh(&self) {
    let layer = self.clone();
    self.scope.spawn(T::entity_type(), async move {
      match layer.policy {
        RefreshPolicy::Always => layer.refresh().await,
        RefreshPolicy::WhenStale(stale_time) if layer.is_stale(stale_time)? => {
          layer.revalidate().await
        }
        RefreshPolicy::WhenStale(_) => {
          debug!(entity = T::entity_type(), "Cache is fresh, skipping refresh")
        }
      }
      Ok(())
    });
  }

  /// Re-fetch the first remote page regardless of the cursor and the
  /// exhaustion flag. A cursor still at the first page moves on exactly as
  /// `refresh` would move it.
  async fn revalidate(&self) {
    if let Err(e) = self.try_revalidate().await {
      warn!(entity = T::entity_type(), "Revalidation failed: {:#}", e);
    }
  }

  async fn try_refresh(&self) -> Result<()> {
    let entity = T::entity_type();
    let mut page = self.paging.page.lock().await;

    if !self.has_more() {
      debug!(entity, "Remote collection exhausted, skipping refresh");
      return Ok(());
    }

    if self.merge_page(*page).await? == 0 {
      info!(entity, page = *page, "Reached end of remote collection");
      self.paging.has_more.store(false, Ordering::SeqCst);
      return Ok(());
    }

    *page += 1;
    Ok(())
  }

  async fn try_revalidate(&self) -> Result<()> {
    let mut page = self.paging.page.lock().await;
    let merged = self.merge_page(FIRST_PAGE).await?;

    if *page == FIRST_PAGE {
      if merged == 0 {
        self.paging.has_more.store(false, Ordering::SeqCst);
      } else {
        *page += 1;
      }
    }
    Ok(())
  }

  /// Fetch `page` and write it to the store. Returns the number of rows
  /// merged; 0 means the remote page was empty.
  ///
  /// Callers hold the paging lock.
  async fn merge_page(&self, page: u32) -> Result<usize> {
    let entity = T::entity_type();

    debug!(entity, page, "Fetching remote page");
    let mut fetched = (self.fetcher)(page, self.page_size)
      .await
      .wrap_err_with(|| format!("Failed to fetch {} page {}", entity, page))?;

    if fetched.is_empty() {
      return Ok(0);
    }

    self.storage.upsert_all(&mut fetched)?;

    debug!(entity, page, count = fetched.len(), "Merged remote page");
    Ok(fetched.len())
  }
}

impl<T: Cacheable, S: CacheStorage> Clone for CacheLayer<T, S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      scope: self.scope.clone(),
      fetcher: Arc::clone(&self.fetcher),
      paging: Arc::clone(&self.paging),
      page_size: self.page_size,
      policy: self.policy,
    }
  }
}
