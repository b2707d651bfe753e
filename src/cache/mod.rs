//! Generic offline-first caching layer.
//!
//! This module is catalogue-agnostic. It provides:
//! - A SQLite table per entity type keyed by source URL, with live change
//!   notification
//! - Paged reads served from the local store, refreshed from the network in
//!   the background
//! - Per-collection paging cursors and exhaustion tracking
//! - A repository-owned scope for detached background work

mod layer;
mod scope;
mod storage;
mod traits;

pub use layer::{CacheLayer, PageFetcher, RefreshPolicy, DEFAULT_PAGE_SIZE, FIRST_PAGE};
pub use scope::TaskScope;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::Cacheable;
