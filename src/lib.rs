//! Offline-first client for the An API of Ice and Fire catalogue.
//!
//! Books, characters and houses are paged in from the public API and kept in
//! a local SQLite cache. Reads are answered from the cache and refreshed in
//! the background.

pub mod cache;
pub mod config;
pub mod logging;
pub mod wiki;

#[cfg(test)]
mod test_utils;
