//! Catalogue domain: records, remote client and the cached repository.

mod api_types;
mod assembler;
mod cache;
mod client;
mod repository;
mod types;

pub use client::{IceAndFireClient, RemoteSource};
pub use repository::{RepositoryOptions, WikiRepository};
pub use types::{Book, Character, CharacterWithBooks, House};
