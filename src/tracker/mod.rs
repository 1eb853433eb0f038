//! Durable per-album tracker state.
//!
//! Each album has append-only text ledgers (`sent`, `failed`, `converted`)
//! per run mode. The ledgers are the only persisted authority on what has
//! been processed; the in-memory sets are rebuilt from them on every open and
//! updated write-through.

pub mod error;
mod ledger;
pub mod store;

pub use error::TrackerError;
pub use store::{AlbumPaths, TrackerStore};
