#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Durable content-addressed cache for hotload
//!
//! Module and manifest bytes are stored as `entry-<id>.bin` files next to a
//! SQLite index that tracks each entry's state, size, recency and the
//! applications pinning it. The uniqueness of `sha256_hex` in the index is
//! the only write lock: whoever inserts the DIRTY row owns the write.
//!
//! Disk failures never escape a write; they degrade it to "not cached" and
//! are reported through [`hotload_events::EventListener::cache_storage_failed`].

mod cache;
pub mod db;
pub mod fs;

pub use cache::{CacheBuilder, ContentCache};
pub use db::{create_pool, run_migrations, CacheEntry};
pub use fs::{CacheFileSystem, FaultInjectingFileSystem, TokioFileSystem};
