#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Loads signed applications into an execution engine
//!
//! A load resolves a manifest (pinned in the cache, shipped in an embedded
//! directory, or downloaded), verifies its signature, then fetches every
//! module concurrently under a download limit while handing them to the
//! engine strictly in dependency order. Successful network loads are pinned
//! in the [`hotload_cache::ContentCache`]; failed ones fall back to the
//! previously pinned release.
//!
//! The engine itself is supplied by the embedder through [`EngineFactory`]
//! and runs on a dedicated worker thread per load.

mod engine;
mod fetcher;
mod freshness;
mod loader;
mod receiver;
mod result;
mod runner;
mod setup;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{EngineFactory, EngineHandle, ExecutionEngine};
pub use fetcher::{CachingFetcher, EmbeddedFetcher, Fetcher, HttpFetcher, ModuleRequest};
pub use freshness::{FreshnessChecker, MaxAgeFreshnessChecker, NeverFresh};
pub use loader::{ModuleLoader, ModuleLoaderBuilder};
pub use receiver::{DirectoryReceiver, EngineReceiver, ModuleReceiver};
pub use result::{LoadResult, LoadedApplication};
pub use setup::{freshness_from_config, open_cache, verifier_from_config};
