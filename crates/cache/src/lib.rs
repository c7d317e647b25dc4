//! Content-addressed task output caching for taskmemo
//!
//! This crate provides the persistence side of task memoization:
//! - [`Fingerprint`]: the cache key of a task instance
//! - [`LocalStore`]: entries and deduplicated output blobs on this machine,
//!   bounded by size in least-recently-used order
//! - [`RemoteStore`]: a shared tier over HTTP or a shared directory
//! - [`CacheStore`]: local then remote lookup with promotion of remote hits
//! - [`RunHistory`]: per-project record of each task's last successful run
//! - garbage collection and cache root resolution
//!
//! # Layout
//!
//! ```text
//! {cache_root}/
//!   cas/ab/cd/abcd...                 output blobs
//!   entries/{fingerprint}/metadata.json
//!   history/{project_hash}.json
//! ```

pub mod archive;
pub mod cas;
pub mod entry;
mod error;
pub mod fingerprint;
pub mod gc;
pub mod history;
pub mod local;
pub mod remote;
pub mod retry;
pub mod root;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use cas::{BlobId, CasStore, sha256_file, write_atomic};
pub use entry::{CacheEntry, OutputFile, safe_relative_path};
pub use fingerprint::{FINGERPRINT_VERSION, Fingerprint, FingerprintBuilder};
pub use gc::{GcPolicy, GcResult};
pub use history::{ProjectHistory, RunHistory, TaskRecord, project_hash};
pub use local::{LocalStore, PutOutcome};
pub use remote::{DirectoryRemoteStore, HttpRemoteStore, RemoteStore};
pub use retry::RetryConfig;
pub use root::{CACHE_DIR_ENV, CacheRootInputs, resolve_cache_root};
pub use store::{CacheStats, CacheStore};
