//! Cache Module
//!
//! The in-memory table behind the `memory` driver: entries with absolute
//! expiry, lazy eviction on read and chunked sweeping of expired entries.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Entries removed per lock acquisition by the background sweep
pub const DEFAULT_SWEEP_CHUNK: usize = 1024;
