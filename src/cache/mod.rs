//! Local cache for offline support and fewer network round-trips.
//!
//! This module provides a generic caching mechanism that:
//! - Stores named collections of records, each replaced wholesale on write
//! - Tracks when each collection was last written, for freshness checks
//! - Supports lookups by id and by declared index fields
//! - Provides basic offline mode (serve stale cache when network unavailable)

mod layer;
mod schema;
mod storage;
mod store;
mod traits;

pub use layer::CacheLayer;
pub use schema::{PROJECTS, WORKLOGS, WORK_PACKAGES};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheResult, CacheSource, Cacheable};
