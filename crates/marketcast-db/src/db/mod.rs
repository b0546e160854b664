//! Upload event repositories
//
// Cache contract and error type
mod cache;
//
// PostgreSQL repository
pub mod upload_event;
//
// Process-local store for tests and local runs
pub mod memory;

pub use cache::{create_upload_event_cache, CacheError, CacheResult, UploadEventCache};
pub use memory::InMemoryUploadEventCache;
pub use upload_event::PgUploadEventCache;
