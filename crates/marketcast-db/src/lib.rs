//! Marketcast idempotency cache
//!
//! The cache is the single source of truth for whether an object key was
//! already processed. Duplicate notifications consult it before doing any
//! work, and every worker that reaches a terminal outcome writes to it.

pub mod db;

pub use db::{
    create_upload_event_cache, CacheError, CacheResult, InMemoryUploadEventCache,
    PgUploadEventCache, UploadEventCache,
};
