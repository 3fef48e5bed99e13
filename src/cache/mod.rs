//! Image cache module
//!
//! Provides:
//! - Content-addressed image storage on local disk
//! - Cache key validation for the public retrieval path
//! - Bounded retention (entry count, total bytes, age)
//! - Thumbnails rendered on demand

mod key;
mod store;
mod thumbnail;

pub use key::{validate_key, KeyError, KEY_MAX_LEN};
pub use store::{
    CacheEntry, CacheError, CacheStats, CleanupReport, EntryMetadata, ImageCache,
    RetentionPolicy,
};
pub use thumbnail::{ThumbnailError, THUMBNAIL_EDGE};
