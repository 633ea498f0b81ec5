//! Time-bounded read cache in front of persistence.
//!
//! Entries are keyed by [`CacheKey`] (a category plus an identifier) and carry
//! an absolute expiry. An expired entry is never returned: it reads exactly
//! like an absent one and is removed lazily on access or by the periodic
//! sweep.
//!
//! # Invalidation
//!
//! Writes never update cached values in place. A committed write calls
//! [`CacheService::invalidate_tag`] (or [`CacheService::invalidate_requests`]),
//! which removes every key that could observe the written entity: its own
//! cross-index entries, every filtered list, and the owner's derived count.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheService::new(CacheConfig::default());
//!
//! let display = cache.get_or_load(
//!     CacheKey::tag_display("vip"),
//!     || Ok(storage.tag_get("vip")?.map(|t| t.display)),
//!     None,
//! )?;
//!
//! // After a committed write
//! cache.invalidate_tag("vip");
//! ```

pub mod entry;
pub mod key;
pub mod service;
pub mod value;

pub use entry::CacheEntry;
pub use key::{CacheCategory, CacheKey};
pub use service::{CacheConfig, CacheService, CacheStats};
pub use value::{Cacheable, CachedValue};
