//! tagstore Core - Entity Types
//!
//! Pure data structures shared by every tagstore crate: the tag and request
//! model, the error taxonomy and the configuration surface.
//! This crate contains ONLY data types - no I/O.

pub mod config;
pub mod constants;
pub mod entities;
pub mod error;

pub use config::{BatchSettings, CacheSettings, TagstoreConfig, WorkerSettings};
pub use entities::{
    owner_of, owner_slot_name, validate_name, AttributeValue, EntityKind, Tag, TagAttribute,
    TagFilter, TagKind, TagRequest,
};
pub use error::{
    ConfigError, EngineError, StorageError, TagResult, TagstoreError, ValidationError,
};
