//! Error types for tagstore operations

use crate::EntityKind;
use thiserror::Error;

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity:?} with key {key}")]
    NotFound { entity: EntityKind, key: String },

    #[error("Insert failed for {entity:?}: {reason}")]
    InsertFailed { entity: EntityKind, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Validation errors. These are raised before a write reaches a queue or the
/// worker pool and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown tag attribute: {name}")]
    UnknownAttribute { name: String },

    #[error("Attribute {attribute} expects a {expected} value")]
    AttributeTypeMismatch { attribute: String, expected: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Engine runtime errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine is shut down")]
    ShutDown,

    #[error("Worker task panicked: {reason}")]
    TaskPanicked { reason: String },

    #[error("Completion callback dropped before the write finished")]
    CallbackDropped,

    #[error("Failed to start runtime: {reason}")]
    RuntimeStart { reason: String },
}

/// Master error type for all tagstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagstoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl TagstoreError {
    /// True for failures that came from persistence and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for tagstore operations.
pub type TagResult<T> = Result<T, TagstoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity: EntityKind::Tag,
            key: "vip".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Tag"));
        assert!(msg.contains("vip"));
    }

    #[test]
    fn test_validation_error_display_unknown_attribute() {
        let err = ValidationError::UnknownAttribute {
            name: "colour".to_string(),
        };
        assert!(format!("{}", err).contains("colour"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "batching.size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("batching.size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_tagstore_error_from_variants() {
        let storage = TagstoreError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, TagstoreError::Storage(_)));
        assert!(storage.is_transient());

        let validation = TagstoreError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, TagstoreError::Validation(_)));
        assert!(!validation.is_transient());

        let config = TagstoreError::from(ConfigError::Parse {
            reason: "bad toml".to_string(),
        });
        assert!(matches!(config, TagstoreError::Config(_)));

        let engine = TagstoreError::from(EngineError::ShutDown);
        assert!(matches!(engine, TagstoreError::Engine(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let err = StorageError::LockPoisoned;
        assert!(format!("{}", err).contains("lock poisoned"));
    }
}
