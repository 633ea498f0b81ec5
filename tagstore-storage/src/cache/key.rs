//! Composite cache keys.

use std::fmt;
use tagstore_core::TagFilter;
use uuid::Uuid;

/// What a cache entry holds. Invalidation works per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Tag list for one filter
    TagList,
    /// Display text keyed by tag name
    TagDisplay,
    /// Tag name keyed by display text
    TagName,
    /// Number of tags an owner holds
    OwnerCount,
    /// Whole tag keyed by name
    TagByName,
    /// All pending requests
    RequestList,
    /// Caller-defined entries
    Custom,
}

impl CacheCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TagList => "tag-list",
            Self::TagDisplay => "tag-display",
            Self::TagName => "tag-name",
            Self::OwnerCount => "owner-count",
            Self::TagByName => "tag",
            Self::RequestList => "request-list",
            Self::Custom => "custom",
        }
    }
}

/// Immutable key compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: CacheCategory,
    identifier: String,
}

impl CacheKey {
    pub fn new(category: CacheCategory, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
        }
    }

    pub fn tag_list(filter: TagFilter) -> Self {
        Self::new(CacheCategory::TagList, filter.identifier())
    }

    pub fn tag_display(name: &str) -> Self {
        Self::new(CacheCategory::TagDisplay, name)
    }

    pub fn tag_name(display: &str) -> Self {
        Self::new(CacheCategory::TagName, display)
    }

    pub fn owner_count(owner: Uuid) -> Self {
        Self::new(CacheCategory::OwnerCount, owner.to_string())
    }

    pub fn tag(name: &str) -> Self {
        Self::new(CacheCategory::TagByName, name)
    }

    pub fn request_list() -> Self {
        Self::new(CacheCategory::RequestList, "all")
    }

    pub fn custom(identifier: impl Into<String>) -> Self {
        Self::new(CacheCategory::Custom, identifier)
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.as_str(), self.identifier)
    }
}
