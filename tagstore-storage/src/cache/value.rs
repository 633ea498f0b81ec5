//! Typed values stored in the cache.

use std::sync::Arc;
use tagstore_core::{Tag, TagRequest};

/// Every shape of value the cache holds. Lists sit behind `Arc` so cloning a
/// `CachedValue` is cheap; reading one back as a `Vec` still copies it.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Text(String),
    Count(u64),
    Tag(Tag),
    Tags(Arc<Vec<Tag>>),
    Requests(Arc<Vec<TagRequest>>),
}

/// Types that can be stored in and read back from the cache.
pub trait Cacheable: Clone + Send + 'static {
    fn into_cached(self) -> CachedValue;

    /// Read the value back; `None` if the entry holds another shape.
    fn from_cached(value: &CachedValue) -> Option<Self>;
}

impl Cacheable for String {
    fn into_cached(self) -> CachedValue {
        CachedValue::Text(self)
    }

    fn from_cached(value: &CachedValue) -> Option<Self> {
        match value {
            CachedValue::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

impl Cacheable for u64 {
    fn into_cached(self) -> CachedValue {
        CachedValue::Count(self)
    }

    fn from_cached(value: &CachedValue) -> Option<Self> {
        match value {
            CachedValue::Count(count) => Some(*count),
            _ => None,
        }
    }
}

impl Cacheable for Tag {
    fn into_cached(self) -> CachedValue {
        CachedValue::Tag(self)
    }

    fn from_cached(value: &CachedValue) -> Option<Self> {
        match value {
            CachedValue::Tag(tag) => Some(tag.clone()),
            _ => None,
        }
    }
}

impl Cacheable for Vec<Tag> {
    fn into_cached(self) -> CachedValue {
        CachedValue::Tags(Arc::new(self))
    }

    fn from_cached(value: &CachedValue) -> Option<Self> {
        match value {
            CachedValue::Tags(tags) => Some(tags.as_ref().clone()),
            _ => None,
        }
    }
}

impl Cacheable for Vec<TagRequest> {
    fn into_cached(self) -> CachedValue {
        CachedValue::Requests(Arc::new(self))
    }

    fn from_cached(value: &CachedValue) -> Option<Self> {
        match value {
            CachedValue::Requests(requests) => Some(requests.as_ref().clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagstore_core::TagKind;

    #[test]
    fn test_shape_mismatch_reads_as_none() {
        let cached = "text".to_string().into_cached();
        assert_eq!(String::from_cached(&cached).as_deref(), Some("text"));
        assert_eq!(u64::from_cached(&cached), None);
        assert!(Vec::<Tag>::from_cached(&cached).is_none());
    }

    #[test]
    fn test_tag_list_value() {
        let tags = vec![Tag::new("a", "A", TagKind::Prefix)];
        let cached = tags.clone().into_cached();
        assert_eq!(Vec::<Tag>::from_cached(&cached), Some(tags));
    }
}
