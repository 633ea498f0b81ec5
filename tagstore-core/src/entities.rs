//! Entity types: tags, tag requests and the attribute vocabulary used by
//! single-attribute updates.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Entity discriminator used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Tag,
    Request,
}

/// Where a tag is rendered relative to the owner's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    Prefix,
    Suffix,
    Both,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prefix" => Ok(Self::Prefix),
            "suffix" => Ok(Self::Suffix),
            "both" => Ok(Self::Both),
            other => Err(ValidationError::InvalidValue {
                field: "kind".to_string(),
                reason: format!("unknown tag kind '{}'", other),
            }),
        }
    }
}

/// A named display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique identifier
    pub name: String,
    /// Rendered text
    pub display: String,
    pub kind: TagKind,
    pub visible: bool,
    pub color_flag: bool,
    /// Opaque icon reference
    pub icon: String,
    /// Sort weight
    pub weight: i32,
}

impl Tag {
    /// Create a visible tag with default presentation settings.
    pub fn new(name: impl Into<String>, display: impl Into<String>, kind: TagKind) -> Self {
        Self {
            name: name.into(),
            display: display.into(),
            kind,
            visible: true,
            color_flag: false,
            icon: String::new(),
            weight: 0,
        }
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_color_flag(mut self, color_flag: bool) -> Self {
        self.color_flag = color_flag;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Check that the tag can be persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.display.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "display".to_string(),
            });
        }
        Ok(())
    }

    /// Owner encoded in the tag name, if it follows the owner-slot convention.
    pub fn owner(&self) -> Option<Uuid> {
        owner_of(&self.name)
    }

    /// Apply a single attribute change. The value must already have passed
    /// [`TagAttribute::check_value`].
    pub fn apply(&mut self, attribute: TagAttribute, value: &AttributeValue) -> Result<(), ValidationError> {
        attribute.check_value(value)?;
        match (attribute, value) {
            (TagAttribute::Display, AttributeValue::Text(text)) => self.display = text.clone(),
            (TagAttribute::Icon, AttributeValue::Text(text)) => self.icon = text.clone(),
            (TagAttribute::Kind, AttributeValue::Kind(kind)) => self.kind = *kind,
            (TagAttribute::Visible, AttributeValue::Flag(flag)) => self.visible = *flag,
            (TagAttribute::ColorFlag, AttributeValue::Flag(flag)) => self.color_flag = *flag,
            (TagAttribute::Weight, AttributeValue::Int(weight)) => self.weight = *weight,
            _ => unreachable!("check_value accepted a mismatched attribute value"),
        }
        Ok(())
    }
}

/// Validate a tag name: non-empty, no whitespace.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidValue {
            field: "name".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }
    Ok(())
}

/// A pending request by an owner for a custom tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRequest {
    pub id: i64,
    pub owner_id: Uuid,
    pub owner_name: String,
    pub requested_display: String,
}

impl TagRequest {
    pub fn new(
        id: i64,
        owner_id: Uuid,
        owner_name: impl Into<String>,
        requested_display: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            owner_name: owner_name.into(),
            requested_display: requested_display.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requested_display.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "requested_display".to_string(),
            });
        }
        if self.owner_name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "owner_name".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// Tag attributes that can be updated one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagAttribute {
    Display,
    Kind,
    Visible,
    ColorFlag,
    Icon,
    Weight,
}

impl TagAttribute {
    pub const ALL: [TagAttribute; 6] = [
        Self::Display,
        Self::Kind,
        Self::Visible,
        Self::ColorFlag,
        Self::Icon,
        Self::Weight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Kind => "kind",
            Self::Visible => "visible",
            Self::ColorFlag => "color_flag",
            Self::Icon => "icon",
            Self::Weight => "weight",
        }
    }

    /// Reject a value whose shape does not fit this attribute.
    pub fn check_value(&self, value: &AttributeValue) -> Result<(), ValidationError> {
        let expected = match self {
            Self::Display | Self::Icon => "text",
            Self::Kind => "kind",
            Self::Visible | Self::ColorFlag => "flag",
            Self::Weight => "int",
        };
        if value.shape() != expected {
            return Err(ValidationError::AttributeTypeMismatch {
                attribute: self.as_str().to_string(),
                expected: expected.to_string(),
            });
        }
        if *self == Self::Display {
            if let AttributeValue::Text(text) = value {
                if text.trim().is_empty() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "display".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for TagAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagAttribute {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "display" => Ok(Self::Display),
            "kind" => Ok(Self::Kind),
            "visible" => Ok(Self::Visible),
            "color" | "color_flag" => Ok(Self::ColorFlag),
            "icon" => Ok(Self::Icon),
            "weight" => Ok(Self::Weight),
            _ => Err(ValidationError::UnknownAttribute {
                name: s.to_string(),
            }),
        }
    }
}

/// New value for a single-attribute update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Kind(TagKind),
    Flag(bool),
    Int(i32),
}

impl AttributeValue {
    fn shape(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Kind(_) => "kind",
            Self::Flag(_) => "flag",
            Self::Int(_) => "int",
        }
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Filter for tag listings. Each distinct filter is cached under its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagFilter {
    All,
    Visible,
    /// Tags usable in the given position (`Both` always qualifies)
    Kind(TagKind),
}

impl TagFilter {
    /// Stable identifier used in cache keys.
    pub fn identifier(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Visible => "visible".to_string(),
            Self::Kind(kind) => format!("kind:{}", kind),
        }
    }

    pub fn matches(&self, tag: &Tag) -> bool {
        match self {
            Self::All => true,
            Self::Visible => tag.visible,
            Self::Kind(kind) => tag.kind == *kind || tag.kind == TagKind::Both,
        }
    }
}

// ============================================================================
// OWNER-SLOT NAMING
// ============================================================================

/// Build the name of an owner's custom tag: `<owner-uuid>_<slot>`.
pub fn owner_slot_name(owner: Uuid, slot: u32) -> String {
    format!("{}_{}", owner, slot)
}

/// Parse the owner out of a tag name following the owner-slot convention.
pub fn owner_of(name: &str) -> Option<Uuid> {
    let (owner, slot) = name.rsplit_once('_')?;
    let slot: u32 = slot.parse().ok()?;
    if slot == 0 {
        return None;
    }
    Uuid::parse_str(owner).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_validate() {
        assert!(Tag::new("vip", "[VIP]", TagKind::Prefix).validate().is_ok());
        assert!(matches!(
            Tag::new("", "[VIP]", TagKind::Prefix).validate(),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            Tag::new("v ip", "[VIP]", TagKind::Prefix).validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(Tag::new("vip", "  ", TagKind::Prefix).validate().is_err());
    }

    #[test]
    fn test_request_validate() {
        let owner = Uuid::new_v4();
        assert!(TagRequest::new(1, owner, "steve", "[Builder]").validate().is_ok());
        assert!(TagRequest::new(1, owner, "steve", "").validate().is_err());
        assert!(TagRequest::new(1, owner, "", "[Builder]").validate().is_err());
    }

    #[test]
    fn test_attribute_parse() {
        assert_eq!("Display".parse::<TagAttribute>().unwrap(), TagAttribute::Display);
        assert_eq!("color".parse::<TagAttribute>().unwrap(), TagAttribute::ColorFlag);
        assert_eq!("color_flag".parse::<TagAttribute>().unwrap(), TagAttribute::ColorFlag);
        assert!(matches!(
            "permission".parse::<TagAttribute>(),
            Err(ValidationError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_attribute_check_value() {
        assert!(TagAttribute::Weight.check_value(&AttributeValue::Int(3)).is_ok());
        assert!(matches!(
            TagAttribute::Weight.check_value(&AttributeValue::Flag(true)),
            Err(ValidationError::AttributeTypeMismatch { .. })
        ));
        assert!(TagAttribute::Display
            .check_value(&AttributeValue::Text(String::new()))
            .is_err());
        assert!(TagAttribute::Icon
            .check_value(&AttributeValue::Text(String::new()))
            .is_ok());
    }

    #[test]
    fn test_tag_apply() {
        let mut tag = Tag::new("vip", "[VIP]", TagKind::Prefix);
        tag.apply(TagAttribute::Display, &AttributeValue::Text("[V]".into()))
            .unwrap();
        tag.apply(TagAttribute::Kind, &AttributeValue::Kind(TagKind::Both))
            .unwrap();
        tag.apply(TagAttribute::Visible, &AttributeValue::Flag(false))
            .unwrap();
        tag.apply(TagAttribute::Weight, &AttributeValue::Int(7)).unwrap();
        assert_eq!(tag.display, "[V]");
        assert_eq!(tag.kind, TagKind::Both);
        assert!(!tag.visible);
        assert_eq!(tag.weight, 7);

        assert!(tag
            .apply(TagAttribute::Visible, &AttributeValue::Int(1))
            .is_err());
    }

    #[test]
    fn test_filter_matches() {
        let prefix = Tag::new("a", "A", TagKind::Prefix);
        let both = Tag::new("b", "B", TagKind::Both).with_visible(false);

        assert!(TagFilter::All.matches(&both));
        assert!(TagFilter::Visible.matches(&prefix));
        assert!(!TagFilter::Visible.matches(&both));
        assert!(TagFilter::Kind(TagKind::Suffix).matches(&both));
        assert!(!TagFilter::Kind(TagKind::Suffix).matches(&prefix));
        assert_eq!(TagFilter::Kind(TagKind::Prefix).identifier(), "kind:prefix");
    }

    #[test]
    fn test_owner_slot_naming() {
        let owner = Uuid::new_v4();
        let name = owner_slot_name(owner, 3);
        assert_eq!(owner_of(&name), Some(owner));
        assert_eq!(owner_of("vip"), None);
        assert_eq!(owner_of("not-a-uuid_2"), None);
        assert_eq!(owner_of(&format!("{}_0", owner)), None);
        assert_eq!(owner_of(&format!("{}_x", owner)), None);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any owner and positive slot parse back to the same owner.
        #[test]
        fn prop_owner_slot_name_parses_back(
            bytes in any::<[u8; 16]>(),
            slot in 1u32..10_000
        ) {
            let owner = Uuid::from_bytes(bytes);
            prop_assert_eq!(owner_of(&owner_slot_name(owner, slot)), Some(owner));
        }

        /// Names without an underscore never encode an owner.
        #[test]
        fn prop_plain_names_have_no_owner(name in "[a-z0-9-]{1,40}") {
            prop_assert_eq!(owner_of(&name), None);
        }

        /// Attribute names are parsed case-insensitively.
        #[test]
        fn prop_attribute_parse_case_insensitive(idx in 0usize..6, upper in any::<bool>()) {
            let attribute = TagAttribute::ALL[idx];
            let raw = if upper {
                attribute.as_str().to_uppercase()
            } else {
                attribute.as_str().to_string()
            };
            prop_assert_eq!(raw.parse::<TagAttribute>().unwrap(), attribute);
        }
    }
}
