//! Reconciliation queries.
//!
//! A [`Query`] is immutable once built. Everything that changes the answer a
//! backend gives (text, limit, type constraint, property constraints) feeds
//! its [`QueryFingerprint`], and nothing else does.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fingerprint::{FingerprintBuilder, QueryFingerprint};
use crate::policy::property::PropertyFilter;

/// Default number of candidates requested when a query does not say.
pub const DEFAULT_LIMIT: usize = 3;

/// A reference to an entity type. Equality and hashing use `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    /// Type id in the backend's vocabulary.
    pub id: String,
    /// Optional display name. Ignored by equality.
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TypeRef {
    /// A type reference without a label.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    /// A type reference with a human readable label.
    #[must_use]
    pub fn labeled(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: Some(label.into()),
        }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// How strictly candidates must carry the requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeStrictness {
    /// Drop candidates lacking the requested type.
    #[default]
    Should,
    /// Same as `Should`.
    Must,
    /// No type filtering. Accepts `any` on the wire.
    #[serde(alias = "any")]
    None,
}

impl TypeStrictness {
    /// Stable tag used in fingerprints and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Should => "should",
            Self::Must => "must",
            Self::None => "none",
        }
    }

    /// Returns true if this strictness drops mistyped candidates.
    #[must_use]
    pub const fn filters(self) -> bool {
        matches!(self, Self::Should | Self::Must)
    }
}

impl fmt::Display for TypeStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value a property constraint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A reference to another entity.
    Id {
        /// Entity id.
        id: String,
        /// Optional display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// A numeric literal.
    Number(f64),
    /// A text literal.
    Text(String),
}

impl PropertyValue {
    /// String form used for comparison against backend values.
    #[must_use]
    pub fn as_comparable(&self) -> String {
        match self {
            Self::Id { id, .. } => id.clone(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// One `(property, expected value, options)` constraint on a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConstraint {
    /// Property id.
    #[serde(rename = "pid")]
    pub property_id: String,
    /// Value the entity should carry.
    #[serde(rename = "v")]
    pub expected: PropertyValue,
    /// How the value is compared.
    #[serde(default)]
    pub options: PropertyFilter,
}

impl PropertyConstraint {
    /// A constraint with default (hard, exact-match) options.
    #[must_use]
    pub fn new(property_id: impl Into<String>, expected: PropertyValue) -> Self {
        Self {
            property_id: property_id.into(),
            expected,
            options: PropertyFilter::default(),
        }
    }
}

/// An immutable reconciliation query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    limit: usize,
    requested_type: Option<TypeRef>,
    type_strictness: TypeStrictness,
    properties: Vec<PropertyConstraint>,
}

impl Query {
    /// A plain text query with default limit and no type constraint.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: DEFAULT_LIMIT,
            requested_type: None,
            type_strictness: TypeStrictness::Should,
            properties: Vec::new(),
        }
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// The search text as given.
    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.text
    }

    /// Maximum number of candidates to return; 0 means unlimited.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Type candidates should carry, if any.
    #[must_use]
    pub fn requested_type(&self) -> Option<&TypeRef> {
        self.requested_type.as_ref()
    }

    /// How the requested type is enforced.
    #[must_use]
    pub const fn type_strictness(&self) -> TypeStrictness {
        self.type_strictness
    }

    /// Property constraints in request order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyConstraint] {
        &self.properties
    }

    /// Cache key for this query.
    #[must_use]
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut b = FingerprintBuilder::new("query");
        b.str(&self.text);
        b.u64(self.limit as u64);
        b.opt_str(self.requested_type.as_ref().map(|t| t.id.as_str()));
        b.str(self.type_strictness.as_str());
        b.u64(self.properties.len() as u64);
        for p in &self.properties {
            b.str(&p.property_id);
            match &p.expected {
                PropertyValue::Id { id, .. } => {
                    b.tag(b'i');
                    b.str(id);
                }
                PropertyValue::Number(n) => {
                    b.tag(b'n');
                    b.u64(n.to_bits());
                }
                PropertyValue::Text(s) => {
                    b.tag(b't');
                    b.str(s);
                }
            }
            b.filter(&p.options);
        }
        b.finish()
    }
}

/// Builder for [`Query`].
///
/// # Example
/// ```rust,ignore
/// let query = Query::builder()
///     .text("Ada Lovelace")
///     .limit(5)
///     .requested_type(TypeRef::new("Person"))
///     .type_strictness(TypeStrictness::Must)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    text: Option<String>,
    limit: Option<usize>,
    requested_type: Option<TypeRef>,
    type_strictness: TypeStrictness,
    properties: Vec<PropertyConstraint>,
}

impl QueryBuilder {
    /// Query text (required).
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Maximum number of candidates (default: 3, 0 = unlimited).
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the requested type.
    #[must_use]
    pub fn requested_type(mut self, ty: TypeRef) -> Self {
        self.requested_type = Some(ty);
        self
    }

    /// Sets the type strictness.
    #[must_use]
    pub fn type_strictness(mut self, strictness: TypeStrictness) -> Self {
        self.type_strictness = strictness;
        self
    }

    /// Appends a property constraint. Order is significant.
    #[must_use]
    pub fn property(mut self, constraint: PropertyConstraint) -> Self {
        self.properties.push(constraint);
        self
    }

    /// Builds the query.
    ///
    /// # Errors
    /// - `MissingField` if no text was given.
    /// - `InvalidField` if a requested type has an empty id, or a property
    ///   constraint has an empty property id.
    pub fn build(self) -> Result<Query, ValidationError> {
        let text = self.text.ok_or_else(|| ValidationError::MissingField {
            field: "query".to_string(),
        })?;

        if let Some(ty) = &self.requested_type {
            if ty.id.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "type".to_string(),
                    reason: "type id cannot be empty".to_string(),
                });
            }
        }

        if self.properties.iter().any(|p| p.property_id.trim().is_empty()) {
            return Err(ValidationError::InvalidField {
                field: "properties".to_string(),
                reason: "property id cannot be empty".to_string(),
            });
        }

        Ok(Query {
            text,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            requested_type: self.requested_type,
            type_strictness: self.type_strictness,
            properties: self.properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::property::{Operator, Restrict};

    fn person_query() -> Query {
        Query::builder()
            .text("Ada Lovelace")
            .limit(5)
            .requested_type(TypeRef::labeled("Person", "Person"))
            .type_strictness(TypeStrictness::Must)
            .property(PropertyConstraint::new(
                "born",
                PropertyValue::Text("1815".to_string()),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn type_ref_equality_ignores_label() {
        assert_eq!(TypeRef::new("Person"), TypeRef::labeled("Person", "Human"));
        assert_ne!(TypeRef::new("Person"), TypeRef::new("Organization"));
    }

    #[test]
    fn builder_requires_text() {
        let err = Query::builder().limit(3).build().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { .. }));
    }

    #[test]
    fn builder_rejects_empty_type_id() {
        let err = Query::builder()
            .text("x")
            .requested_type(TypeRef::new(" "))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { .. }));
    }

    #[test]
    fn text_query_defaults() {
        let q = Query::text("Berlin");
        assert_eq!(q.limit(), DEFAULT_LIMIT);
        assert_eq!(q.type_strictness(), TypeStrictness::Should);
        assert!(q.requested_type().is_none());
        assert!(q.properties().is_empty());
    }

    #[test]
    fn structurally_equal_queries_share_fingerprint() {
        assert_eq!(person_query().fingerprint(), person_query().fingerprint());
    }

    #[test]
    fn type_label_does_not_affect_fingerprint() {
        let a = Query::builder()
            .text("x")
            .requested_type(TypeRef::labeled("Person", "Person"))
            .build()
            .unwrap();
        let b = Query::builder()
            .text("x")
            .requested_type(TypeRef::new("Person"))
            .build()
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn every_relevant_field_changes_fingerprint() {
        let base = person_query().fingerprint();

        let other_text = Query::builder()
            .text("Ada King")
            .limit(5)
            .requested_type(TypeRef::new("Person"))
            .type_strictness(TypeStrictness::Must)
            .property(PropertyConstraint::new("born", PropertyValue::Text("1815".to_string())))
            .build()
            .unwrap();
        assert_ne!(base, other_text.fingerprint());

        let other_limit = Query::builder()
            .text("Ada Lovelace")
            .limit(6)
            .requested_type(TypeRef::new("Person"))
            .type_strictness(TypeStrictness::Must)
            .property(PropertyConstraint::new("born", PropertyValue::Text("1815".to_string())))
            .build()
            .unwrap();
        assert_ne!(base, other_limit.fingerprint());

        let other_strictness = Query::builder()
            .text("Ada Lovelace")
            .limit(5)
            .requested_type(TypeRef::new("Person"))
            .type_strictness(TypeStrictness::Should)
            .property(PropertyConstraint::new("born", PropertyValue::Text("1815".to_string())))
            .build()
            .unwrap();
        assert_ne!(base, other_strictness.fingerprint());

        let mut constraint = PropertyConstraint::new("born", PropertyValue::Text("1815".to_string()));
        constraint.options = PropertyFilter::similarity(Operator::Gt, 0.5).with_restrict(Restrict::Soft);
        let other_options = Query::builder()
            .text("Ada Lovelace")
            .limit(5)
            .requested_type(TypeRef::new("Person"))
            .type_strictness(TypeStrictness::Must)
            .property(constraint)
            .build()
            .unwrap();
        assert_ne!(base, other_options.fingerprint());

        let number_value = Query::builder()
            .text("Ada Lovelace")
            .limit(5)
            .requested_type(TypeRef::new("Person"))
            .type_strictness(TypeStrictness::Must)
            .property(PropertyConstraint::new("born", PropertyValue::Number(1815.0)))
            .build()
            .unwrap();
        assert_ne!(base, number_value.fingerprint());
    }

    #[test]
    fn strictness_accepts_any_alias() {
        let s: TypeStrictness = serde_json::from_str("\"any\"").unwrap();
        assert_eq!(s, TypeStrictness::None);
        assert!(!s.filters());
        assert!(TypeStrictness::Should.filters());
    }

    #[test]
    fn property_value_decodes_all_shapes() {
        let v: PropertyValue = serde_json::from_str(r#"{"id":"Q64","name":"Berlin"}"#).unwrap();
        assert_eq!(v.as_comparable(), "Q64");
        let v: PropertyValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, PropertyValue::Number(42.0));
        let v: PropertyValue = serde_json::from_str("\"Berlin\"").unwrap();
        assert_eq!(v.as_comparable(), "Berlin");
    }
}
