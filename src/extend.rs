//! Property extension data types.
//!
//! Extension fetches property values for already-reconciled entity ids. The
//! dispatcher runs it through the same pool and a dedicated cache; what the
//! values mean, and how [`PropertyFilter`] options are applied, is up to the
//! backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::fingerprint::{FingerprintBuilder, QueryFingerprint};
use crate::policy::property::PropertyFilter;
use crate::query::TypeRef;

/// One value of a property.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Cell {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    /// A reference to another entity.
    Ref {
        id: String,
        name: String,
    },
}

impl Cell {
    /// String forms a filter may compare against. References offer both
    /// their id and their name.
    #[must_use]
    pub fn comparable_forms(&self) -> Vec<String> {
        match self {
            Self::Str(s) => vec![s.clone()],
            Self::Int(n) => vec![n.to_string()],
            Self::Float(f) => vec![f.to_string()],
            Self::Bool(b) => vec![b.to_string()],
            Self::Date(d) => vec![d.to_rfc3339()],
            Self::Ref { id, name } => vec![id.clone(), name.clone()],
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ref { id, name } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", id)?;
                map.serialize_entry("name", name)?;
                map.end()
            }
            Self::Str(s) => single(serializer, "str", s),
            Self::Int(n) => single(serializer, "int", n),
            Self::Float(f) => single(serializer, "float", f),
            Self::Bool(b) => single(serializer, "bool", b),
            Self::Date(d) => single(serializer, "date", &d.to_rfc3339()),
        }
    }
}

fn single<S: Serializer, T: Serialize + ?Sized>(serializer: S, key: &str, value: &T) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(key, value)?;
    map.end()
}

/// Values of each requested property for one entity, keyed by property id.
pub type Row = BTreeMap<String, Vec<Cell>>;

/// A property to fetch, with its filter options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRequest {
    /// Property id.
    pub id: String,
    /// Filter handed to the backend with the request.
    #[serde(default, alias = "settings")]
    pub options: PropertyFilter,
}

impl PropertyRequest {
    /// A request with default options.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            options: PropertyFilter::default(),
        }
    }

    /// Cache key for this column's metadata.
    #[must_use]
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut b = FingerprintBuilder::new("column");
        b.str(&self.id);
        b.filter(&self.options);
        b.finish()
    }
}

/// Extension request: every id crossed with every property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    /// Entity ids. Duplicates are fetched once.
    pub ids: Vec<String>,
    /// Columns to fetch for every id.
    pub properties: Vec<PropertyRequest>,
}

impl ExtensionRequest {
    /// Cache key for one entity under this request's property list.
    #[must_use]
    pub fn fingerprint_for(&self, id: &str) -> QueryFingerprint {
        let mut b = FingerprintBuilder::new("extend");
        b.str(id);
        b.u64(self.properties.len() as u64);
        for p in &self.properties {
            b.str(&p.id);
            b.filter(&p.options);
        }
        b.finish()
    }
}

/// Description of one extension column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Property id.
    pub id: String,
    /// Column label.
    pub name: String,
    /// Type of referenced entities, for reference-valued columns.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TypeRef>,
}

impl ColumnMetadata {
    /// Metadata naming the column after the property id.
    #[must_use]
    pub fn bare(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            type_ref: None,
        }
    }
}

/// Extension response.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExtensionResponse {
    /// One entry per requested property, in request order.
    pub meta: Vec<ColumnMetadata>,
    /// One row per distinct id.
    pub rows: BTreeMap<String, Row>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::property::{FilterType, Operator, Restrict};

    #[test]
    fn cells_serialize_in_wire_shape() {
        let cells = vec![
            Cell::Str("a".to_string()),
            Cell::Int(3),
            Cell::Bool(true),
            Cell::Ref {
                id: "Q64".to_string(),
                name: "Berlin".to_string(),
            },
        ];
        let json = serde_json::to_value(&cells).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"str": "a"},
                {"int": 3},
                {"bool": true},
                {"id": "Q64", "name": "Berlin"}
            ])
        );
    }

    #[test]
    fn property_request_accepts_settings_alias() {
        let p: PropertyRequest = serde_json::from_str(
            r#"{"id":"population","settings":{"filterType":"similarity","operator":"<","threshold":0.3,"restrict":"soft"}}"#,
        )
        .unwrap();
        assert_eq!(
            p.options,
            PropertyFilter::similarity(Operator::Lt, 0.3).with_restrict(Restrict::Soft)
        );
    }

    #[test]
    fn extension_fingerprint_depends_on_id_and_properties() {
        let req = ExtensionRequest {
            ids: vec!["1".to_string(), "2".to_string()],
            properties: vec![PropertyRequest::new("p")],
        };
        assert_eq!(req.fingerprint_for("1"), req.fingerprint_for("1"));
        assert_ne!(req.fingerprint_for("1"), req.fingerprint_for("2"));

        let other = ExtensionRequest {
            ids: vec!["1".to_string()],
            properties: vec![PropertyRequest::new("q")],
        };
        assert_ne!(req.fingerprint_for("1"), other.fingerprint_for("1"));
    }

    #[test]
    fn column_fingerprint_tracks_id_and_options() {
        let plain = PropertyRequest::new("p");
        let mut similar = PropertyRequest::new("p");
        similar.options.filter_type = FilterType::Similarity;

        assert_eq!(plain.fingerprint(), PropertyRequest::new("p").fingerprint());
        assert_ne!(plain.fingerprint(), PropertyRequest::new("q").fingerprint());
        assert_ne!(plain.fingerprint(), similar.fingerprint());
    }

    #[test]
    fn bare_metadata_uses_id_as_name() {
        let m = ColumnMetadata::bare("population");
        assert_eq!(m.name, "population");
        assert!(m.type_ref.is_none());
    }
}
