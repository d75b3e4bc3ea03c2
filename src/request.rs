//! Wire decoding for reconciliation requests.
//!
//! Accepts the JSON shapes reconciliation clients send and turns them into
//! validated [`Query`], [`Batch`] and [`ExtensionRequest`] values. Encoding
//! the other way is plain `serde` on the result types.

use serde::{Deserialize, Serialize};

use crate::dispatch::{Batch, BatchResult};
use crate::error::{ReconcileError, ReconcileResult, ValidationError};
use crate::extend::{ExtensionRequest, ExtensionResponse};
use crate::query::{PropertyConstraint, Query, TypeRef, TypeStrictness};

/// `"type"` may be a bare id or a `{id, name}` object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireType {
    Id(String),
    Ref(TypeRef),
}

#[derive(Debug, Deserialize)]
struct WireQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(rename = "type", default)]
    type_ref: Option<WireType>,
    #[serde(default)]
    type_strict: Option<TypeStrictness>,
    #[serde(default)]
    properties: Vec<PropertyConstraint>,
}

impl WireQuery {
    fn into_query(self) -> Result<Query, ValidationError> {
        let mut builder = Query::builder();
        if let Some(text) = self.query {
            builder = builder.text(text);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(ty) = self.type_ref {
            builder = builder.requested_type(match ty {
                WireType::Id(id) => TypeRef::new(id),
                WireType::Ref(r) => r,
            });
        }
        if let Some(strict) = self.type_strict {
            builder = builder.type_strictness(strict);
        }
        for constraint in self.properties {
            builder = builder.property(constraint);
        }
        builder.build()
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        WireQuery::deserialize(deserializer)?
            .into_query()
            .map_err(serde::de::Error::custom)
    }
}

fn malformed(e: &serde_json::Error) -> ValidationError {
    ValidationError::MalformedRequest {
        reason: e.to_string(),
    }
}

/// Decodes a single query.
///
/// Text starting with `{` is read as a JSON query object; anything else is
/// taken verbatim as a plain text query with default limit and strictness.
pub fn decode_single(text: &str) -> Result<Query, ValidationError> {
    if text.trim_start().starts_with('{') {
        let wire: WireQuery = serde_json::from_str(text).map_err(|e| malformed(&e))?;
        wire.into_query()
    } else {
        Ok(Query::text(text))
    }
}

/// Decodes a `{"<key>": <query>, ...}` batch.
pub fn decode_batch(json: &str) -> Result<Batch, ValidationError> {
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(json).map_err(|e| malformed(&e))?;

    let mut batch = Batch::new();
    for (key, value) in raw {
        let wire: WireQuery = serde_json::from_value(value).map_err(|e| ValidationError::InvalidField {
            field: key.clone(),
            reason: e.to_string(),
        })?;
        let query = wire.into_query()?;
        batch.push(key, query)?;
    }

    if tracing::enabled!(tracing::Level::TRACE) {
        let keys: Vec<&str> = batch.iter().map(|(k, _)| k).collect();
        tracing::trace!(keys = ?keys, "batch_decoded");
    }
    Ok(batch)
}

/// Decodes an extension request.
pub fn decode_extension(json: &str) -> Result<ExtensionRequest, ValidationError> {
    serde_json::from_str(json).map_err(|e| malformed(&e))
}

fn encode<T: Serialize>(value: &T) -> ReconcileResult<String> {
    serde_json::to_string(value).map_err(|e| ReconcileError::internal(format!("response serialization failed: {e}")))
}

/// Encodes a batch result as `{"<key>": {"result": [...]}, ...}`.
pub fn encode_batch(result: &BatchResult) -> ReconcileResult<String> {
    encode(result)
}

/// Encodes an extension response as `{"meta": [...], "rows": {...}}`.
pub fn encode_extension(response: &ExtensionResponse) -> ReconcileResult<String> {
    encode(response)
}
