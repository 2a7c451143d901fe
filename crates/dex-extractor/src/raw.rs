//! Raw capability output
//!
//! The extraction model answers with loosely-typed JSON. This module decodes
//! that JSON into explicit hit variants so the normalizer can match on them
//! exhaustively:
//! - entity hits: a record (`text|name`, `score|confidence`, `start`, `end`) or a bare string
//! - relation hits: a `[subject, object, score?]` tuple or a `subject|head` / `object|tail` record
//! - label hits: a `{label, confidence|score}` record or a bare label

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding entity hits, grouped by entity type
pub const ENTITIES_KEY: &str = "entities";

/// Key holding relation hits, grouped by relation type
pub const RELATIONS_KEY: &str = "relation_extraction";

// ============================================================================
// Raw Result
// ============================================================================

/// Output of one capability call for one text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RawResult {
    /// Entity type -> hit sequence
    #[serde(rename = "entities")]
    pub entities: Map<String, Value>,

    /// Relation type -> hit sequence
    #[serde(rename = "relation_extraction")]
    pub relations: Map<String, Value>,

    /// Any other keys, e.g. classification tasks
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl From<Value> for RawResult {
    fn from(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            tracing::debug!("Raw result is not an object, treating as empty");
            return Self::default();
        };

        let mut take_object = |key: &str| match map.remove(key) {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                tracing::debug!("Ignoring non-object {} value: {}", key, other);
                Map::new()
            }
            None => Map::new(),
        };

        let entities = take_object(ENTITIES_KEY);
        let relations = take_object(RELATIONS_KEY);

        Self {
            entities,
            relations,
            other: map,
        }
    }
}

impl RawResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entity hits for a type
    pub fn with_entities(mut self, entity_type: impl Into<String>, hits: Value) -> Self {
        self.entities.insert(entity_type.into(), hits);
        self
    }

    /// Add relation hits for a relation type
    pub fn with_relations(mut self, relation_type: impl Into<String>, hits: Value) -> Self {
        self.relations.insert(relation_type.into(), hits);
        self
    }

    /// Add hits under an arbitrary key (classification tasks)
    pub fn with_key(mut self, key: impl Into<String>, value: Value) -> Self {
        self.other.insert(key.into(), value);
        self
    }

    /// Decoded entity hits per type. Non-sequence values are skipped.
    pub fn entity_hits(&self) -> Vec<(&str, Vec<EntityHit>)> {
        self.entities
            .iter()
            .filter_map(|(entity_type, hits)| {
                let hits = hits.as_array()?;
                Some((
                    entity_type.as_str(),
                    hits.iter().map(EntityHit::decode).collect(),
                ))
            })
            .collect()
    }

    /// Decoded relation hits per relation type. Non-sequence values are skipped.
    pub fn relation_hits(&self) -> Vec<(&str, Vec<RelationHit>)> {
        self.relations
            .iter()
            .filter_map(|(relation_type, hits)| {
                let hits = hits.as_array()?;
                Some((
                    relation_type.as_str(),
                    hits.iter().map(RelationHit::decode).collect(),
                ))
            })
            .collect()
    }

    /// Decoded label hits under a classification task key
    pub fn label_hits(&self, task: &str) -> Vec<LabelHit> {
        self.other
            .get(task)
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(LabelHit::decode).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Field helpers
// ============================================================================

/// String form of a JSON value; strings are taken verbatim
fn surface(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First present, non-null field among `keys`
fn first_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    first_field(map, keys).and_then(Value::as_f64)
}

/// Character offset; integral floats such as `3.0` count, anything else is
/// dropped with a debug log
fn offset(map: &Map<String, Value>, key: &str) -> Option<usize> {
    let value = map.get(key).filter(|v| !v.is_null())?;
    let offset = match value.as_u64() {
        Some(v) => usize::try_from(v).ok(),
        None => value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= usize::MAX as f64)
            .map(|v| v as usize),
    };
    if offset.is_none() {
        tracing::debug!("Ignoring unusable {} offset: {}", key, value);
    }
    offset
}

// ============================================================================
// Entity hits
// ============================================================================

/// One entity hit as reported by the model
#[derive(Debug, Clone, PartialEq)]
pub enum EntityHit {
    Record(EntityRecord),
    Bare(String),
}

/// Record-shaped entity hit
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// `text`, else `name`, else the record's own string form
    pub text: String,
    /// `score`, else `confidence`
    pub score: Option<f64>,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl EntityHit {
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Record(EntityRecord::decode(map, value)),
            Value::String(s) => Self::Bare(s.clone()),
            // Anything else is kept under its string form
            other => Self::Bare(other.to_string()),
        }
    }
}

impl EntityRecord {
    fn decode(map: &Map<String, Value>, whole: &Value) -> Self {
        let text = first_field(map, &["text", "name"])
            .map(surface)
            .unwrap_or_else(|| whole.to_string());

        Self {
            text,
            score: first_number(map, &["score", "confidence"]),
            start: offset(map, "start"),
            end: offset(map, "end"),
        }
    }
}

// ============================================================================
// Relation hits
// ============================================================================

/// One relation endpoint (subject or object)
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Record { text: String, confidence: Option<f64> },
    Bare(String),
}

impl Endpoint {
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Record {
                text: first_field(map, &["text", "name"])
                    .map(surface)
                    .unwrap_or_else(|| value.to_string()),
                confidence: first_number(map, &["confidence", "score"]),
            },
            other => Self::Bare(surface(other)),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Record { text, .. } | Self::Bare(text) => text,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Record { confidence, .. } => *confidence,
            Self::Bare(_) => None,
        }
    }
}

/// One relation hit as reported by the model
#[derive(Debug, Clone, PartialEq)]
pub enum RelationHit {
    /// `[subject, object]` or `[subject, object, score]`
    Tuple {
        subject: Endpoint,
        object: Endpoint,
        score: Option<f64>,
    },
    /// `{subject|head, object|tail, score|confidence}`
    Record {
        subject: Endpoint,
        object: Endpoint,
        score: Option<f64>,
    },
    Malformed(Value),
}

impl RelationHit {
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::Array(items) if items.len() >= 2 => Self::Tuple {
                subject: Endpoint::decode(&items[0]),
                object: Endpoint::decode(&items[1]),
                score: items.get(2).and_then(Value::as_f64),
            },
            Value::Object(map) => {
                let subject = first_field(map, &["subject", "head"]);
                let object = first_field(map, &["object", "tail"]);
                match (subject, object) {
                    (Some(subject), Some(object)) => Self::Record {
                        subject: Endpoint::decode(subject),
                        object: Endpoint::decode(object),
                        score: first_number(map, &["score", "confidence"]),
                    },
                    _ => Self::Malformed(value.clone()),
                }
            }
            other => Self::Malformed(other.clone()),
        }
    }
}

// ============================================================================
// Label hits
// ============================================================================

/// One classification label hit
#[derive(Debug, Clone, PartialEq)]
pub enum LabelHit {
    Scored {
        label: String,
        confidence: Option<f64>,
    },
    Bare(String),
    Malformed(Value),
}

impl LabelHit {
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::Object(map) => match map.get("label").and_then(Value::as_str) {
                Some(label) if !label.is_empty() => Self::Scored {
                    label: label.to_string(),
                    confidence: first_number(map, &["confidence", "score"]),
                },
                _ => Self::Malformed(value.clone()),
            },
            Value::String(label) if !label.is_empty() => Self::Bare(label.clone()),
            other => Self::Malformed(other.clone()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
