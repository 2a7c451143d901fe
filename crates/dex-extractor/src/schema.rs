//! Extraction and classification schemas
//!
//! A [`Schema`] tells the model which entity types and relation types to look
//! for. A [`ClassificationSchema`] tells it which labels to score a text against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Combined entity + relation extraction schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    entity_types: Vec<String>,

    /// Relation name -> natural-language description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation_types: Option<BTreeMap<String, String>>,
}

impl Schema {
    /// Schema extracting the given entity types and no relations
    pub fn new<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            relation_types: None,
        }
    }

    /// Add a relation extraction step. An empty mapping leaves it out.
    pub fn with_relations(mut self, relation_types: BTreeMap<String, String>) -> Self {
        self.relation_types = if relation_types.is_empty() {
            None
        } else {
            Some(relation_types)
        };
        self
    }

    pub fn entity_types(&self) -> &[String] {
        &self.entity_types
    }

    pub fn relation_types(&self) -> Option<&BTreeMap<String, String>> {
        self.relation_types.as_ref()
    }

    pub fn has_relations(&self) -> bool {
        self.relation_types.is_some()
    }

    /// True when the schema can never produce an entity
    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }
}

/// Assemble a schema from entity type names and optional relation descriptions.
///
/// An empty `entity_types` is legal and yields a schema that finds nothing.
pub fn build_schema<I, S>(
    entity_types: I,
    relation_types: Option<BTreeMap<String, String>>,
) -> Schema
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let schema = Schema::new(entity_types);
    match relation_types {
        Some(relations) => schema.with_relations(relations),
        None => schema,
    }
}

/// Default classification task name
pub const DOMAINS_TASK: &str = "domains";

/// A label offered to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationLabel {
    pub name: String,
    pub description: String,
}

/// Multi-label classification schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSchema {
    /// Key under which the model reports label hits
    pub task: String,
    pub labels: Vec<ClassificationLabel>,
    pub multi_label: bool,
    /// Minimum label confidence
    pub threshold: f32,
}

impl ClassificationSchema {
    /// Multi-label domain classification over the given labels
    pub fn domains(labels: Vec<ClassificationLabel>, threshold: f32) -> Self {
        Self {
            task: DOMAINS_TASK.to_string(),
            labels,
            multi_label: true,
            threshold,
        }
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.name.as_str())
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }
}
