//! DEX Extractor - Domain-aware batch extraction pipeline
//!
//! Delegates entity and relation recognition to an external extraction model
//! and adds the orchestration around it: schema construction, domain
//! classification, per-domain batch grouping, result normalization and
//! order-preserving reassembly.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dex_core::config::ProcessingConfig;
use dex_core::Result;

pub mod classify;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod presets;
pub mod raw;
pub mod remote;
pub mod schema;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use classify::{heuristic_classify, DomainClassifier};
pub use model::ModelHandle;
pub use pipeline::ExtractionPipeline;
pub use presets::{DomainPreset, MergedPreset, PresetRegistry, PresetSnapshot, PresetSource};
pub use raw::RawResult;
pub use remote::{RemoteModel, RemoteModelLoader};
pub use schema::{build_schema, ClassificationLabel, ClassificationSchema, Schema};

/// Extraction capability backing the pipeline
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Extract entities/relations from one text
    async fn extract(&self, text: &str, schema: &Schema, include_confidence: bool)
        -> Result<RawResult>;

    /// Extract from several texts with one schema; one raw result per text
    async fn batch_extract(
        &self,
        texts: &[String],
        schema: &Schema,
        include_confidence: bool,
    ) -> Result<Vec<RawResult>>;

    /// Score one text against classification labels
    async fn classify(&self, text: &str, schema: &ClassificationSchema) -> Result<RawResult>;

    /// Score several texts; one raw result per text
    async fn batch_classify(
        &self,
        texts: &[String],
        schema: &ClassificationSchema,
    ) -> Result<Vec<RawResult>>;

    /// Model identifier for logging
    fn name(&self) -> &str;
}

/// Produces the extraction model on first use
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ExtractionModel>>;

    fn describe(&self) -> String;
}

/// What normalized results carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    pub include_confidence: bool,
    pub include_spans: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_confidence: true,
            include_spans: true,
        }
    }
}

/// Explicit entity/relation types for an extraction call.
///
/// `None` fields fall back to the configured defaults. An explicitly empty
/// relation map disables the relation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTypes {
    pub entity_types: Option<Vec<String>>,
    pub relation_types: Option<BTreeMap<String, String>>,
}

impl ExtractionTypes {
    /// Use the configured defaults
    pub fn defaults() -> Self {
        Self::default()
    }

    pub fn entities<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: Some(entity_types.into_iter().map(Into::into).collect()),
            relation_types: None,
        }
    }

    pub fn with_relations(mut self, relation_types: BTreeMap<String, String>) -> Self {
        self.relation_types = Some(relation_types);
        self
    }

    /// Resolve against a default preset into a schema
    pub fn resolve(&self, defaults: &MergedPreset) -> Schema {
        let entity_types = self
            .entity_types
            .clone()
            .unwrap_or_else(|| defaults.entity_types.clone());
        let relation_types = self
            .relation_types
            .clone()
            .unwrap_or_else(|| defaults.relation_types.clone());
        build_schema(entity_types, Some(relation_types))
    }
}

impl From<MergedPreset> for ExtractionTypes {
    fn from(preset: MergedPreset) -> Self {
        Self {
            entity_types: Some(preset.entity_types),
            relation_types: Some(preset.relation_types),
        }
    }
}

/// Auto-domain pipeline parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoDomainOptions {
    pub batch_size: usize,
    /// Minimum label confidence during classification
    pub domain_threshold: f32,
    /// Labels kept per text
    pub max_domains: usize,
}

impl Default for AutoDomainOptions {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for AutoDomainOptions {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            domain_threshold: config.domain_threshold,
            max_domains: config.max_domains,
        }
    }
}
