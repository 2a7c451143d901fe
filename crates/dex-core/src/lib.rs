//! DEX Core - Data model, error taxonomy and configuration
//!
//! This crate defines the types shared by the extraction pipeline and its
//! drivers:
//! - Extraction output (entities, relations, per-text results)
//! - Domain classification output
//! - The error taxonomy and its service-facing categories
//! - Configuration management

pub mod config;

pub use config::{AppConfig, ConfigError, LoggingConfig, ModelConfig, ProcessingConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for extraction operations
#[derive(Error, Debug)]
pub enum DexError {
    /// The extraction capability could not be obtained (load/connect failed)
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The extraction capability was reachable but the call failed
    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DexError {
    /// Category reported to callers at a service boundary
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ModelUnavailable(_) | Self::Capability(_) => ErrorCategory::Capability,
            Self::MalformedResult(_) => ErrorCategory::MalformedResult,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::Other(_) => ErrorCategory::Internal,
        }
    }
}

impl From<ConfigError> for DexError {
    fn from(err: ConfigError) -> Self {
        DexError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DexError>;

/// Error taxonomy category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Capability,
    Configuration,
    MalformedResult,
    Validation,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Configuration => "configuration",
            Self::MalformedResult => "malformed_result",
            Self::Validation => "validation",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Service-facing rendering of an error that escaped the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&DexError> for ErrorReport {
    fn from(err: &DexError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Bring a raw score into [0, 1].
///
/// Non-finite scores are dropped rather than clamped.
pub fn clamp_confidence(score: f64) -> Option<f32> {
    if !score.is_finite() {
        return None;
    }
    Some(score.clamp(0.0, 1.0) as f32)
}

// ============================================================================
// Extraction Models
// ============================================================================

/// An entity found in a text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Surface text
    pub name: String,

    /// Entity type, one of the requested types
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Confidence score (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Character span `(start, end)` in the source text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
}

impl ExtractedEntity {
    /// Create an entity without confidence or span
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            confidence: None,
            span: None,
        }
    }

    /// Set confidence, clamped into [0, 1]
    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence = clamp_confidence(score);
        self
    }

    /// Set span
    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some((start, end));
        self
    }
}

/// A directed relation between two entity surface strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ExtractedRelation {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: None,
        }
    }

    /// Set confidence, clamped into [0, 1]
    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence = clamp_confidence(score);
        self
    }
}

/// Extraction output for a single input text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,

    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,

    /// Processing time in milliseconds
    pub processing_time_ms: f64,
}

impl ExtractionResult {
    /// A result with nothing found
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the processing time with a caller-measured value
    pub fn with_processing_time(mut self, processing_time_ms: f64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    /// Find the first entity with the given surface text
    pub fn entity(&self, name: &str) -> Option<&ExtractedEntity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Entities of one type
    pub fn entities_of_type<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a ExtractedEntity> + 'a {
        self.entities
            .iter()
            .filter(move |e| e.entity_type == entity_type)
    }

    /// Copy of this result keeping only entities and relations scored at or
    /// above `threshold`. Unscored items are kept.
    pub fn filtered_by_confidence(&self, threshold: f32) -> Self {
        let keep = |c: Option<f32>| c.map_or(true, |c| c >= threshold);
        Self {
            entities: self
                .entities
                .iter()
                .filter(|e| keep(e.confidence))
                .cloned()
                .collect(),
            relations: self
                .relations
                .iter()
                .filter(|r| keep(r.confidence))
                .cloned()
                .collect(),
            processing_time_ms: self.processing_time_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Outcome of a batch extraction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExtractionResult {
    /// Results for each input text, in input order
    pub results: Vec<ExtractionResult>,
    pub total_processing_time_ms: f64,
    pub texts_processed: usize,
}

// ============================================================================
// Domain Classification
// ============================================================================

/// One detected domain for a text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainClassification {
    pub label: String,
    pub confidence: f32,
}

impl DomainClassification {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Sort descending by confidence; equal confidences keep their first-seen order.
pub fn sort_classifications(classifications: &mut [DomainClassification]) {
    classifications.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ============================================================================
// Tests
// ============================================================================
