//! Deterministic in-memory extraction model for tests
//!
//! [`ScriptedModel`] finds entities by substring lookup in a fixed lexicon,
//! emits relations when both endpoints occur in the text and scores
//! classification labels by keyword. Failures can be injected per call kind
//! and every call is recorded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use dex_core::{DexError, Result};

use crate::raw::RawResult;
use crate::schema::{ClassificationSchema, Schema};
use crate::{ExtractionModel, ModelLoader};

/// One recorded capability call
#[derive(Debug, Clone, PartialEq)]
pub enum ModelCall {
    Extract { text: String, entity_types: Vec<String> },
    BatchExtract { texts: Vec<String>, entity_types: Vec<String> },
    Classify { text: String },
    BatchClassify { texts: Vec<String> },
}

#[derive(Debug, Clone)]
struct LabelRule {
    label: String,
    keyword: String,
    confidence: f64,
}

/// Scripted extraction model
#[derive(Debug, Default)]
pub struct ScriptedModel {
    entities: Vec<(String, String)>,
    relations: Vec<(String, String, String)>,
    labels: Vec<LabelRule>,
    bare_labels: bool,
    fail_batches: bool,
    short_batches: bool,
    fail_markers: HashSet<String>,
    fail_classification: bool,
    fail_batch_classification: bool,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `surface` as an entity of `entity_type` wherever it occurs
    pub fn with_entity(mut self, surface: &str, entity_type: &str) -> Self {
        self.entities.push((surface.to_string(), entity_type.to_string()));
        self
    }

    /// Report `subject predicate object` when both endpoints occur
    pub fn with_relation(mut self, subject: &str, predicate: &str, object: &str) -> Self {
        self.relations.push((
            subject.to_string(),
            predicate.to_string(),
            object.to_string(),
        ));
        self
    }

    /// Score `label` at `confidence` when `keyword` occurs (case-insensitive)
    pub fn with_label(mut self, label: &str, keyword: &str, confidence: f64) -> Self {
        self.labels.push(LabelRule {
            label: label.to_string(),
            keyword: keyword.to_lowercase(),
            confidence,
        });
        self
    }

    /// Report labels as bare strings without confidence
    pub fn with_bare_labels(mut self) -> Self {
        self.bare_labels = true;
        self
    }

    /// Every batch extraction call fails
    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Batch extraction returns one result too few
    pub fn short_batches(mut self) -> Self {
        self.short_batches = true;
        self
    }

    /// Any extraction call touching a text containing `marker` fails
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_markers.insert(marker.to_string());
        self
    }

    /// Every classification call fails, single and batch
    pub fn failing_classification(mut self) -> Self {
        self.fail_classification = true;
        self.fail_batch_classification = true;
        self
    }

    /// Only batch classification fails
    pub fn failing_batch_classification(mut self) -> Self {
        self.fail_batch_classification = true;
        self
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&ModelCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: ModelCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn check_markers(&self, text: &str) -> Result<()> {
        match self.fail_markers.iter().find(|m| text.contains(m.as_str())) {
            Some(marker) => Err(DexError::Capability(format!(
                "scripted failure on marker {marker:?}"
            ))),
            None => Ok(()),
        }
    }

    fn raw_extraction(&self, text: &str, schema: &Schema) -> RawResult {
        let mut raw = RawResult::new();

        for entity_type in schema.entity_types() {
            let hits: Vec<Value> = self
                .entities
                .iter()
                .filter(|(_, t)| t == entity_type)
                .filter_map(|(surface, _)| {
                    let byte_start = text.find(surface.as_str())?;
                    let start = text[..byte_start].chars().count();
                    Some(json!({
                        "text": surface,
                        "score": 0.9,
                        "start": start,
                        "end": start + surface.chars().count(),
                    }))
                })
                .collect();
            if !hits.is_empty() {
                raw = raw.with_entities(entity_type.clone(), Value::Array(hits));
            }
        }

        if let Some(relation_types) = schema.relation_types() {
            for predicate in relation_types.keys() {
                let hits: Vec<Value> = self
                    .relations
                    .iter()
                    .filter(|(s, p, o)| p == predicate && text.contains(s.as_str()) && text.contains(o.as_str()))
                    .map(|(s, _, o)| {
                        json!([{"text": s, "confidence": 0.8}, {"text": o, "confidence": 0.6}])
                    })
                    .collect();
                if !hits.is_empty() {
                    raw = raw.with_relations(predicate.clone(), Value::Array(hits));
                }
            }
        }

        raw
    }

    fn raw_classification(&self, text: &str, schema: &ClassificationSchema) -> RawResult {
        let lowered = text.to_lowercase();
        let offered: HashSet<&str> = schema.label_names().collect();

        let hits: Vec<Value> = self
            .labels
            .iter()
            .filter(|rule| offered.contains(rule.label.as_str()))
            .filter(|rule| lowered.contains(&rule.keyword))
            .filter(|rule| rule.confidence >= f64::from(schema.threshold))
            .map(|rule| {
                if self.bare_labels {
                    json!(rule.label)
                } else {
                    json!({"label": rule.label, "confidence": rule.confidence})
                }
            })
            .collect();

        RawResult::new().with_key(schema.task.clone(), Value::Array(hits))
    }
}

#[async_trait]
impl ExtractionModel for ScriptedModel {
    async fn extract(
        &self,
        text: &str,
        schema: &Schema,
        _include_confidence: bool,
    ) -> Result<RawResult> {
        self.record(ModelCall::Extract {
            text: text.to_string(),
            entity_types: schema.entity_types().to_vec(),
        });
        self.check_markers(text)?;
        Ok(self.raw_extraction(text, schema))
    }

    async fn batch_extract(
        &self,
        texts: &[String],
        schema: &Schema,
        _include_confidence: bool,
    ) -> Result<Vec<RawResult>> {
        self.record(ModelCall::BatchExtract {
            texts: texts.to_vec(),
            entity_types: schema.entity_types().to_vec(),
        });
        if self.fail_batches {
            return Err(DexError::Capability("scripted batch failure".to_string()));
        }
        for text in texts {
            self.check_markers(text)?;
        }

        let mut results: Vec<RawResult> = texts
            .iter()
            .map(|text| self.raw_extraction(text, schema))
            .collect();
        if self.short_batches {
            results.pop();
        }
        Ok(results)
    }

    async fn classify(&self, text: &str, schema: &ClassificationSchema) -> Result<RawResult> {
        self.record(ModelCall::Classify {
            text: text.to_string(),
        });
        if self.fail_classification {
            return Err(DexError::Capability("scripted classification failure".to_string()));
        }
        Ok(self.raw_classification(text, schema))
    }

    async fn batch_classify(
        &self,
        texts: &[String],
        schema: &ClassificationSchema,
    ) -> Result<Vec<RawResult>> {
        self.record(ModelCall::BatchClassify {
            texts: texts.to_vec(),
        });
        if self.fail_batch_classification {
            return Err(DexError::Capability(
                "scripted batch classification failure".to_string(),
            ));
        }
        Ok(texts
            .iter()
            .map(|text| self.raw_classification(text, schema))
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Loader handing out one scripted model and counting loads
pub struct ScriptedLoader {
    model: Arc<ScriptedModel>,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new(model: ScriptedModel) -> Self {
        Self::shared(Arc::new(model))
    }

    pub fn shared(model: Arc<ScriptedModel>) -> Self {
        Self {
            model,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&self) -> Result<Arc<dyn ExtractionModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up on the init guard
        tokio::task::yield_now().await;
        Ok(self.model.clone())
    }

    fn describe(&self) -> String {
        "scripted in-memory model".to_string()
    }
}

/// Loader that always fails
pub struct UnavailableLoader {
    message: String,
}

impl UnavailableLoader {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ModelLoader for UnavailableLoader {
    async fn load(&self) -> Result<Arc<dyn ExtractionModel>> {
        Err(DexError::ModelUnavailable(self.message.clone()))
    }

    fn describe(&self) -> String {
        "unavailable model".to_string()
    }
}
