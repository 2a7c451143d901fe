//! Domain classification
//!
//! Scores texts against the configured domain labels through the extraction
//! model. When the model is unavailable, fails, or no labels are configured,
//! a keyword heuristic over a fixed domain table takes over.

use std::sync::Arc;

use dex_core::{clamp_confidence, sort_classifications, DomainClassification};

use crate::model::ModelHandle;
use crate::raw::{LabelHit, RawResult};
use crate::schema::ClassificationSchema;

/// Keyword table for the heuristic fallback
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "ecommerce",
        &[
            "price", "product", "shop", "buy", "cart", "order", "brand", "ingredient",
            "shampoo", "cream", "hair", "skin", "beauty",
        ],
    ),
    (
        "code",
        &[
            "function", "class", "import", "def", "return", "const", "let", "var", "async",
            "await", "export", "module", "api", "endpoint",
        ],
    ),
    (
        "documentation",
        &[
            "feature",
            "requirement",
            "specification",
            "user story",
            "use case",
            "milestone",
            "release",
            "version",
            "component",
        ],
    ),
    (
        "legal",
        &[
            "contract",
            "clause",
            "obligation",
            "party",
            "jurisdiction",
            "agreement",
            "terms",
            "conditions",
            "liability",
            "warrant",
        ],
    ),
];

/// Keyword-based domain classification.
///
/// A domain scores `hits / keywords` over the lower-cased text and is reported
/// only when the score exceeds `threshold`, at `min(score * 2, 1)`.
pub fn heuristic_classify(text: &str, threshold: f32) -> Vec<DomainClassification> {
    let lowered = text.to_lowercase();

    let mut detected: Vec<DomainClassification> = DOMAIN_KEYWORDS
        .iter()
        .filter_map(|(domain, keywords)| {
            let hits = keywords.iter().filter(|kw| lowered.contains(*kw)).count();
            let score = hits as f32 / keywords.len() as f32;
            (score > threshold)
                .then(|| DomainClassification::new(*domain, (score * 2.0).min(1.0)))
        })
        .collect();

    sort_classifications(&mut detected);
    detected
}

/// Decode label hits from a classification result.
///
/// Labels without a usable confidence are reported at the threshold. Labels
/// below the threshold are dropped.
pub fn labels_from_raw(raw: &RawResult, schema: &ClassificationSchema) -> Vec<DomainClassification> {
    let mut detected: Vec<DomainClassification> = raw
        .label_hits(&schema.task)
        .into_iter()
        .filter_map(|hit| match hit {
            LabelHit::Scored { label, confidence } => {
                let confidence = confidence
                    .and_then(clamp_confidence)
                    .unwrap_or(schema.threshold);
                Some(DomainClassification::new(label, confidence))
            }
            LabelHit::Bare(label) => Some(DomainClassification::new(label, schema.threshold)),
            LabelHit::Malformed(value) => {
                tracing::debug!("Skipping malformed label hit: {}", value);
                None
            }
        })
        .filter(|c| c.confidence >= schema.threshold)
        .collect();

    sort_classifications(&mut detected);
    detected
}

/// Domain classifier over the shared extraction model
pub struct DomainClassifier {
    model: Arc<ModelHandle>,
}

impl DomainClassifier {
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self { model }
    }

    /// Classify one text. Never fails: degrades to the keyword heuristic.
    pub async fn classify(
        &self,
        text: &str,
        schema: &ClassificationSchema,
    ) -> Vec<DomainClassification> {
        if !schema.has_labels() {
            tracing::debug!("No classification labels configured, using keyword heuristic");
            return heuristic_classify(text, schema.threshold);
        }

        let model = match self.model.get().await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!("Domain classification unavailable: {}, falling back to heuristic", e);
                return heuristic_classify(text, schema.threshold);
            }
        };

        match model.classify(text, schema).await {
            Ok(raw) => labels_from_raw(&raw, schema),
            Err(e) => {
                tracing::warn!("Domain classification failed: {}, falling back to heuristic", e);
                heuristic_classify(text, schema.threshold)
            }
        }
    }

    /// Classify texts in chunks of `group_size`, preserving input order.
    ///
    /// If any chunk fails or returns the wrong number of results, every text
    /// is classified again one by one.
    pub async fn classify_batch(
        &self,
        texts: &[String],
        schema: &ClassificationSchema,
        group_size: usize,
    ) -> Vec<Vec<DomainClassification>> {
        if texts.is_empty() {
            return Vec::new();
        }

        match self.try_classify_batch(texts, schema, group_size).await {
            Some(classifications) => classifications,
            None => {
                let mut classifications = Vec::with_capacity(texts.len());
                for text in texts {
                    classifications.push(self.classify(text, schema).await);
                }
                classifications
            }
        }
    }

    async fn try_classify_batch(
        &self,
        texts: &[String],
        schema: &ClassificationSchema,
        group_size: usize,
    ) -> Option<Vec<Vec<DomainClassification>>> {
        if !schema.has_labels() {
            return None;
        }

        let model = match self.model.get().await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!("Batch domain classification unavailable: {}", e);
                return None;
            }
        };

        let mut classifications = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(group_size.max(1)) {
            match model.batch_classify(chunk, schema).await {
                Ok(raws) if raws.len() == chunk.len() => {
                    classifications.extend(raws.iter().map(|raw| labels_from_raw(raw, schema)));
                }
                Ok(raws) => {
                    tracing::warn!(
                        "Batch domain classification returned {} results for {} texts, falling back to sequential",
                        raws.len(),
                        chunk.len()
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        "Batch domain classification failed: {}, falling back to sequential",
                        e
                    );
                    return None;
                }
            }
        }

        Some(classifications)
    }
}
