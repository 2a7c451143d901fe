//! Batch extraction orchestrator
//!
//! Runs extraction over one or many texts:
//! - fixed-schema batches, split into chunks with per-chunk sequential fallback
//! - all-domains batches, using the union of every preset
//! - auto-domain batches, grouping texts by detected domain combination
//!
//! Results always come back in input order, one per text.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use dex_core::config::{AppConfig, ProcessingConfig, MAX_BATCH_SIZE};
use dex_core::{DexError, DomainClassification, ExtractionResult, Result};

use crate::classify::DomainClassifier;
use crate::model::ModelHandle;
use crate::normalize::normalize;
use crate::presets::{MergedPreset, PresetRegistry, PresetSnapshot};
use crate::remote::RemoteModelLoader;
use crate::schema::Schema;
use crate::{AutoDomainOptions, ExtractOptions, ExtractionModel, ExtractionTypes};

/// Domain combination shared by a group of texts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DomainGroup {
    /// No domain detected; extracted with the default types
    Default,
    /// Sorted, de-duplicated domain labels
    Domains(Vec<String>),
}

impl DomainGroup {
    /// Group key for a text's classifications, keeping the first `max_domains` labels
    pub fn from_classifications(classifications: &[DomainClassification], max_domains: usize) -> Self {
        let labels: BTreeSet<&str> = classifications
            .iter()
            .take(max_domains)
            .map(|c| c.label.as_str())
            .filter(|label| !label.is_empty())
            .collect();

        if labels.is_empty() {
            Self::Default
        } else {
            Self::Domains(labels.into_iter().map(String::from).collect())
        }
    }

    fn preset(&self, snapshot: &PresetSnapshot) -> MergedPreset {
        match self {
            Self::Default => snapshot.defaults().clone(),
            Self::Domains(domains) => snapshot.merge(domains.as_slice()),
        }
    }
}

impl std::fmt::Display for DomainGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Domains(domains) => write!(f, "{}", domains.join("+")),
        }
    }
}

fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(DexError::Validation(format!(
            "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
        )));
    }
    Ok(())
}

fn validate_auto_options(options: &AutoDomainOptions) -> Result<()> {
    validate_batch_size(options.batch_size)?;
    if options.max_domains == 0 {
        return Err(DexError::Validation("max_domains must be at least 1".to_string()));
    }
    if !(0.0..=1.0).contains(&options.domain_threshold) {
        return Err(DexError::Validation(format!(
            "domain_threshold must be between 0 and 1, got {}",
            options.domain_threshold
        )));
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Domain-aware extraction pipeline
pub struct ExtractionPipeline {
    model: Arc<ModelHandle>,
    presets: Arc<PresetRegistry>,
    classifier: DomainClassifier,
    processing: ProcessingConfig,
}

impl ExtractionPipeline {
    pub fn new(model: Arc<ModelHandle>, presets: Arc<PresetRegistry>, processing: ProcessingConfig) -> Self {
        Self {
            classifier: DomainClassifier::new(model.clone()),
            model,
            presets,
            processing,
        }
    }

    /// Pipeline over the remote model and preset file named in the config
    pub fn from_config(config: &AppConfig) -> Self {
        let model = Arc::new(ModelHandle::new(Arc::new(RemoteModelLoader::new(
            config.model.clone(),
        ))));
        let presets = Arc::new(PresetRegistry::from_file(&config.presets_path));
        Self::new(model, presets, config.processing.clone())
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn presets(&self) -> &Arc<PresetRegistry> {
        &self.presets
    }

    pub fn processing(&self) -> &ProcessingConfig {
        &self.processing
    }

    // ------------------------------------------------------------------------
    // Single text
    // ------------------------------------------------------------------------

    /// Extract from one text.
    ///
    /// A failing model call yields an empty result. Fails only when the model
    /// cannot be loaded.
    pub async fn extract_one(
        &self,
        text: &str,
        types: &ExtractionTypes,
        options: ExtractOptions,
    ) -> Result<ExtractionResult> {
        let snapshot = self.presets.snapshot().await;
        let schema = types.resolve(snapshot.defaults());
        let model = self.model.get().await?;
        Ok(extract_with_model(model.as_ref(), text, &schema, options).await)
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    /// Extract from many texts with one schema
    pub async fn extract_batch(
        &self,
        texts: &[String],
        types: &ExtractionTypes,
        batch_size: usize,
        options: ExtractOptions,
    ) -> Result<Vec<ExtractionResult>> {
        validate_batch_size(batch_size)?;

        let span = tracing::info_span!(
            "extract_batch",
            request_id = %Uuid::new_v4(),
            texts = texts.len()
        );

        async move {
            let snapshot = self.presets.snapshot().await;
            let schema = types.resolve(snapshot.defaults());
            self.batch_with_schema(texts, &schema, batch_size, options).await
        }
        .instrument(span)
        .await
    }

    /// Extract from many texts with every enabled domain's types plus the
    /// defaults, skipping classification
    pub async fn extract_batch_all_domains(
        &self,
        texts: &[String],
        batch_size: usize,
        options: ExtractOptions,
    ) -> Result<Vec<ExtractionResult>> {
        validate_batch_size(batch_size)?;

        let span = tracing::info_span!(
            "extract_batch_all_domains",
            request_id = %Uuid::new_v4(),
            texts = texts.len()
        );

        async move {
            let start = Instant::now();
            let merged = self.presets.merge_all().await;
            tracing::info!(
                "Extracting with all domains: {} entity types, {} relation types",
                merged.entity_types.len(),
                merged.relation_types.len()
            );

            let results = self
                .batch_with_schema(texts, &merged.to_schema(), batch_size, options)
                .await?;

            tracing::info!("All-domains batch extraction completed in {:.0}ms", elapsed_ms(start));
            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Classify texts, group them by detected domain combination and extract
    /// each group with its merged presets
    pub async fn extract_batch_auto_domains(
        &self,
        texts: &[String],
        auto: AutoDomainOptions,
        options: ExtractOptions,
    ) -> Result<Vec<ExtractionResult>> {
        validate_auto_options(&auto)?;

        let span = tracing::info_span!(
            "extract_batch_auto_domains",
            request_id = %Uuid::new_v4(),
            texts = texts.len()
        );

        async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let start = Instant::now();
            let snapshot = self.presets.snapshot().await;

            tracing::info!("Classifying {} texts for domain detection", texts.len());
            let classification_schema = snapshot.classification_schema(auto.domain_threshold);
            let classifications = self
                .classifier
                .classify_batch(texts, &classification_schema, auto.batch_size * 2)
                .await;

            let mut groups: BTreeMap<DomainGroup, Vec<usize>> = BTreeMap::new();
            for (index, detected) in classifications.iter().enumerate() {
                let group = DomainGroup::from_classifications(detected, auto.max_domains);
                groups.entry(group).or_default().push(index);
            }

            tracing::info!(
                "Grouped into {} domain batches: [{}]",
                groups.len(),
                groups
                    .keys()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let mut slots: Vec<Option<ExtractionResult>> = vec![None; texts.len()];

            for (group, indices) in &groups {
                let schema = group.preset(&snapshot).to_schema();
                let group_texts: Vec<String> = indices.iter().map(|&i| texts[i].clone()).collect();

                tracing::debug!("Extracting {} texts for group {}", group_texts.len(), group);
                let results = self
                    .batch_with_schema(&group_texts, &schema, auto.batch_size, options)
                    .await?;

                for (&index, result) in indices.iter().zip(results) {
                    slots[index] = Some(result);
                }
            }

            tracing::info!("Auto-domain batch extraction completed in {:.0}ms", elapsed_ms(start));
            Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
        }
        .instrument(span)
        .await
    }

    /// Run chunked batch extraction with a fixed schema.
    ///
    /// Returns exactly one result per text, in input order.
    async fn batch_with_schema(
        &self,
        texts: &[String],
        schema: &Schema,
        batch_size: usize,
        options: ExtractOptions,
    ) -> Result<Vec<ExtractionResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let model = self.model.get().await?;

        let mut results = Vec::with_capacity(texts.len());
        for (index, chunk) in texts.chunks(batch_size.max(1)).enumerate() {
            tracing::debug!("Extracting chunk {} ({} texts)", index, chunk.len());
            results.extend(extract_chunk(model.as_ref(), chunk, schema, options).await);
        }

        tracing::debug!("Batch extracted {} texts in {:.0}ms", texts.len(), elapsed_ms(start));
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Classification and presets
    // ------------------------------------------------------------------------

    /// Detected domains for one text, most confident first
    pub async fn classify_one(&self, text: &str, threshold: f32) -> Vec<DomainClassification> {
        let schema = self.presets.snapshot().await.classification_schema(threshold);
        self.classifier.classify(text, &schema).await
    }

    /// Detected domains for many texts, in input order
    pub async fn classify_batch(
        &self,
        texts: &[String],
        threshold: f32,
        group_size: usize,
    ) -> Vec<Vec<DomainClassification>> {
        let schema = self.presets.snapshot().await.classification_schema(threshold);
        self.classifier.classify_batch(texts, &schema, group_size).await
    }

    /// Union of the named domains' presets, or the defaults if none matched
    pub async fn merge_presets<S: AsRef<str>>(&self, domains: &[S]) -> MergedPreset {
        self.presets.merge(domains).await
    }

    /// Re-read the preset source and swap it in
    pub async fn reload_presets(&self) -> Arc<PresetSnapshot> {
        self.presets.reload().await
    }
}

/// Single-text extraction with an already loaded model.
///
/// A failed call is logged and yields an empty result.
async fn extract_with_model(
    model: &dyn ExtractionModel,
    text: &str,
    schema: &Schema,
    options: ExtractOptions,
) -> ExtractionResult {
    let start = Instant::now();

    let result = match model.extract(text, schema, options.include_confidence).await {
        Ok(raw) => normalize(&raw, options),
        Err(e) => {
            tracing::error!("Extraction failed: {}", e);
            ExtractionResult::empty()
        }
    };

    result.with_processing_time(elapsed_ms(start))
}

/// Extract one chunk, falling back to per-text extraction when the batch call
/// fails or returns the wrong number of results
async fn extract_chunk(
    model: &dyn ExtractionModel,
    chunk: &[String],
    schema: &Schema,
    options: ExtractOptions,
) -> Vec<ExtractionResult> {
    let start = Instant::now();

    match model.batch_extract(chunk, schema, options.include_confidence).await {
        Ok(raws) if raws.len() == chunk.len() => {
            // The chunk timer is authoritative; spread it evenly over the chunk
            let per_text_ms = elapsed_ms(start) / chunk.len() as f64;
            raws.iter()
                .map(|raw| normalize(raw, options).with_processing_time(per_text_ms))
                .collect()
        }
        outcome => {
            match outcome {
                Ok(raws) => tracing::warn!(
                    "Batch extraction returned {} results for {} texts, falling back to sequential",
                    raws.len(),
                    chunk.len()
                ),
                Err(e) => tracing::warn!("Batch extraction failed, falling back to sequential: {}", e),
            }

            let mut results = Vec::with_capacity(chunk.len());
            for text in chunk {
                results.push(extract_with_model(model, text, schema, options).await);
            }
            results
        }
    }
}
