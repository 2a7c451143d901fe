//! End-to-end pipeline tests over the scripted model

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;

use dex_core::config::ProcessingConfig;
use dex_core::{DexError, ExtractedEntity, ExtractedRelation, ExtractionResult};
use dex_extractor::testing::{ModelCall, ScriptedModel, UnavailableLoader};
use dex_extractor::{
    AutoDomainOptions, DomainPreset, ExtractOptions, ExtractionPipeline, ExtractionTypes,
    ModelHandle, PresetRegistry, PresetSnapshot,
};

const APPLE: &str = "Apple hired Jane Smith as CTO.";
const GDPR: &str = "The GDPR applies to all EU data processors.";
const CODE: &str = "The function parse_config reads the file.";
const NOTHING: &str = "It rained all afternoon.";

fn relations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn presets() -> PresetSnapshot {
    PresetSnapshot::builtin()
        .with_defaults(
            ["person", "organization"],
            relations(&[("works_for", "person works for organization")]),
        )
        .with_domain(
            "legal",
            DomainPreset::new(
                ["regulation", "party"],
                relations(&[("applies_to", "regulation applies to party")]),
            ),
        )
        .with_domain(
            "code",
            DomainPreset::new(
                ["function", "library"],
                relations(&[("calls", "function calls function")]),
            ),
        )
}

fn scripted() -> ScriptedModel {
    ScriptedModel::new()
        .with_entity("Jane Smith", "person")
        .with_entity("Apple", "organization")
        .with_entity("GDPR", "regulation")
        .with_entity("EU data processors", "party")
        .with_entity("parse_config", "function")
        .with_relation("Jane Smith", "works_for", "Apple")
        .with_relation("GDPR", "applies_to", "EU data processors")
        .with_label("legal", "gdpr", 0.9)
        .with_label("code", "function", 0.7)
}

fn pipeline_for(model: &Arc<ScriptedModel>) -> ExtractionPipeline {
    ExtractionPipeline::new(
        Arc::new(ModelHandle::preloaded(model.clone())),
        Arc::new(PresetRegistry::from_snapshot(presets())),
        ProcessingConfig::default(),
    )
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|t| t.to_string()).collect()
}

/// Result content without timing
fn content(result: &ExtractionResult) -> (Vec<ExtractedEntity>, Vec<ExtractedRelation>) {
    (result.entities.clone(), result.relations.clone())
}

fn names(result: &ExtractionResult) -> BTreeSet<String> {
    result.entities.iter().map(|e| e.name.clone()).collect()
}

fn batch_extract_calls(model: &ScriptedModel) -> Vec<(Vec<String>, Vec<String>)> {
    model
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ModelCall::BatchExtract {
                texts,
                entity_types,
            } => Some((texts, entity_types)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_apple_gdpr_fixed_schema() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);

    let results = pipeline
        .extract_batch(
            &texts(&[APPLE, GDPR]),
            &ExtractionTypes::entities(["person", "organization"]),
            32,
            ExtractOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);

    let jane = results[0].entity("Jane Smith").unwrap();
    assert_eq!(jane.entity_type, "person");
    assert_eq!(jane.span, Some((12, 22)));
    assert_eq!(results[0].entity("Apple").unwrap().entity_type, "organization");

    let relation = &results[0].relations[0];
    assert_eq!(
        (relation.subject.as_str(), relation.predicate.as_str(), relation.object.as_str()),
        ("Jane Smith", "works_for", "Apple")
    );
    assert!((relation.confidence.unwrap() - 0.7).abs() < 1e-6);

    assert!(results[1].entities.is_empty());
}

#[tokio::test]
async fn test_apple_gdpr_auto_domains() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);

    let results = pipeline
        .extract_batch_auto_domains(
            &texts(&[APPLE, GDPR]),
            AutoDomainOptions::default(),
            ExtractOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(names(&results[0]), BTreeSet::from(["Apple".to_string(), "Jane Smith".to_string()]));
    assert_eq!(results[1].entity("GDPR").unwrap().entity_type, "regulation");
    assert_eq!(results[1].relations[0].predicate, "applies_to");

    // One extraction batch per domain group, classification chunked at twice the batch size
    assert_eq!(batch_extract_calls(&model).len(), 2);
    assert_eq!(
        model.count_calls(|c| matches!(c, ModelCall::BatchClassify { .. })),
        1
    );
}

#[tokio::test]
async fn test_max_domains_shares_group() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);
    let input = texts(&["GDPR fines", "GDPR for every function"]);

    let auto = AutoDomainOptions {
        max_domains: 1,
        ..AutoDomainOptions::default()
    };
    pipeline
        .extract_batch_auto_domains(&input, auto, ExtractOptions::default())
        .await
        .unwrap();

    let calls = batch_extract_calls(&model);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, input);
    assert_eq!(calls[0].1, vec!["party", "regulation"]);

    // With room for both labels the second text forms its own group
    let model = Arc::new(scripted());
    pipeline_for(&model)
        .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap();
    assert_eq!(batch_extract_calls(&model).len(), 2);
}

#[tokio::test]
async fn test_grouping_is_deterministic() {
    let input = texts(&[CODE, APPLE, GDPR, NOTHING, "GDPR for every function", APPLE]);

    let mut runs = Vec::new();
    for _ in 0..3 {
        let model = Arc::new(scripted());
        let results = pipeline_for(&model)
            .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
            .await
            .unwrap();
        let contents: Vec<_> = results.iter().map(content).collect();
        runs.push((contents, batch_extract_calls(&model)));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1], runs[2]);
}

#[tokio::test]
async fn test_all_domains_skips_classification() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);

    let results = pipeline
        .extract_batch_all_domains(&texts(&[APPLE, GDPR, CODE]), 32, ExtractOptions::default())
        .await
        .unwrap();

    assert!(results[0].entity("Jane Smith").is_some());
    assert!(results[1].entity("GDPR").is_some());
    assert!(results[2].entity("parse_config").is_some());

    let calls = batch_extract_calls(&model);
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1,
        vec!["function", "library", "organization", "party", "person", "regulation"]
    );
    assert_eq!(
        model.count_calls(|c| matches!(c, ModelCall::Classify { .. } | ModelCall::BatchClassify { .. })),
        0
    );
}

// ============================================================================
// Degradation
// ============================================================================

#[tokio::test]
async fn test_failed_batch_equals_per_item_extraction() {
    let input = texts(&[APPLE, GDPR, CODE, NOTHING, APPLE]);
    let types = ExtractionTypes::entities(["person", "organization", "regulation"]);

    let healthy = Arc::new(scripted());
    let healthy_pipeline = pipeline_for(&healthy);
    let mut expected = Vec::new();
    for text in &input {
        let result = healthy_pipeline
            .extract_one(text, &types, ExtractOptions::default())
            .await
            .unwrap();
        expected.push(content(&result));
    }

    let failing = Arc::new(scripted().failing_batches());
    let results = pipeline_for(&failing)
        .extract_batch(&input, &types, 2, ExtractOptions::default())
        .await
        .unwrap();

    let actual: Vec<_> = results.iter().map(content).collect();
    assert_eq!(actual, expected);
    assert_eq!(batch_extract_calls(&failing).len(), 3);
    assert_eq!(
        failing.count_calls(|c| matches!(c, ModelCall::Extract { .. })),
        input.len()
    );
}

#[tokio::test]
async fn test_count_mismatch_falls_back() {
    let model = Arc::new(scripted().short_batches());
    let input = texts(&[APPLE, NOTHING, APPLE]);

    let results = pipeline_for(&model)
        .extract_batch(&input, &ExtractionTypes::defaults(), 8, ExtractOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].entity("Apple").is_some());
    assert!(results[1].is_empty());
    assert!(results[2].entity("Apple").is_some());
    assert_eq!(model.count_calls(|c| matches!(c, ModelCall::Extract { .. })), 3);
}

#[tokio::test]
async fn test_failure_stays_within_chunk() {
    let model = Arc::new(scripted().failing_on("POISON"));
    let input = texts(&[APPLE, "POISON Apple", APPLE]);

    let results = pipeline_for(&model)
        .extract_batch(&input, &ExtractionTypes::defaults(), 2, ExtractOptions::default())
        .await
        .unwrap();

    assert!(results[0].entity("Apple").is_some());
    // The poisoned text fails on its own too and degrades to an empty result
    assert!(results[1].is_empty());
    assert!(results[2].entity("Apple").is_some());

    assert_eq!(batch_extract_calls(&model).len(), 2);
    assert_eq!(model.count_calls(|c| matches!(c, ModelCall::Extract { .. })), 2);
}

#[tokio::test]
async fn test_classification_failure_uses_heuristic() {
    let model = Arc::new(scripted().failing_classification());
    let input = texts(&["This contract clause defines the obligation of each party under the jurisdiction"]);

    pipeline_for(&model)
        .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap();

    let calls = batch_extract_calls(&model);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec!["party", "regulation"]);
}

#[tokio::test]
async fn test_unavailable_model_aborts_extraction() {
    let pipeline = ExtractionPipeline::new(
        Arc::new(ModelHandle::new(Arc::new(UnavailableLoader::new("server down")))),
        Arc::new(PresetRegistry::from_snapshot(presets())),
        ProcessingConfig::default(),
    );
    let input = texts(&[APPLE]);

    let err = pipeline
        .extract_batch(&input, &ExtractionTypes::defaults(), 4, ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DexError::ModelUnavailable(_)));

    let err = pipeline
        .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DexError::ModelUnavailable(_)));

    // Classification still answers through the heuristic
    let detected = pipeline
        .classify_one("contract clause obligation party jurisdiction", 0.3)
        .await;
    assert_eq!(detected[0].label, "legal");
}

// ============================================================================
// Validation and small operations
// ============================================================================

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);
    let input = texts(&[APPLE]);

    let err = pipeline
        .extract_batch(&input, &ExtractionTypes::defaults(), 0, ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DexError::Validation(_)));

    let auto = AutoDomainOptions {
        max_domains: 0,
        ..AutoDomainOptions::default()
    };
    let err = pipeline
        .extract_batch_auto_domains(&input, auto, ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DexError::Validation(_)));

    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn test_empty_inputs() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);

    assert!(pipeline.classify_batch(&[], 0.3, 8).await.is_empty());
    assert!(pipeline
        .extract_batch_auto_domains(&[], AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap()
        .is_empty());
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn test_merge_presets_and_defaults() {
    let model = Arc::new(scripted());
    let pipeline = pipeline_for(&model);

    let merged = pipeline.merge_presets(&["legal", "code"]).await;
    assert_eq!(merged.entity_types, vec!["function", "library", "party", "regulation"]);

    let fallback = pipeline.merge_presets(&["unknown-domain"]).await;
    assert_eq!(fallback.entity_types, vec!["person", "organization"]);
}

#[tokio::test]
async fn test_extract_one_options() {
    let model = Arc::new(scripted());
    let options = ExtractOptions {
        include_confidence: false,
        include_spans: false,
    };

    let result = pipeline_for(&model)
        .extract_one(APPLE, &ExtractionTypes::defaults(), options)
        .await
        .unwrap();

    let jane = result.entity("Jane Smith").unwrap();
    assert_eq!(jane.confidence, None);
    assert_eq!(jane.span, None);
    assert_eq!(result.relations[0].confidence, None);
}

#[tokio::test]
async fn test_reload_presets_feeds_grouping_and_merge() {
    let path = std::env::temp_dir().join(format!("dex-{}-presets.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        r#"
[defaults]
entity_types = ["person", "organization"]

[domains.legal]
entity_types = ["regulation", "party"]
"#,
    )
    .unwrap();

    let model = Arc::new(scripted().with_label("compliance", "gdpr", 0.9));
    let pipeline = ExtractionPipeline::new(
        Arc::new(ModelHandle::preloaded(model.clone())),
        Arc::new(PresetRegistry::from_file(&path)),
        ProcessingConfig::default(),
    );
    let input = texts(&[GDPR]);

    pipeline
        .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap();
    assert_eq!(batch_extract_calls(&model)[0].1, vec!["party", "regulation"]);

    std::fs::write(
        &path,
        r#"
[defaults]
entity_types = ["person", "organization"]

[domains.compliance]
entity_types = ["regulation", "authority"]
"#,
    )
    .unwrap();

    let snapshot = pipeline.reload_presets().await;
    assert_eq!(snapshot.available_domains(), vec!["compliance"]);

    // The dropped domain falls back to the defaults
    assert_eq!(
        pipeline.merge_presets(&["legal"]).await.entity_types,
        vec!["person", "organization"]
    );
    assert_eq!(
        pipeline.merge_presets(&["compliance"]).await.entity_types,
        vec!["authority", "regulation"]
    );

    pipeline
        .extract_batch_auto_domains(&input, AutoDomainOptions::default(), ExtractOptions::default())
        .await
        .unwrap();
    let calls = batch_extract_calls(&model);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, vec!["authority", "regulation"]);

    std::fs::remove_file(path).ok();
}

// ============================================================================
// Properties
// ============================================================================

const POOL: [&str; 5] = [APPLE, GDPR, CODE, NOTHING, "GDPR for every function"];

fn expected_names(text: &str) -> BTreeSet<String> {
    let names: &[&str] = match text {
        APPLE => &["Apple", "Jane Smith"],
        GDPR => &["GDPR", "EU data processors"],
        CODE => &["parse_config"],
        "GDPR for every function" => &["GDPR"],
        _ => &[],
    };
    names.iter().map(|n| n.to_string()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_auto_domains_preserve_order(
        picks in proptest::collection::vec(0..POOL.len(), 0..24),
        batch_size in 1usize..6,
        max_domains in 1usize..4,
    ) {
        let input: Vec<String> = picks.iter().map(|&i| POOL[i].to_string()).collect();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let model = Arc::new(scripted());
        let auto = AutoDomainOptions {
            batch_size,
            max_domains,
            ..AutoDomainOptions::default()
        };
        let results = runtime
            .block_on(pipeline_for(&model).extract_batch_auto_domains(&input, auto, ExtractOptions::default()))
            .unwrap();

        prop_assert_eq!(results.len(), input.len());
        for (text, result) in input.iter().zip(&results) {
            prop_assert_eq!(names(result), expected_names(text));
        }
    }
}
