//! Result normalization
//!
//! Converts decoded raw hits into the canonical entity/relation model. Entity
//! hits are never dropped; malformed relation hits are skipped.

use std::time::Instant;

use dex_core::{clamp_confidence, ExtractedEntity, ExtractedRelation, ExtractionResult};

use crate::raw::{EntityHit, RawResult, RelationHit};
use crate::ExtractOptions;

/// Normalize one raw result.
///
/// `processing_time_ms` is the duration of this call. Callers timing a larger
/// operation overwrite it with their own measurement.
pub fn normalize(raw: &RawResult, options: ExtractOptions) -> ExtractionResult {
    let start = Instant::now();

    let entities = raw
        .entity_hits()
        .into_iter()
        .flat_map(|(entity_type, hits)| {
            hits.into_iter()
                .map(move |hit| entity_from_hit(entity_type, hit, options))
        })
        .collect();

    let relations = raw
        .relation_hits()
        .into_iter()
        .flat_map(|(predicate, hits)| {
            hits.into_iter()
                .filter_map(move |hit| relation_from_hit(predicate, hit, options))
        })
        .collect();

    ExtractionResult {
        entities,
        relations,
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Build an entity from one hit
pub fn entity_from_hit(entity_type: &str, hit: EntityHit, options: ExtractOptions) -> ExtractedEntity {
    match hit {
        EntityHit::Bare(text) => ExtractedEntity::new(text, entity_type),
        EntityHit::Record(record) => {
            let mut entity = ExtractedEntity::new(record.text, entity_type);

            if options.include_confidence {
                entity.confidence = record.score.and_then(clamp_confidence);
            }

            if options.include_spans {
                if let Some(start) = record.start {
                    // Missing end: assume the span covers the surface text
                    let end = record
                        .end
                        .unwrap_or_else(|| start + entity.name.chars().count());
                    entity.span = Some((start, end));
                }
            }

            entity
        }
    }
}

/// Build a relation from one hit; `None` for malformed hits
pub fn relation_from_hit(
    predicate: &str,
    hit: RelationHit,
    options: ExtractOptions,
) -> Option<ExtractedRelation> {
    let (subject, object, confidence) = match hit {
        RelationHit::Tuple {
            subject,
            object,
            score,
        } => {
            let confidence = score.or_else(|| {
                match (subject.confidence(), object.confidence()) {
                    (Some(s), Some(o)) => Some((s + o) / 2.0),
                    _ => None,
                }
            });
            (subject, object, confidence)
        }
        RelationHit::Record {
            subject,
            object,
            score,
        } => (subject, object, score),
        RelationHit::Malformed(value) => {
            tracing::debug!("Skipping malformed {} relation hit: {}", predicate, value);
            return None;
        }
    };

    let mut relation = ExtractedRelation::new(subject.text(), predicate, object.text());
    if options.include_confidence {
        relation.confidence = confidence.and_then(clamp_confidence);
    }
    Some(relation)
}

// ============================================================================
// Tests
// ============================================================================
