//! Domain preset registry
//!
//! Maps domain names to the entity and relation types extracted for them.
//! Presets live in an immutable [`PresetSnapshot`]; [`PresetRegistry::reload`]
//! builds a new snapshot and swaps it in whole, so a reader sees either the old
//! or the new presets and never a mix.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::schema::{build_schema, ClassificationLabel, ClassificationSchema, Schema};

// ============================================================================
// Errors
// ============================================================================

/// Preset loading errors
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Failed to read preset file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preset file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

// ============================================================================
// Preset file format
// ============================================================================

/// Entity types given either as a list or as a name -> description table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EntityTypeList {
    Names(Vec<String>),
    Described(BTreeMap<String, String>),
}

impl EntityTypeList {
    fn into_names(self) -> Vec<String> {
        match self {
            Self::Names(names) => names,
            Self::Described(table) => table.into_keys().collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PresetFile {
    #[serde(default)]
    defaults: DefaultsSection,
    #[serde(default)]
    domains: BTreeMap<String, DomainSection>,
    skip_embedding_types: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultsSection {
    entity_types: Option<EntityTypeList>,
    relation_types: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct DomainSection {
    description: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    entity_types: Option<EntityTypeList>,
    #[serde(default)]
    relation_types: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

// ============================================================================
// Presets
// ============================================================================

/// Entity and relation types extracted for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPreset {
    /// Label description offered to the classifier
    pub description: String,
    pub enabled: bool,
    pub entity_types: BTreeSet<String>,
    /// Relation name -> description
    pub relation_types: BTreeMap<String, String>,
}

impl DomainPreset {
    pub fn new<I, S>(entity_types: I, relation_types: BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: String::new(),
            enabled: true,
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            relation_types,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Entity/relation types resolved for an extraction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPreset {
    pub entity_types: Vec<String>,
    pub relation_types: BTreeMap<String, String>,
}

impl MergedPreset {
    pub fn to_schema(&self) -> Schema {
        build_schema(
            self.entity_types.iter().cloned(),
            Some(self.relation_types.clone()),
        )
    }
}

/// Built-in default entity types
pub fn builtin_entity_types() -> Vec<String> {
    ["person", "organization", "location", "technology", "product", "date"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Built-in default relation types
pub fn builtin_relation_types() -> BTreeMap<String, String> {
    [
        ("works_for", "person works for organization"),
        ("located_in", "entity is located in location"),
        ("created_by", "product/technology created by person/organization"),
        ("uses", "organization/person uses technology"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Built-in entity types that skip embedding generation
pub fn builtin_skip_embedding_types() -> Vec<String> {
    ["price", "date", "quantity", "amount", "currency", "size", "duration"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ============================================================================
// Snapshot
// ============================================================================

/// One immutable view of the preset configuration
#[derive(Debug, Clone, Serialize)]
pub struct PresetSnapshot {
    domains: BTreeMap<String, DomainPreset>,
    defaults: MergedPreset,
    skip_embedding_types: Vec<String>,
    loaded_at: DateTime<Utc>,
}

impl Default for PresetSnapshot {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetSnapshot {
    /// Built-in defaults and no domains
    pub fn builtin() -> Self {
        Self {
            domains: BTreeMap::new(),
            defaults: MergedPreset {
                entity_types: builtin_entity_types(),
                relation_types: builtin_relation_types(),
            },
            skip_embedding_types: builtin_skip_embedding_types(),
            loaded_at: Utc::now(),
        }
    }

    /// Replace the default types
    pub fn with_defaults<I, S>(
        mut self,
        entity_types: I,
        relation_types: BTreeMap<String, String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = MergedPreset {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            relation_types,
        };
        self
    }

    /// Add or replace a domain
    pub fn with_domain(mut self, name: impl Into<String>, preset: DomainPreset) -> Self {
        let name = name.into();
        let preset = if preset.description.is_empty() {
            let description = format!("Content related to {name}");
            preset.with_description(description)
        } else {
            preset
        };
        self.domains.insert(name, preset);
        self
    }

    /// Parse a TOML preset document
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, PresetError> {
        let file: PresetFile = toml::from_str(content).map_err(|e| PresetError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut snapshot = Self::builtin();

        if let Some(entity_types) = file.defaults.entity_types {
            snapshot.defaults.entity_types = entity_types.into_names();
        }
        if let Some(relation_types) = file.defaults.relation_types {
            snapshot.defaults.relation_types = relation_types;
        }
        if let Some(skip) = file.skip_embedding_types {
            snapshot.skip_embedding_types = skip;
        }

        for (name, section) in file.domains {
            let entity_types = section
                .entity_types
                .map(EntityTypeList::into_names)
                .unwrap_or_default();
            let mut preset = DomainPreset::new(entity_types, section.relation_types);
            preset.enabled = section.enabled;
            if let Some(description) = section.description {
                preset.description = description;
            }
            snapshot = snapshot.with_domain(name, preset);
        }

        Ok(snapshot)
    }

    /// Read and parse a TOML preset file
    pub fn from_file(path: &Path) -> Result<Self, PresetError> {
        let content = std::fs::read_to_string(path).map_err(|e| PresetError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Read a preset file, degrading to built-in defaults with no domains
    pub fn load_or_builtin(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(snapshot) => {
                tracing::info!(
                    "Loaded {} domain presets from {}: {:?}",
                    snapshot.domains.len(),
                    path.display(),
                    snapshot.available_domains()
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!("{}, using built-in defaults", e);
                Self::builtin()
            }
        }
    }

    /// Names of all configured domains, enabled or not
    pub fn available_domains(&self) -> Vec<String> {
        self.domains.keys().cloned().collect()
    }

    pub fn domain(&self, name: &str) -> Option<&DomainPreset> {
        self.domains.get(name)
    }

    pub fn domains(&self) -> &BTreeMap<String, DomainPreset> {
        &self.domains
    }

    pub fn defaults(&self) -> &MergedPreset {
        &self.defaults
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn skip_embedding_types(&self) -> &[String] {
        &self.skip_embedding_types
    }

    /// Whether downstream embedding should skip this entity type
    pub fn should_skip_embedding(&self, entity_type: &str) -> bool {
        self.skip_embedding_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(entity_type))
    }

    fn enabled_domains(&self) -> impl Iterator<Item = (&String, &DomainPreset)> {
        self.domains.iter().filter(|(_, preset)| preset.enabled)
    }

    /// Labels offered to the domain classifier
    pub fn classification_labels(&self) -> Vec<ClassificationLabel> {
        self.enabled_domains()
            .map(|(name, preset)| ClassificationLabel {
                name: name.clone(),
                description: preset.description.clone(),
            })
            .collect()
    }

    /// Domain classification schema at the given threshold
    pub fn classification_schema(&self, threshold: f32) -> ClassificationSchema {
        ClassificationSchema::domains(self.classification_labels(), threshold)
    }

    /// Union of the named domains' presets.
    ///
    /// Unknown and disabled domains are skipped. When nothing matched, the
    /// defaults are returned so the result always has entity types.
    pub fn merge<S: AsRef<str>>(&self, domains: &[S]) -> MergedPreset {
        let mut entity_types = BTreeSet::new();
        let mut relation_types = BTreeMap::new();

        for name in domains {
            match self.domains.get(name.as_ref()) {
                Some(preset) if preset.enabled => {
                    entity_types.extend(preset.entity_types.iter().cloned());
                    relation_types.extend(
                        preset
                            .relation_types
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone())),
                    );
                }
                _ => {}
            }
        }

        if entity_types.is_empty() {
            return self.defaults.clone();
        }

        MergedPreset {
            entity_types: entity_types.into_iter().collect(),
            relation_types,
        }
    }

    /// Union of every enabled domain plus the defaults
    pub fn merge_all(&self) -> MergedPreset {
        let mut entity_types: BTreeSet<String> = BTreeSet::new();
        let mut relation_types = BTreeMap::new();

        for (_, preset) in self.enabled_domains() {
            entity_types.extend(preset.entity_types.iter().cloned());
            relation_types.extend(
                preset
                    .relation_types
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        entity_types.extend(self.defaults.entity_types.iter().cloned());
        relation_types.extend(
            self.defaults
                .relation_types
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        MergedPreset {
            entity_types: entity_types.into_iter().collect(),
            relation_types,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Where presets come from
#[derive(Debug, Clone)]
pub enum PresetSource {
    /// TOML file, re-read on every reload
    File(PathBuf),
    /// Fixed snapshot, reinstalled on reload
    Static(PresetSnapshot),
}

/// Shared, atomically reloadable preset registry
pub struct PresetRegistry {
    source: PresetSource,
    current: RwLock<Arc<PresetSnapshot>>,
}

impl PresetRegistry {
    /// Load presets from the source. Never fails: a missing or malformed file
    /// yields the built-in defaults.
    pub fn new(source: PresetSource) -> Self {
        let snapshot = Self::load(&source);
        Self {
            source,
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(PresetSource::File(path.into()))
    }

    pub fn from_snapshot(snapshot: PresetSnapshot) -> Self {
        Self::new(PresetSource::Static(snapshot))
    }

    fn load(source: &PresetSource) -> PresetSnapshot {
        match source {
            PresetSource::File(path) => PresetSnapshot::load_or_builtin(path),
            PresetSource::Static(snapshot) => PresetSnapshot {
                loaded_at: Utc::now(),
                ..snapshot.clone()
            },
        }
    }

    pub fn source(&self) -> &PresetSource {
        &self.source
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Arc<PresetSnapshot> {
        self.current.read().await.clone()
    }

    /// Merge presets of the named domains in the current snapshot
    pub async fn merge<S: AsRef<str>>(&self, domains: &[S]) -> MergedPreset {
        self.snapshot().await.merge(domains)
    }

    /// Merge every domain in the current snapshot
    pub async fn merge_all(&self) -> MergedPreset {
        self.snapshot().await.merge_all()
    }

    /// Re-read the source and swap the snapshot in whole
    pub async fn reload(&self) -> Arc<PresetSnapshot> {
        let source = self.source.clone();
        let snapshot = match tokio::task::spawn_blocking(move || Self::load(&source)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Preset reload task failed: {}, using built-in defaults", e);
                PresetSnapshot::builtin()
            }
        };
        let snapshot = Arc::new(snapshot);

        *self.current.write().await = snapshot.clone();
        tracing::info!(
            "Reloaded presets: {} domains, {} skip-embedding types",
            snapshot.domains.len(),
            snapshot.skip_embedding_types.len()
        );

        snapshot
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PRESETS: &str = r#"
skip_embedding_types = ["price", "date"]

[defaults]
entity_types = ["person", "organization"]
relation_types = { works_for = "person works for organization" }

[domains.legal]
description = "Contracts and legal obligations"
entity_types = ["party", "clause", "jurisdiction"]
relation_types = { bound_by = "party bound by clause" }

[domains.code]
entity_types = { function = "A named function", library = "A software library" }
relation_types = { calls = "function calls function" }

[domains.ecommerce]
enabled = false
entity_types = ["product", "price"]
"#;

    fn snapshot() -> PresetSnapshot {
        PresetSnapshot::from_toml_str(PRESETS, Path::new("test.toml")).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dex-{}-{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn test_parse_presets() {
        let snapshot = snapshot();

        assert_eq!(snapshot.available_domains(), vec!["code", "ecommerce", "legal"]);
        assert_eq!(snapshot.defaults().entity_types, vec!["person", "organization"]);

        let code = snapshot.domain("code").unwrap();
        assert!(code.entity_types.contains("function"));
        assert_eq!(code.description, "Content related to code");

        assert!(!snapshot.domain("ecommerce").unwrap().enabled);
        assert!(snapshot.should_skip_embedding("PRICE"));
        assert!(!snapshot.should_skip_embedding("person"));
    }

    #[test]
    fn test_sample_preset_file_parses() {
        let sample = include_str!("../../../entity-extraction.toml");
        let snapshot = PresetSnapshot::from_toml_str(sample, Path::new("entity-extraction.toml")).unwrap();

        assert_eq!(
            snapshot.available_domains(),
            vec!["code", "documentation", "ecommerce", "legal"]
        );
        assert_eq!(snapshot.defaults().entity_types, builtin_entity_types());
        assert_eq!(snapshot.defaults().relation_types, builtin_relation_types());
        assert!(snapshot.domain("code").unwrap().entity_types.contains("endpoint"));
        assert!(snapshot.should_skip_embedding("currency"));
    }

    #[test]
    fn test_merge_unions_domains() {
        let merged = snapshot().merge(&["legal", "code"]);
        assert_eq!(
            merged.entity_types,
            vec!["clause", "function", "jurisdiction", "library", "party"]
        );
        assert_eq!(merged.relation_types.len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snapshot = snapshot();
        assert_eq!(snapshot.merge(&["legal", "legal"]), snapshot.merge(&["legal"]));
    }

    #[test]
    fn test_merge_falls_back_to_defaults() {
        let snapshot = snapshot();
        let empty: [&str; 0] = [];

        assert_eq!(snapshot.merge(&empty), *snapshot.defaults());
        assert_eq!(snapshot.merge(&["unknown-domain"]), *snapshot.defaults());
        // Disabled domains are not merged
        assert_eq!(snapshot.merge(&["ecommerce"]), *snapshot.defaults());
    }

    #[test]
    fn test_merge_all_includes_defaults() {
        let merged = snapshot().merge_all();
        assert!(merged.entity_types.contains(&"person".to_string()));
        assert!(merged.entity_types.contains(&"party".to_string()));
        assert!(!merged.entity_types.contains(&"product".to_string()));
        assert!(merged.relation_types.contains_key("works_for"));
        assert!(merged.relation_types.contains_key("calls"));
    }

    #[test]
    fn test_classification_labels_skip_disabled() {
        let labels = snapshot().classification_labels();
        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["code", "legal"]);
        assert_eq!(labels[1].description, "Contracts and legal obligations");
    }

    #[test]
    fn test_malformed_file_uses_builtin() {
        let path = temp_path("broken.toml");
        std::fs::write(&path, "domains = 12").unwrap();

        let snapshot = PresetSnapshot::load_or_builtin(&path);
        assert!(snapshot.available_domains().is_empty());
        assert_eq!(snapshot.defaults().entity_types, builtin_entity_types());

        let missing = PresetSnapshot::load_or_builtin(Path::new("/nonexistent/presets.toml"));
        assert!(missing.available_domains().is_empty());

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let path = temp_path("presets.toml");
        std::fs::write(&path, PRESETS).unwrap();

        let registry = PresetRegistry::from_file(&path);
        let before = registry.snapshot().await;
        assert_eq!(before.available_domains().len(), 3);

        std::fs::write(
            &path,
            r#"
[domains.medical]
entity_types = ["drug", "condition"]
"#,
        )
        .unwrap();

        let after = registry.reload().await;
        assert_eq!(after.available_domains(), vec!["medical"]);
        assert_eq!(registry.snapshot().await.available_domains(), vec!["medical"]);

        // Earlier readers keep the snapshot they took
        assert_eq!(before.available_domains().len(), 3);

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_static_registry_merge() {
        let registry = PresetRegistry::from_snapshot(snapshot());
        let merged = registry.merge(&["legal"]).await;
        assert!(merged.entity_types.contains(&"party".to_string()));

        registry.reload().await;
        assert_eq!(registry.snapshot().await.available_domains().len(), 3);
    }
}
