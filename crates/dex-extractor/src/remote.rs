//! Remote extraction model client
//!
//! Talks JSON over HTTP to a model server hosting the extraction model.
//! Endpoints, relative to the configured base URL:
//! - `POST /extract`, `POST /batch_extract`
//! - `POST /classify`, `POST /batch_classify`
//! - `GET /health`, probed once when the model is loaded

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use dex_core::config::ModelConfig;
use dex_core::{DexError, Result};

use crate::raw::RawResult;
use crate::schema::{ClassificationSchema, Schema};
use crate::{ExtractionModel, ModelLoader};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    model: &'a str,
    text: &'a str,
    schema: &'a Schema,
    include_confidence: bool,
}

#[derive(Debug, Serialize)]
struct BatchExtractRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    schema: &'a Schema,
    include_confidence: bool,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    model: &'a str,
    text: &'a str,
    schema: &'a ClassificationSchema,
}

#[derive(Debug, Serialize)]
struct BatchClassifyRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    schema: &'a ClassificationSchema,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    device: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for a remote extraction model
pub struct RemoteModel {
    client: Client,
    base_url: String,
    model_name: String,
}

impl RemoteModel {
    /// Create a new client. A trailing slash on `base_url` is ignored.
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DexError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_name: model_name.into(),
        })
    }

    /// Create from config
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.model_name.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| DexError::Capability(format!("Model request to /{path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DexError::Capability(format!(
                "Model server error on /{path} ({status}): {error_text}"
            )));
        }

        response.json().await.map_err(|e| {
            DexError::MalformedResult(format!("Failed to parse /{path} response: {e}"))
        })
    }

    /// Probe the server's health endpoint
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| DexError::ModelUnavailable(format!("Model server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(DexError::ModelUnavailable(format!(
                "Model server health check returned {}",
                response.status()
            )));
        }

        let health: HealthResponse = response.json().await.map_err(|e| {
            DexError::ModelUnavailable(format!("Failed to parse health response: {e}"))
        })?;

        match health.status.as_str() {
            "ok" | "healthy" => {
                tracing::debug!(
                    "Model server healthy (device: {})",
                    health.device.as_deref().unwrap_or("unknown")
                );
                Ok(())
            }
            other => Err(DexError::ModelUnavailable(format!(
                "Model server reports status {other}"
            ))),
        }
    }
}

fn check_count(results: Vec<RawResult>, expected: usize) -> Result<Vec<RawResult>> {
    if results.len() != expected {
        return Err(DexError::MalformedResult(format!(
            "Expected {} results, model returned {}",
            expected,
            results.len()
        )));
    }
    Ok(results)
}

#[async_trait]
impl ExtractionModel for RemoteModel {
    async fn extract(&self, text: &str, schema: &Schema, include_confidence: bool) -> Result<RawResult> {
        let request = ExtractRequest {
            model: &self.model_name,
            text,
            schema,
            include_confidence,
        };
        self.post("extract", &request).await
    }

    async fn batch_extract(
        &self,
        texts: &[String],
        schema: &Schema,
        include_confidence: bool,
    ) -> Result<Vec<RawResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchExtractRequest {
            model: &self.model_name,
            texts,
            schema,
            include_confidence,
        };
        let response: BatchResponse = self.post("batch_extract", &request).await?;
        check_count(response.results, texts.len())
    }

    async fn classify(&self, text: &str, schema: &ClassificationSchema) -> Result<RawResult> {
        let request = ClassifyRequest {
            model: &self.model_name,
            text,
            schema,
        };
        self.post("classify", &request).await
    }

    async fn batch_classify(
        &self,
        texts: &[String],
        schema: &ClassificationSchema,
    ) -> Result<Vec<RawResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchClassifyRequest {
            model: &self.model_name,
            texts,
            schema,
        };
        let response: BatchResponse = self.post("batch_classify", &request).await?;
        check_count(response.results, texts.len())
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Loads a [`RemoteModel`] once its server answers the health probe
pub struct RemoteModelLoader {
    config: ModelConfig,
}

impl RemoteModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    async fn load(&self) -> Result<Arc<dyn ExtractionModel>> {
        let model = RemoteModel::from_config(&self.config)?;
        model.health().await?;
        Ok(Arc::new(model))
    }

    fn describe(&self) -> String {
        format!(
            "{} at {} on {}",
            self.config.model_name, self.config.base_url, self.config.device
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{build_schema, ClassificationLabel};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_extract_request_body() {
        let schema = build_schema(
            ["person"],
            Some(BTreeMap::from([(
                "works_for".to_string(),
                "person works for organization".to_string(),
            )])),
        );
        let request = ExtractRequest {
            model: "gliner",
            text: "Jane works for Apple",
            schema: &schema,
            include_confidence: true,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gliner",
                "text": "Jane works for Apple",
                "schema": {
                    "entity_types": ["person"],
                    "relation_types": {"works_for": "person works for organization"}
                },
                "include_confidence": true
            })
        );
    }

    #[test]
    fn test_classify_request_body() {
        let schema = ClassificationSchema::domains(
            vec![ClassificationLabel {
                name: "legal".to_string(),
                description: "Contracts".to_string(),
            }],
            0.3,
        );
        let texts = vec!["a".to_string(), "b".to_string()];
        let request = BatchClassifyRequest {
            model: "gliner",
            texts: &texts,
            schema: &schema,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["texts"], json!(["a", "b"]));
        assert_eq!(value["schema"]["task"], "domains");
        assert_eq!(value["schema"]["multi_label"], true);
    }

    #[test]
    fn test_batch_response_decoding() {
        let response: BatchResponse = serde_json::from_value(json!({
            "results": [
                {"entities": {"person": ["Jane"]}},
                {"relation_extraction": {"works_for": [["Jane", "Apple"]]}}
            ]
        }))
        .unwrap();

        assert_eq!(response.results.len(), 2);
        assert!(check_count(response.results, 3).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let model = RemoteModel::new("http://localhost:6971/", "gliner", Duration::from_secs(5)).unwrap();
        assert_eq!(model.url("extract"), "http://localhost:6971/extract");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let loader = RemoteModelLoader::new(ModelConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..ModelConfig::default()
        });

        let err = loader.load().await.err().unwrap();
        assert!(matches!(err, DexError::ModelUnavailable(_)));
        assert!(loader.describe().contains("127.0.0.1:1"));
    }
}
