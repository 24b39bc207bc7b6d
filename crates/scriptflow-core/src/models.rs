//! OpenRouter model catalog, restricted to the providers the pipeline uses.

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};

pub const OPENROUTER_MODELS_URL: &str = "https://openrouter.ai/api/v1/models";
pub const ALLOWED_PROVIDERS: &[&str] = &["openai", "google", "anthropic", "perplexity"];

/// Provider prefix of an OpenRouter model id (`anthropic/claude-3-opus` → `anthropic`).
pub fn provider_of(model_id: &str) -> &str {
    model_id.split('/').next().unwrap_or(model_id)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawModel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    context_length: u64,
    #[serde(default)]
    pricing: Pricing,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<RawModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub context_length: u64,
    pub pricing: Pricing,
    pub provider: String,
}

impl From<RawModel> for CatalogModel {
    fn from(raw: RawModel) -> Self {
        let provider = provider_of(&raw.id).to_string();
        Self {
            name: if raw.name.is_empty() {
                raw.id.clone()
            } else {
                raw.name
            },
            id: raw.id,
            description: raw.description,
            context_length: raw.context_length,
            pricing: raw.pricing,
            provider,
        }
    }
}

pub fn is_allowed(model: &CatalogModel) -> bool {
    ALLOWED_PROVIDERS.contains(&model.provider.as_str())
}

pub struct ModelCatalog {
    client: reqwest::Client,
    url: String,
}

impl ModelCatalog {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, OPENROUTER_MODELS_URL)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Fetch the catalog and keep only models from allowed providers.
    pub async fn fetch(&self) -> Result<Vec<CatalogModel>> {
        let resp = self
            .client
            .get(&self.url)
            .header("X-Title", "scriptflow")
            .send()
            .await
            .map_err(|e| FlowError::Catalog(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FlowError::Catalog(format!(
                "HTTP error! status: {}",
                resp.status().as_u16()
            )));
        }
        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| FlowError::Catalog(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(CatalogModel::from)
            .filter(is_allowed)
            .collect())
    }
}
