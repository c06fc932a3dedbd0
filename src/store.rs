//! Client for the BuyBot category store (the remote `/api/categories` API).

use crate::category::{CategoryNode, CategoryRecord};
use crate::config::AdminConfig;
use crate::validation::NewCategory;
use anyhow::{anyhow, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

/// Where category snapshots come from.
#[async_trait::async_trait]
pub trait CategorySource: Send + Sync {
    /// Flat list, one record per category.
    async fn fetch_records(&self) -> Result<Vec<CategoryRecord>>;
    /// Tree already nested by the store.
    async fn fetch_tree(&self) -> Result<Vec<CategoryNode>>;
    /// Create a category; returns the stored record.
    async fn create_category(&self, category: NewCategory) -> Result<CategoryRecord>;
}

/// Standard `{success, data, message}` wrapper around every store response.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpCategoryStore {
    client: Client,
    base_url: String,
}

impl HttpCategoryStore {
    pub fn new(config: &AdminConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to reach category store at {}", url))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("Category store GET {} failed: {} - {}", path, status, body));
        }

        decode_envelope(path, &body)
    }
}

#[async_trait::async_trait]
impl CategorySource for HttpCategoryStore {
    async fn fetch_records(&self) -> Result<Vec<CategoryRecord>> {
        let records: Vec<CategoryRecord> = self.get_json("categories").await?;
        info!("Fetched {} categories", records.len());
        Ok(records)
    }

    async fn fetch_tree(&self) -> Result<Vec<CategoryNode>> {
        let roots: Vec<CategoryNode> = self.get_json("categories/tree").await?;
        info!("Fetched category tree with {} roots", roots.len());
        Ok(roots)
    }

    async fn create_category(&self, category: NewCategory) -> Result<CategoryRecord> {
        let url = self.url("categories");

        let mut form = Form::new().text("name", category.name.clone());
        if let Some(description) = category.description {
            form = form.text("description", description);
        }
        if let Some(parent) = category.parent_id {
            form = form.text("parentCategory", parent);
        }
        if let Some(image) = category.image {
            let mut part = Part::bytes(image.data).file_name(image.filename);
            if let Some(content_type) = image.content_type {
                part = part
                    .mime_str(&content_type)
                    .with_context(|| format!("Invalid image content type: {}", content_type))?;
            }
            form = form.part("image", part);
        }

        debug!("POST {} (name={})", url, category.name);

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to reach category store at {}", url))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.message)
                .unwrap_or(body);
            return Err(anyhow!("Category store rejected category: {} - {}", status, message));
        }

        let record: CategoryRecord = decode_envelope("categories", &body)?;
        info!("Created category {} ({})", record.name, record.id);
        Ok(record)
    }
}

/// Unwrap a store envelope, treating `success: false` as a failure.
fn decode_envelope<T: DeserializeOwned>(path: &str, body: &str) -> Result<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse category store response for {}", path))?;

    if !envelope.success {
        return Err(anyhow!(
            "Category store response for {} was not successful: {}",
            path,
            envelope.message.unwrap_or_else(|| "no message".to_string())
        ));
    }

    envelope
        .data
        .ok_or_else(|| anyhow!("Category store response for {} has no data", path))
}
