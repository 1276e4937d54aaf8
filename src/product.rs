// 🏷️ Product Lookup - Barcode → product metadata with a read-through cache
// Source of truth is Open Food Facts; SQLite `products` table is the cache

use crate::config::http_client;
use crate::db::{cache_product, get_cached_product};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub const USER_AGENT: &str = "FridgeManager/1.0";
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

/// Cached product metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub jan_code: String,
    pub product_name: String,
    pub manufacturer: String,
    pub category: String,
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProductLookupError {
    #[error("Product API request failed: {0}")]
    Request(String),

    #[error("Product API returned malformed data: {0}")]
    Decode(String),

    #[error("Product cache error: {0}")]
    Cache(String),
}

/// External catalogue queried on a cache miss
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// `Ok(None)` when the catalogue does not know the barcode
    async fn fetch(&self, barcode: &str) -> Result<Option<ProductInfo>, ProductLookupError>;
}

// ============================================================================
// OPEN FOOD FACTS
// ============================================================================

#[derive(Debug, Deserialize)]
struct OffResponse {
    #[serde(default)]
    status: i64,
    product: Option<OffProduct>,
}

#[derive(Debug, Deserialize)]
struct OffProduct {
    product_name: Option<String>,
    brands: Option<String>,
    categories: Option<String>,
    image_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl OffResponse {
    fn into_product_info(self, barcode: &str, now: DateTime<Utc>) -> Option<ProductInfo> {
        if self.status != 1 {
            return None;
        }
        let product = self.product?;

        Some(ProductInfo {
            jan_code: barcode.to_string(),
            product_name: non_empty(product.product_name)
                .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
            manufacturer: product.brands.unwrap_or_default(),
            category: product.categories.unwrap_or_default(),
            image_url: non_empty(product.image_url),
            updated_at: now,
        })
    }
}

pub struct OpenFoodFactsClient {
    base_url: String,
    client: reqwest::Client,
}

impl OpenFoodFactsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProductLookupError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout).map_err(|e| ProductLookupError::Request(e.to_string()))?,
        })
    }

    fn product_url(&self, barcode: &str) -> String {
        format!("{}/api/v2/product/{}.json", self.base_url, barcode)
    }
}

#[async_trait]
impl ProductSource for OpenFoodFactsClient {
    async fn fetch(&self, barcode: &str) -> Result<Option<ProductInfo>, ProductLookupError> {
        let response = self
            .client
            .get(self.product_url(barcode))
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| ProductLookupError::Request(e.to_string()))?;

        // Non-success (404 for unknown codes) means "no product", not an error
        if !response.status().is_success() {
            debug!(barcode, status = %response.status(), "product API returned no data");
            return Ok(None);
        }

        let body: OffResponse = response
            .json()
            .await
            .map_err(|e| ProductLookupError::Decode(e.to_string()))?;

        Ok(body.into_product_info(barcode, Utc::now()))
    }
}

// ============================================================================
// READ-THROUGH CACHE
// ============================================================================

/// Look up a barcode: cache first, then `source`, storing what it returns.
///
/// The connection lock is never held across the network call.
pub async fn get_product_info(
    db: &Arc<Mutex<Connection>>,
    source: &dyn ProductSource,
    barcode: &str,
) -> Result<Option<ProductInfo>, ProductLookupError> {
    {
        let conn = db
            .lock()
            .map_err(|_| ProductLookupError::Cache("database lock poisoned".to_string()))?;
        if let Some(cached) = get_cached_product(&conn, barcode)
            .map_err(|e| ProductLookupError::Cache(e.to_string()))?
        {
            debug!(barcode, "product cache hit");
            return Ok(Some(cached));
        }
    }

    let fetched = source.fetch(barcode).await?;

    if let Some(product) = &fetched {
        let conn = db
            .lock()
            .map_err(|_| ProductLookupError::Cache("database lock poisoned".to_string()))?;
        cache_product(&conn, product).map_err(|e| ProductLookupError::Cache(e.to_string()))?;
        info!(barcode, product_name = %product.product_name, "product fetched and cached");
    }

    Ok(fetched)
}
