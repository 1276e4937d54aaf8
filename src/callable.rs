// 📞 Callable Handlers - Request validation, auth and error categories
// Transport-agnostic: the HTTP server only decodes JSON and maps errors to
// status codes. Each handler is (validate → call one collaborator → shape).

use crate::imagegen::{self, ImageGenerator, ImageStore};
use crate::db;
use crate::jobs::{self, ScanOptions, ScanReport, TriggerOutcome};
use crate::models::{Item, ItemInput};
use crate::notifier::NotificationDispatcher;
use crate::product::{self, ProductInfo, ProductSource};
use crate::recipes::{Recipe, RecipeSuggester};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

// ============================================================================
// ERRORS
// ============================================================================

/// Error categories reported to callers. Bad input and downstream failures
/// are always distinct.
#[derive(Debug, thiserror::Error)]
pub enum CallableError {
    #[error("User must be authenticated")]
    Unauthenticated,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl CallableError {
    pub fn code(&self) -> &'static str {
        match self {
            CallableError::Unauthenticated => "unauthenticated",
            CallableError::InvalidArgument(_) => "invalid-argument",
            CallableError::NotFound(_) => "not-found",
            CallableError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CallableError::Unauthenticated => 401,
            CallableError::InvalidArgument(_) => 400,
            CallableError::NotFound(_) => 404,
            CallableError::Internal(_) => 500,
        }
    }
}

impl From<anyhow::Error> for CallableError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "internal error");
        CallableError::Internal(err.to_string())
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn err(error: &CallableError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for CallableError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(ApiResponse::err(&self))).into_response()
    }
}

/// Unreadable request bodies (wrong types, missing fields, no JSON content
/// type) are the caller's fault
#[cfg(feature = "server")]
impl From<axum::extract::rejection::JsonRejection> for CallableError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "rejected request body");
        CallableError::InvalidArgument(rejection.body_text())
    }
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: Option<&str>) -> Result<(), CallableError>;
}

/// Accepts a fixed set of bearer tokens
pub struct StaticTokenAuthenticator {
    tokens: HashSet<String>,
}

impl StaticTokenAuthenticator {
    pub fn new<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: Option<&str>) -> Result<(), CallableError> {
        match token {
            Some(token) if self.tokens.contains(token) => Ok(()),
            _ => Err(CallableError::Unauthenticated),
        }
    }
}

// ============================================================================
// REQUESTS / RESPONSES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfoRequest {
    pub barcode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterImageRequest {
    pub product_name: Option<String>,
    pub emotion_state: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterImageResponse {
    pub image_url: String,
}

/// `ingredients` stays untyped so a wrong shape is reported as bad input
#[derive(Debug, Default, Deserialize)]
pub struct RecipeRequest {
    pub ingredients: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub recipes: Vec<Recipe>,
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ============================================================================
// SERVICES
// ============================================================================

/// Everything the handlers talk to
pub struct Services {
    pub db: Arc<Mutex<Connection>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub products: Arc<dyn ProductSource>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub image_store: ImageStore,
    pub recipes: Arc<dyn RecipeSuggester>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub scan_options: ScanOptions,
}

impl Services {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CallableError> {
        self.db
            .lock()
            .map_err(|_| CallableError::Internal("database lock poisoned".to_string()))
    }

    /// Barcode lookup with read-through cache. No authentication required.
    /// `Ok(None)` when the barcode is unknown.
    pub async fn get_product_info(&self, request: ProductInfoRequest) -> Result<Option<ProductInfo>, CallableError> {
        let barcode = required(request.barcode)
            .ok_or_else(|| CallableError::InvalidArgument("Barcode is required".to_string()))?;

        product::get_product_info(&self.db, self.products.as_ref(), &barcode)
            .await
            .map_err(|e| {
                error!(barcode = %barcode, error = %e, "error fetching product info");
                CallableError::Internal("Failed to fetch product information".to_string())
            })
    }

    pub async fn generate_character_image(
        &self,
        token: Option<&str>,
        request: CharacterImageRequest,
    ) -> Result<CharacterImageResponse, CallableError> {
        self.authenticator.authenticate(token)?;

        let (product_name, emotion) = match (required(request.product_name), required(request.emotion_state)) {
            (Some(p), Some(e)) => (p, e),
            _ => {
                return Err(CallableError::InvalidArgument(
                    "Product name and emotion state are required".to_string(),
                ))
            }
        };

        let generator = self.images.as_ref().ok_or_else(|| {
            warn!("image generation requested but no image model is configured");
            CallableError::Internal("Failed to generate character image".to_string())
        })?;

        let image_url = imagegen::generate_character_image(
            generator.as_ref(),
            &self.image_store,
            &product_name,
            &emotion,
            request.category.as_deref(),
        )
        .await
        .map_err(|e| {
            error!(product_name = %product_name, error = %e, "error generating image");
            CallableError::Internal("Failed to generate character image".to_string())
        })?;

        Ok(CharacterImageResponse { image_url })
    }

    pub async fn get_recipe_suggestions(
        &self,
        token: Option<&str>,
        request: RecipeRequest,
    ) -> Result<RecipeResponse, CallableError> {
        self.authenticator.authenticate(token)?;

        let invalid = || CallableError::InvalidArgument("Ingredients array is required".to_string());
        let ingredients: Vec<String> = match request.ingredients {
            Some(serde_json::Value::Array(values)) => values
                .into_iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
                .collect::<Result<_, _>>()?,
            _ => return Err(invalid()),
        };

        let recipes = self.recipes.suggest(&ingredients).await.map_err(|e| {
            error!(error = %e, "error getting recipes");
            CallableError::Internal("Failed to get recipe suggestions".to_string())
        })?;

        Ok(RecipeResponse { recipes })
    }

    /// Items of a household with statuses recomputed at `now` (read-side
    /// projection; nothing is written)
    pub fn list_items(&self, household_id: &str, now: DateTime<Utc>) -> Result<Vec<Item>, CallableError> {
        let conn = self.conn()?;
        if db::get_household(&conn, household_id)?.is_none() {
            return Err(CallableError::NotFound(format!("Household not found: {}", household_id)));
        }

        let mut items = db::get_items_for_household(&conn, household_id)?;
        for item in &mut items {
            item.refresh_status(now);
        }
        Ok(items)
    }

    /// Store an item, then run the status trigger on it
    pub fn put_item(&self, item_id: &str, input: ItemInput, now: DateTime<Utc>) -> Result<TriggerOutcome, CallableError> {
        if item_id.trim().is_empty() {
            return Err(CallableError::InvalidArgument("Item id is required".to_string()));
        }
        if input.product_name.trim().is_empty() || input.household_id.trim().is_empty() {
            return Err(CallableError::InvalidArgument(
                "Household id and product name are required".to_string(),
            ));
        }

        let item = input.into_item(item_id, now);
        let conn = self.conn()?;
        Ok(jobs::write_item(&conn, &item, now)?)
    }

    pub async fn run_expiry_scan(&self, token: Option<&str>, now: DateTime<Utc>) -> Result<ScanReport, CallableError> {
        self.authenticator.authenticate(token)?;
        Ok(jobs::check_expiring_products(&self.db, self.dispatcher.as_ref(), now, self.scan_options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::FreshnessStatus;
    use crate::imagegen::ImageError;
    use crate::models::{Household, HouseholdSettings};
    use crate::notifier::LogDispatcher;
    use crate::product::ProductLookupError;
    use crate::recipes::FallbackRecipes;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    struct OfflineProducts;

    #[async_trait]
    impl ProductSource for OfflineProducts {
        async fn fetch(&self, _barcode: &str) -> Result<Option<ProductInfo>, ProductLookupError> {
            Err(ProductLookupError::Request("network unreachable".to_string()))
        }
    }

    struct FailingImages;

    #[async_trait]
    impl ImageGenerator for FailingImages {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ImageError> {
            Err(ImageError::Empty)
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn test_services(dir: &std::path::Path) -> Services {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        Services {
            db: Arc::new(Mutex::new(conn)),
            authenticator: Arc::new(StaticTokenAuthenticator::new(vec!["secret".to_string()])),
            products: Arc::new(OfflineProducts),
            images: Some(Arc::new(FailingImages)),
            image_store: ImageStore::new(dir.to_path_buf(), "http://localhost:3000"),
            recipes: Arc::new(FallbackRecipes),
            dispatcher: Arc::new(LogDispatcher),
            scan_options: ScanOptions::default(),
        }
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(CallableError::Unauthenticated.status_code(), 401);
        assert_eq!(CallableError::InvalidArgument("x".into()).code(), "invalid-argument");
        assert_eq!(CallableError::Internal("x".into()).code(), "internal");

        let body = serde_json::to_value(ApiResponse::err(&CallableError::Unauthenticated)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_product_info_validation_and_internal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());

        let missing = services.get_product_info(ProductInfoRequest { barcode: None }).await;
        assert!(matches!(missing, Err(CallableError::InvalidArgument(_))));

        let offline = services
            .get_product_info(ProductInfoRequest { barcode: Some("4901234".to_string()) })
            .await;
        assert!(matches!(offline, Err(CallableError::Internal(_))));
    }

    #[tokio::test]
    async fn test_cached_product_served_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());
        {
            let conn = services.db.lock().unwrap();
            db::cache_product(
                &conn,
                &ProductInfo {
                    jan_code: "4901234".to_string(),
                    product_name: "Natto".to_string(),
                    manufacturer: String::new(),
                    category: String::new(),
                    image_url: None,
                    updated_at: fixed_now(),
                },
            )
            .unwrap();
        }

        let product = services
            .get_product_info(ProductInfoRequest { barcode: Some("4901234".to_string()) })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(product.product_name, "Natto");
    }

    #[tokio::test]
    async fn test_image_requires_auth_then_fields() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());

        let unauth = services
            .generate_character_image(None, CharacterImageRequest::default())
            .await;
        assert!(matches!(unauth, Err(CallableError::Unauthenticated)));

        let missing = services
            .generate_character_image(
                Some("secret"),
                CharacterImageRequest {
                    product_name: Some("Milk".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(missing, Err(CallableError::InvalidArgument(_))));

        let failed = services
            .generate_character_image(
                Some("secret"),
                CharacterImageRequest {
                    product_name: Some("Milk".to_string()),
                    emotion_state: Some("😊".to_string()),
                    category: None,
                },
            )
            .await;
        assert!(matches!(failed, Err(CallableError::Internal(_))));
    }

    #[tokio::test]
    async fn test_recipe_request_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());

        let wrong_token = services
            .get_recipe_suggestions(Some("nope"), RecipeRequest::default())
            .await;
        assert!(matches!(wrong_token, Err(CallableError::Unauthenticated)));

        let not_array = services
            .get_recipe_suggestions(Some("secret"), RecipeRequest { ingredients: Some(json!("卵")) })
            .await;
        assert!(matches!(not_array, Err(CallableError::InvalidArgument(_))));

        let ok = services
            .get_recipe_suggestions(Some("secret"), RecipeRequest { ingredients: Some(json!(["卵", "ねぎ"])) })
            .await
            .unwrap();
        assert_eq!(ok.recipes[0].ingredients, vec!["卵: 適量", "ねぎ: 適量"]);
    }

    #[test]
    fn test_put_item_then_list_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());
        {
            let conn = services.db.lock().unwrap();
            db::insert_household(
                &conn,
                &Household {
                    id: "h1".to_string(),
                    name: "Home".to_string(),
                    settings: HouseholdSettings::default(),
                },
            )
            .unwrap();
        }

        let input: ItemInput = serde_json::from_value(json!({
            "householdId": "h1",
            "productName": "Milk",
            "expiryDate": (fixed_now() + Duration::days(5)).to_rfc3339(),
        }))
        .unwrap();
        let outcome = services.put_item("i1", input, fixed_now()).unwrap();
        assert_eq!(outcome, TriggerOutcome::Unchanged { status: FreshnessStatus::Caution });

        let later = fixed_now() + Duration::days(6);
        let items = services.list_items("h1", later).unwrap();
        assert_eq!(items[0].status(), FreshnessStatus::Expired);

        assert!(matches!(services.list_items("nope", later), Err(CallableError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_scan_requires_auth() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_services(dir.path());

        assert!(matches!(
            services.run_expiry_scan(None, fixed_now()).await,
            Err(CallableError::Unauthenticated)
        ));
        let report = services.run_expiry_scan(Some("secret"), fixed_now()).await.unwrap();
        assert_eq!(report.sent, 0);
    }
}
