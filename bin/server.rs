// Fridge Manager - Web Server
// Callable endpoints, item writes with the status trigger, and the daily scan

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use fridge_manager::callable::{
    bearer_token, CharacterImageRequest, ProductInfoRequest, RecipeRequest, Services,
};
use fridge_manager::config::load_dotenv;
use fridge_manager::logging::init_logging;
use fridge_manager::{
    open_database, run_daily, ApiResponse, AppConfig, CallableError, FallbackRecipes, GeminiRecipeClient,
    HttpPushDispatcher, ImageGenerator, ImageStore, ItemInput, LogDispatcher, NotificationDispatcher,
    OpenFoodFactsClient, RecipeSuggester, StaticTokenAuthenticator, VertexImagenClient,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/callable/getProductInfo
async fn get_product_info(
    State(state): State<AppState>,
    payload: Result<Json<ProductInfoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, CallableError> {
    let Json(request) = payload?;
    let product = state.services.get_product_info(request).await?;
    Ok(Json(ApiResponse::ok(product)))
}

/// POST /api/callable/generateCharacterImage
async fn generate_character_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CharacterImageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, CallableError> {
    let Json(request) = payload?;
    let response = state
        .services
        .generate_character_image(auth_header(&headers), request)
        .await?;
    Ok(Json(ApiResponse::ok(response)))
}

/// POST /api/callable/getRecipeSuggestions
async fn get_recipe_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RecipeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, CallableError> {
    let Json(request) = payload?;
    let response = state
        .services
        .get_recipe_suggestions(auth_header(&headers), request)
        .await?;
    Ok(Json(ApiResponse::ok(response)))
}

/// GET /api/households/:id/items - Items with freshly computed statuses
async fn list_household_items(
    State(state): State<AppState>,
    Path(household_id): Path<String>,
) -> Result<impl IntoResponse, CallableError> {
    let items = state.services.list_items(&household_id, Utc::now())?;
    Ok(Json(ApiResponse::ok(items)))
}

/// PUT /api/items/:id - Write an item, then run the status trigger
async fn put_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    payload: Result<Json<ItemInput>, JsonRejection>,
) -> Result<impl IntoResponse, CallableError> {
    let Json(input) = payload?;
    let outcome = state.services.put_item(&item_id, input, Utc::now())?;
    Ok((StatusCode::OK, Json(ApiResponse::ok(outcome))))
}

/// POST /api/jobs/check-expiring - Run the expiry scan now
async fn run_expiry_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, CallableError> {
    let report = state
        .services
        .run_expiry_scan(auth_header(&headers), Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(report)))
}

// ============================================================================
// Wiring
// ============================================================================

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/callable/getProductInfo", post(get_product_info))
        .route("/callable/generateCharacterImage", post(generate_character_image))
        .route("/callable/getRecipeSuggestions", post(get_recipe_suggestions))
        .route("/households/:id/items", get(list_household_items))
        .route("/items/:id", put(put_item))
        .route("/jobs/check-expiring", post(run_expiry_scan))
        .with_state(state)
}

fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let conn = open_database(&config.database_path)?;
    info!(path = ?config.database_path, "database opened");

    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.push_endpoint {
        Some(endpoint) => Arc::new(HttpPushDispatcher::new(
            endpoint.clone(),
            config.push_token.clone(),
            config.http_timeout(),
        )?),
        None => {
            warn!("FRIDGE_PUSH_ENDPOINT not set; notifications will only be logged");
            Arc::new(LogDispatcher)
        }
    };

    let images: Option<Arc<dyn ImageGenerator>> = match (&config.gcp_project, &config.gcp_access_token) {
        (Some(project), Some(token)) => Some(Arc::new(VertexImagenClient::new(
            project.clone(),
            config.gcp_location.clone(),
            config.imagen_model.clone(),
            token.clone(),
            config.http_timeout(),
        )?)),
        _ => {
            warn!("Vertex AI not configured; character images are unavailable");
            None
        }
    };

    let recipes: Arc<dyn RecipeSuggester> = match &config.gemini_api_key {
        Some(key) => Arc::new(GeminiRecipeClient::new(
            key.clone(),
            config.gemini_model.clone(),
            config.http_timeout(),
        )?),
        None => Arc::new(FallbackRecipes),
    };

    if config.api_tokens.is_empty() {
        warn!("FRIDGE_API_TOKENS is empty; authenticated callables will reject every request");
    }

    Ok(Services {
        db: Arc::new(Mutex::new(conn)),
        authenticator: Arc::new(StaticTokenAuthenticator::new(config.api_tokens.clone())),
        products: Arc::new(OpenFoodFactsClient::new(&config.product_api_base, config.http_timeout())?),
        images,
        image_store: ImageStore::new(config.image_dir.clone(), &config.public_base_url),
        recipes,
        dispatcher,
        scan_options: config.scan_options(),
    })
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let config = AppConfig::from_env()?;
    if let Err(e) = init_logging(&config.log_level, config.log_json) {
        eprintln!("Warning: {}", e);
    }

    info!(version = fridge_manager::VERSION, "starting fridge server");

    let services = Arc::new(build_services(&config)?);
    let state = AppState {
        services: services.clone(),
    };

    // Daily expiry scan
    let schedule = config.schedule();
    tokio::spawn(async move {
        if let Err(e) = run_daily(
            services.db.clone(),
            services.dispatcher.clone(),
            schedule,
            services.scan_options,
        )
        .await
        {
            error!(error = %e, "scheduler stopped");
        }
    });

    let app = Router::new()
        .nest("/api", api_routes(state))
        .nest_service("/images", ServeDir::new(&config.image_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::CONTENT_TYPE, Request};
    use fridge_manager::{setup_database, ScanOptions};
    use rusqlite::Connection;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_router(dir: &std::path::Path) -> Router {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let services = Services {
            db: Arc::new(Mutex::new(conn)),
            authenticator: Arc::new(StaticTokenAuthenticator::new(vec!["secret".to_string()])),
            products: Arc::new(OpenFoodFactsClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap()),
            images: None,
            image_store: ImageStore::new(dir.to_path_buf(), "http://localhost:3000"),
            recipes: Arc::new(FallbackRecipes),
            dispatcher: Arc::new(LogDispatcher),
            scan_options: ScanOptions::default(),
        };

        api_routes(AppState {
            services: Arc::new(services),
        })
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, "Bearer secret")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn assert_invalid_argument(status: StatusCode, body: &serde_json::Value) {
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "invalid-argument");
    }

    #[tokio::test]
    async fn test_wrongly_typed_barcode_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(
            test_router(dir.path()),
            json_request("POST", "/callable/getProductInfo", r#"{"barcode": 4901234}"#),
        )
        .await;

        assert_invalid_argument(status, &body);
    }

    #[tokio::test]
    async fn test_item_without_expiry_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(
            test_router(dir.path()),
            json_request("PUT", "/items/i1", r#"{"householdId": "h1", "productName": "Milk"}"#),
        )
        .await;

        assert_invalid_argument(status, &body);
    }

    #[tokio::test]
    async fn test_missing_content_type_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/callable/getRecipeSuggestions")
            .header(AUTHORIZATION, "Bearer secret")
            .body(Body::from(r#"{"ingredients": ["卵"]}"#))
            .unwrap();

        let (status, body) = call(test_router(dir.path()), request).await;

        assert_invalid_argument(status, &body);
    }

    #[tokio::test]
    async fn test_well_formed_recipe_request_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(
            test_router(dir.path()),
            json_request("POST", "/callable/getRecipeSuggestions", r#"{"ingredients": ["卵"]}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["recipes"][0]["name"], "野菜炒め");
    }
}
