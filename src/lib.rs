// Fridge Manager - Core Library
// Household food inventory: expiry policy, storage and the handlers around it

pub mod expiry;      // Freshness classification + notification eligibility
pub mod models;      // Items, households, settings defaults
pub mod db;          // SQLite storage, product cache, sent-log, audit trail
pub mod jobs;        // Status trigger + expiry scan
pub mod scheduler;   // Daily firing time
pub mod notifier;    // Push dispatch
pub mod product;     // Barcode lookup with read-through cache
pub mod imagegen;    // Character image prompts + image model client
pub mod recipes;     // Recipe suggestions
pub mod callable;    // Request validation, auth, error categories
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use expiry::{
    classify, classify_now, days_until_expiry, needs_status_update, select_notifiable_items,
    FreshnessStatus, NotificationEvent,
};
pub use models::{Household, HouseholdSettings, Item, ItemInput};
pub use db::{
    Event, open_database, setup_database, insert_household, get_household, get_all_households,
    upsert_item, get_item, get_items_for_household, update_item_status, delete_item,
    load_items_csv, insert_items, insert_event, get_events_for_entity,
};
pub use jobs::{check_expiring_products, update_product_status, write_item, ScanOptions, ScanReport, TriggerOutcome};
pub use scheduler::{run_daily, DailySchedule};
pub use notifier::{HttpPushDispatcher, LogDispatcher, NotificationDispatcher, PushMessage};
pub use product::{OpenFoodFactsClient, ProductInfo, ProductSource};
pub use imagegen::{ImageGenerator, ImageStore, VertexImagenClient};
pub use recipes::{FallbackRecipes, GeminiRecipeClient, Recipe, RecipeSuggester};
pub use callable::{ApiResponse, CallableError, Services, StaticTokenAuthenticator};
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
