// 🧊 Inventory Models - Items and households
// Items carry a cached freshness status that only the engine may compute

use crate::expiry::{classify, needs_status_update, DEFAULT_NOTIFICATION_DAYS, FreshnessStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// HOUSEHOLD SETTINGS
// ============================================================================

/// Notification preferences of a household.
///
/// Constructed through [`HouseholdSettings::with_defaults`] (directly or via
/// `From<serde_json::Value>`), which is the only place default policy lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "serde_json::Value")]
pub struct HouseholdSettings {
    pub enable_notifications: bool,
    pub notification_days: i64,
}

impl HouseholdSettings {
    /// Fill in absent values: notifications off, 3-day window.
    /// A non-positive window is treated as absent.
    pub fn with_defaults(enable_notifications: Option<bool>, notification_days: Option<i64>) -> Self {
        HouseholdSettings {
            enable_notifications: enable_notifications.unwrap_or(false),
            notification_days: notification_days
                .filter(|days| *days > 0)
                .unwrap_or(DEFAULT_NOTIFICATION_DAYS),
        }
    }
}

impl Default for HouseholdSettings {
    fn default() -> Self {
        Self::with_defaults(None, None)
    }
}

/// Lenient conversion from a stored settings document. Wrong types and
/// missing keys fall back to defaults instead of failing.
impl From<serde_json::Value> for HouseholdSettings {
    fn from(value: serde_json::Value) -> Self {
        let enable = value.get("enableNotifications").and_then(|v| v.as_bool());
        let days = value.get("notificationDays").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f.trunc() as i64))
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        });

        HouseholdSettings::with_defaults(enable, days)
    }
}

// ============================================================================
// HOUSEHOLD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub settings: HouseholdSettings,
}

impl Household {
    pub fn new(name: &str, settings: HouseholdSettings) -> Self {
        Household {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            settings,
        }
    }
}

// ============================================================================
// ITEM
// ============================================================================

/// A food item in a household's fridge.
///
/// `status` is a projection of `expiry_date`; it is private so the only ways to
/// change it are [`Item::refresh_status`] or loading a stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub household_id: String,
    pub product_name: String,
    pub expiry_date: DateTime<Utc>,
    status: FreshnessStatus,

    /// False when the stored label was not a known status
    #[serde(skip)]
    status_valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jan_code: Option<String>,
}

impl Item {
    /// New item with its status computed against the current clock
    pub fn new(id: &str, household_id: &str, product_name: &str, expiry_date: DateTime<Utc>) -> Self {
        Item {
            id: id.to_string(),
            household_id: household_id.to_string(),
            product_name: product_name.to_string(),
            expiry_date,
            status: classify(expiry_date, Utc::now()),
            status_valid: true,
            category: None,
            jan_code: None,
        }
    }

    /// Rebuild an item from storage, keeping the stored (possibly stale)
    /// status. `None` means the stored label was unreadable; such an item
    /// reports FRESH until it is refreshed.
    pub(crate) fn from_stored(
        id: String,
        household_id: String,
        product_name: String,
        expiry_date: DateTime<Utc>,
        status: Option<FreshnessStatus>,
        category: Option<String>,
        jan_code: Option<String>,
    ) -> Self {
        Item {
            id,
            household_id,
            product_name,
            expiry_date,
            status: status.unwrap_or(FreshnessStatus::Fresh),
            status_valid: status.is_some(),
            category,
            jan_code,
        }
    }

    pub fn status(&self) -> FreshnessStatus {
        self.status
    }

    /// Status as it was stored, `None` if the stored label was not recognised
    pub fn stored_status(&self) -> Option<FreshnessStatus> {
        self.status_valid.then_some(self.status)
    }

    /// Recompute the status at `now`. Returns true when it changed.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        let computed = classify(self.expiry_date, now);
        let changed = needs_status_update(self.stored_status(), computed);
        self.status = computed;
        self.status_valid = true;
        changed
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_jan_code(mut self, jan_code: &str) -> Self {
        self.jan_code = Some(jan_code.to_string());
        self
    }
}

/// Client-supplied item fields. Has no status: writes never set it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    pub household_id: String,
    pub product_name: String,
    pub expiry_date: DateTime<Utc>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub jan_code: Option<String>,
}

impl ItemInput {
    pub fn into_item(self, id: &str, now: DateTime<Utc>) -> Item {
        let mut item = Item::new(id, &self.household_id, &self.product_name, self.expiry_date);
        item.category = self.category;
        item.jan_code = self.jan_code;
        item.refresh_status(now);
        item
    }
}

// ============================================================================
// TESTS
// ============================================================================
