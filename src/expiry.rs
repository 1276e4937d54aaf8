// ⏳ Expiry Policy Engine - Freshness classification + notification eligibility
// Pure functions: no I/O, no clock reads except in the `*_now` helpers

use crate::models::{Household, Item};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One day in milliseconds
pub const ONE_DAY_MS: i64 = 86_400_000;

/// Lookahead window used when a household has not configured one
pub const DEFAULT_NOTIFICATION_DAYS: i64 = 3;

// ============================================================================
// FRESHNESS STATUS
// ============================================================================

/// Discrete freshness label, declared from most to least urgent so that
/// `Ord` follows urgency (`Expired < Critical < ... < Fresh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreshnessStatus {
    /// Past expiry date
    Expired,

    /// Expires today or tomorrow
    Critical,

    /// Expires within 3 days
    Warning,

    /// Expires within a week
    Caution,

    /// More than a week remaining
    Fresh,
}

impl FreshnessStatus {
    pub const ALL: [FreshnessStatus; 5] = [
        FreshnessStatus::Expired,
        FreshnessStatus::Critical,
        FreshnessStatus::Warning,
        FreshnessStatus::Caution,
        FreshnessStatus::Fresh,
    ];

    /// Storage / wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessStatus::Expired => "EXPIRED",
            FreshnessStatus::Critical => "CRITICAL",
            FreshnessStatus::Warning => "WARNING",
            FreshnessStatus::Caution => "CAUTION",
            FreshnessStatus::Fresh => "FRESH",
        }
    }

    /// Emoji the mobile client shows for this status (also the
    /// `emotionState` accepted by the character image generator)
    pub fn emoji(&self) -> &'static str {
        match self {
            FreshnessStatus::Expired => "💀",
            FreshnessStatus::Critical => "😰",
            FreshnessStatus::Warning => "😟",
            FreshnessStatus::Caution => "😐",
            FreshnessStatus::Fresh => "😊",
        }
    }

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.emoji() == emoji)
    }
}

impl fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreshnessStatus {
    type Err = String;

    /// Accepts the storage name (any case) or the status emoji
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(status) = Self::from_emoji(s) {
            return Ok(status);
        }

        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown freshness status: {}", s))
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Whole days until expiry, rounded up.
///
/// Any non-zero fraction of a day counts as a full day: 12 hours remaining
/// yields `1`, 12 hours past yields `0`, 36 hours past yields `-1`.
pub fn days_until_expiry(expiry_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let diff_ms = (expiry_date - now).num_milliseconds();
    div_ceil(diff_ms, ONE_DAY_MS)
}

// i64::div_ceil is still unstable for signed integers
fn div_ceil(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder > 0 {
        quotient + 1
    } else {
        quotient
    }
}

/// Map a day count to a status. First matching row wins.
pub fn status_for_days(days: i64) -> FreshnessStatus {
    if days < 0 {
        FreshnessStatus::Expired
    } else if days <= 1 {
        FreshnessStatus::Critical
    } else if days <= 3 {
        FreshnessStatus::Warning
    } else if days <= 7 {
        FreshnessStatus::Caution
    } else {
        FreshnessStatus::Fresh
    }
}

/// Classify an expiry date relative to `now`
pub fn classify(expiry_date: DateTime<Utc>, now: DateTime<Utc>) -> FreshnessStatus {
    status_for_days(days_until_expiry(expiry_date, now))
}

/// Classify against the current wall clock
pub fn classify_now(expiry_date: DateTime<Utc>) -> FreshnessStatus {
    classify(expiry_date, Utc::now())
}

/// Status write-back guard: only a changed status is worth persisting.
/// Keeps the item-write trigger from re-invoking itself on its own update.
pub fn needs_status_update(stored: Option<FreshnessStatus>, computed: FreshnessStatus) -> bool {
    stored != Some(computed)
}

// ============================================================================
// NOTIFICATION ELIGIBILITY
// ============================================================================

/// Push notification produced for one item. Not persisted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub household_id: String,
    pub item_id: String,
    pub product_name: String,
    pub days_until_expiry: i64,
    pub title: String,
    pub body: String,
}

impl NotificationEvent {
    pub fn new(household_id: &str, item: &Item, days_until_expiry: i64) -> Self {
        NotificationEvent {
            household_id: household_id.to_string(),
            item_id: item.id.clone(),
            product_name: item.product_name.clone(),
            days_until_expiry,
            title: notification_title(&item.product_name),
            body: notification_body(days_until_expiry),
        }
    }
}

pub fn notification_title(product_name: &str) -> String {
    format!("{}の賞味期限が近づいています", product_name)
}

pub fn notification_body(days_until_expiry: i64) -> String {
    if days_until_expiry == 0 {
        "今日が賞味期限です！".to_string()
    } else {
        format!("あと{}日で賞味期限です", days_until_expiry)
    }
}

/// Items of `household` that fall inside its notification window.
///
/// Returns nothing when notifications are disabled. Expired items are never
/// eligible. Output follows input order; repeated calls re-emit the same
/// events (deduplication belongs to the caller).
pub fn select_notifiable_items(
    household: &Household,
    items: &[Item],
    now: DateTime<Utc>,
) -> Vec<NotificationEvent> {
    let settings = &household.settings;
    if !settings.enable_notifications {
        return Vec::new();
    }

    items
        .iter()
        .filter_map(|item| {
            let days = days_until_expiry(item.expiry_date, now);
            if (0..=settings.notification_days).contains(&days) {
                Some(NotificationEvent::new(&household.id, item, days))
            } else {
                None
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HouseholdSettings;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn item_in_days(id: &str, name: &str, days: i64) -> Item {
        Item::new(id, "house-1", name, fixed_now() + Duration::days(days))
    }

    fn household(enabled: bool, days: Option<i64>) -> Household {
        Household {
            id: "house-1".to_string(),
            name: "Test House".to_string(),
            settings: HouseholdSettings::with_defaults(Some(enabled), days),
        }
    }

    #[test]
    fn test_days_until_expiry_rounds_up() {
        let now = fixed_now();

        assert_eq!(days_until_expiry(now, now), 0);
        assert_eq!(days_until_expiry(now + Duration::hours(12), now), 1);
        assert_eq!(days_until_expiry(now + Duration::hours(24), now), 1);
        assert_eq!(days_until_expiry(now + Duration::hours(25), now), 2);
        assert_eq!(days_until_expiry(now - Duration::hours(12), now), 0);
        assert_eq!(days_until_expiry(now - Duration::hours(24), now), -1);
        assert_eq!(days_until_expiry(now - Duration::hours(36), now), -1);
        assert_eq!(days_until_expiry(now + Duration::milliseconds(1), now), 1);
    }

    #[test]
    fn test_classification_boundaries() {
        let now = fixed_now();
        let cases = [
            (-1, FreshnessStatus::Expired),
            (0, FreshnessStatus::Critical),
            (1, FreshnessStatus::Critical),
            (2, FreshnessStatus::Warning),
            (3, FreshnessStatus::Warning),
            (4, FreshnessStatus::Caution),
            (7, FreshnessStatus::Caution),
            (8, FreshnessStatus::Fresh),
        ];

        for (days, expected) in cases {
            let expiry = now + Duration::days(days);
            assert_eq!(classify(expiry, now), expected, "days = {}", days);
        }
    }

    #[test]
    fn test_classify_is_idempotent_and_monotonic() {
        let now = fixed_now();
        let mut previous = FreshnessStatus::Expired;

        for hours in (-72..=240).step_by(5) {
            let expiry = now + Duration::hours(hours);
            let first = classify(expiry, now);
            let second = classify(expiry, now);

            assert_eq!(first, second);
            assert!(first >= previous, "status went backwards at {}h", hours);
            previous = first;
        }
    }

    #[test]
    fn test_needs_status_update() {
        assert!(needs_status_update(None, FreshnessStatus::Fresh));
        assert!(needs_status_update(Some(FreshnessStatus::Fresh), FreshnessStatus::Expired));
        assert!(!needs_status_update(Some(FreshnessStatus::Warning), FreshnessStatus::Warning));
    }

    #[test]
    fn test_stale_fresh_item_becomes_expired() {
        let now = fixed_now();
        let expiry = now - Duration::days(10);

        let computed = classify(expiry, now);

        assert_eq!(computed, FreshnessStatus::Expired);
        assert!(needs_status_update(Some(FreshnessStatus::Fresh), computed));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("EXPIRED".parse::<FreshnessStatus>().unwrap(), FreshnessStatus::Expired);
        assert_eq!("caution".parse::<FreshnessStatus>().unwrap(), FreshnessStatus::Caution);
        assert_eq!("😰".parse::<FreshnessStatus>().unwrap(), FreshnessStatus::Critical);
        assert!("ROTTEN".parse::<FreshnessStatus>().is_err());

        for status in FreshnessStatus::ALL {
            assert_eq!(FreshnessStatus::from_emoji(status.emoji()), Some(status));
        }
    }

    #[test]
    fn test_disabled_household_gets_nothing() {
        let items = vec![
            item_in_days("a", "Milk", 0),
            item_in_days("b", "Eggs", 1),
        ];

        let events = select_notifiable_items(&household(false, Some(3)), &items, fixed_now());

        assert!(events.is_empty());
    }

    #[test]
    fn test_window_excludes_expired_and_far_items() {
        let items = vec![
            item_in_days("expired", "Old Bread", -1),
            item_in_days("today", "Milk", 0),
            item_in_days("edge", "Yogurt", 3),
            item_in_days("later", "Cheese", 4),
        ];

        let events = select_notifiable_items(&household(true, Some(3)), &items, fixed_now());

        let ids: Vec<&str> = events.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["today", "edge"]);
        assert_eq!(events[1].days_until_expiry, 3);
    }

    #[test]
    fn test_expires_today_message() {
        let items = vec![item_in_days("milk", "Milk", 0)];

        let events = select_notifiable_items(&household(true, Some(3)), &items, fixed_now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body, "今日が賞味期限です！");
        assert!(events[0].title.contains("Milk"));
        assert_eq!(events[0].household_id, "house-1");
    }

    #[test]
    fn test_days_remaining_message() {
        assert_eq!(notification_body(2), "あと2日で賞味期限です");
        assert_eq!(
            notification_title("豆腐"),
            "豆腐の賞味期限が近づいています"
        );
    }

    #[test]
    fn test_default_window_is_three_days() {
        let items = vec![
            item_in_days("three", "Tofu", 3),
            item_in_days("four", "Natto", 4),
        ];

        let events = select_notifiable_items(&household(true, None), &items, fixed_now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id, "three");
    }

    #[test]
    fn test_repeated_selection_reemits_events() {
        let items = vec![item_in_days("milk", "Milk", 1)];
        let house = household(true, Some(3));

        let first = select_notifiable_items(&house, &items, fixed_now());
        let second = select_notifiable_items(&house, &items, fixed_now());

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }
}
