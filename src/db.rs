use crate::expiry::FreshnessStatus;
use crate::models::{Household, HouseholdSettings, Item};
use crate::product::ProductInfo;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Households (settings stored as a JSON document)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS households (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            settings TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Items (status is a cached projection of expiry_date)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            expiry_date TEXT NOT NULL,
            status TEXT NOT NULL,
            category TEXT,
            jan_code TEXT,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Product cache (keyed by barcode)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS products (
            jan_code TEXT PRIMARY KEY,
            product_name TEXT NOT NULL,
            manufacturer TEXT NOT NULL,
            category TEXT NOT NULL,
            image_url TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Notification sent-log (dedup across scheduler runs)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_log (
            dedup_key TEXT PRIMARY KEY,
            household_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            sent_on TEXT NOT NULL,
            sent_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_household ON items(household_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_expiry ON items(expiry_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// HOUSEHOLDS
// ============================================================================

pub fn insert_household(conn: &Connection, household: &Household) -> Result<()> {
    let settings_json = serde_json::to_string(&household.settings)?;

    conn.execute(
        "INSERT INTO households (id, name, settings) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, settings = excluded.settings",
        params![household.id, household.name, settings_json],
    )?;

    Ok(())
}

fn household_from_row(row: &rusqlite::Row) -> rusqlite::Result<Household> {
    let settings_json: Option<String> = row.get(2)?;
    // Unparseable settings fall back to defaults rather than failing the read
    let settings = settings_json
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .map(HouseholdSettings::from)
        .unwrap_or_default();

    Ok(Household {
        id: row.get(0)?,
        name: row.get(1)?,
        settings,
    })
}

pub fn get_household(conn: &Connection, id: &str) -> Result<Option<Household>> {
    let household = conn
        .query_row(
            "SELECT id, name, settings FROM households WHERE id = ?1",
            params![id],
            household_from_row,
        )
        .optional()?;

    Ok(household)
}

pub fn get_all_households(conn: &Connection) -> Result<Vec<Household>> {
    let mut stmt = conn.prepare("SELECT id, name, settings FROM households ORDER BY id")?;

    let households = stmt
        .query_map([], household_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(households)
}

// ============================================================================
// ITEMS
// ============================================================================

fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn item_from_row(row: &rusqlite::Row) -> rusqlite::Result<Item> {
    let expiry_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;

    // An unknown stored label stays unknown so the next trigger run rewrites it
    let status = status_str.parse::<FreshnessStatus>().ok();

    Ok(Item::from_stored(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        parse_timestamp(&expiry_str)?,
        status,
        row.get(5)?,
        row.get(6)?,
    ))
}

const ITEM_COLUMNS: &str =
    "id, household_id, product_name, expiry_date, status, category, jan_code";

/// Create or replace an item. The stored status is whatever the item carries.
pub fn upsert_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT INTO items (id, household_id, product_name, expiry_date, status, category, jan_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            household_id = excluded.household_id,
            product_name = excluded.product_name,
            expiry_date = excluded.expiry_date,
            status = excluded.status,
            category = excluded.category,
            jan_code = excluded.jan_code,
            updated_at = CURRENT_TIMESTAMP",
        params![
            item.id,
            item.household_id,
            item.product_name,
            item.expiry_date.to_rfc3339(),
            item.status().as_str(),
            item.category,
            item.jan_code,
        ],
    )?;

    Ok(())
}

pub fn get_item(conn: &Connection, id: &str) -> Result<Option<Item>> {
    let sql = format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS);
    let item = conn.query_row(&sql, params![id], item_from_row).optional()?;

    Ok(item)
}

pub fn get_items_for_household(conn: &Connection, household_id: &str) -> Result<Vec<Item>> {
    let sql = format!(
        "SELECT {} FROM items WHERE household_id = ?1 ORDER BY expiry_date, id",
        ITEM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let items = stmt
        .query_map(params![household_id], item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Single-field status write. Returns the number of rows touched.
pub fn update_item_status(conn: &Connection, id: &str, status: FreshnessStatus) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE items SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![status.as_str(), id],
    )?;

    Ok(updated)
}

pub fn delete_item(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM items WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn count_items(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One row of a bulk item import file
#[derive(Debug, Deserialize)]
struct ItemCsvRecord {
    #[serde(default)]
    id: Option<String>,
    household_id: String,
    product_name: String,
    /// RFC 3339 instant or plain `YYYY-MM-DD` (midnight UTC)
    expiry_date: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    jan_code: Option<String>,
}

pub fn parse_expiry_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid expiry date: {}", value))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Invalid expiry date: {}", value))?;

    Ok(midnight.and_utc())
}

/// Load fridge items from a CSV file. Statuses are computed at `now`.
pub fn load_items_csv(csv_path: &Path, now: DateTime<Utc>) -> Result<Vec<Item>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut items = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let record: ItemCsvRecord = result.context("Failed to deserialize item")?;
        let expiry = parse_expiry_date(&record.expiry_date)
            .with_context(|| format!("Row {}", line + 1))?;

        let id = record
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut item = Item::new(&id, &record.household_id, &record.product_name, expiry);
        item.category = record.category.filter(|c| !c.is_empty());
        item.jan_code = record.jan_code.filter(|c| !c.is_empty());
        item.refresh_status(now);

        items.push(item);
    }

    Ok(items)
}

pub fn insert_items(conn: &Connection, items: &[Item]) -> Result<usize> {
    let mut inserted = 0;

    for item in items {
        upsert_item(conn, item)?;
        inserted += 1;

        let event = Event::new(
            "item_imported",
            "item",
            &item.id,
            serde_json::json!({
                "household_id": item.household_id,
                "product_name": item.product_name,
                "status": item.status(),
            }),
            "csv_importer",
        );
        if let Err(e) = insert_event(conn, &event) {
            warn!(item_id = %item.id, error = %e, "failed to record import event");
        }
    }

    info!(inserted, "items imported");

    Ok(inserted)
}

// ============================================================================
// PRODUCT CACHE
// ============================================================================

pub fn get_cached_product(conn: &Connection, jan_code: &str) -> Result<Option<ProductInfo>> {
    let product = conn
        .query_row(
            "SELECT jan_code, product_name, manufacturer, category, image_url, updated_at
             FROM products WHERE jan_code = ?1",
            params![jan_code],
            |row| {
                let updated_str: String = row.get(5)?;
                Ok(ProductInfo {
                    jan_code: row.get(0)?,
                    product_name: row.get(1)?,
                    manufacturer: row.get(2)?,
                    category: row.get(3)?,
                    image_url: row.get(4)?,
                    updated_at: parse_timestamp(&updated_str)?,
                })
            },
        )
        .optional()?;

    Ok(product)
}

pub fn cache_product(conn: &Connection, product: &ProductInfo) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO products (jan_code, product_name, manufacturer, category, image_url, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            product.jan_code,
            product.product_name,
            product.manufacturer,
            product.category,
            product.image_url,
            product.updated_at.to_rfc3339(),
        ],
    )?;

    debug!(barcode = %product.jan_code, "product cached");

    Ok(())
}

// ============================================================================
// NOTIFICATION SENT-LOG
// ============================================================================

/// Dedup key for "this item was notified on this local date"
pub fn notification_dedup_key(item_id: &str, local_date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}", item_id, local_date.format("%Y-%m-%d")));
    format!("{:x}", hasher.finalize())
}

pub fn was_notification_sent(conn: &Connection, item_id: &str, local_date: NaiveDate) -> Result<bool> {
    let key = notification_dedup_key(item_id, local_date);
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM notification_log WHERE dedup_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(found.is_some())
}

/// Claim the sent-log slot for an item on a local date. Returns false if the
/// slot was already taken, so at most one caller sends.
pub fn record_notification(
    conn: &Connection,
    household_id: &str,
    item_id: &str,
    local_date: NaiveDate,
) -> Result<bool> {
    let key = notification_dedup_key(item_id, local_date);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO notification_log (dedup_key, household_id, item_id, sent_on, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            key,
            household_id,
            item_id,
            local_date.format("%Y-%m-%d").to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(inserted > 0)
}

/// Give a claimed slot back after a failed send
pub fn release_notification(conn: &Connection, item_id: &str, local_date: NaiveDate) -> Result<bool> {
    let key = notification_dedup_key(item_id, local_date);
    let deleted = conn.execute("DELETE FROM notification_log WHERE dedup_key = ?1", params![key])?;

    Ok(deleted > 0)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(&timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
