// ⚙️ Jobs - Status trigger + daily expiry scan
// Glue between storage, the expiry engine and the push dispatcher.
// Per-entity failures are logged and isolated; a run never aborts halfway.

use crate::db::{self, Event};
use crate::expiry::{classify, needs_status_update, select_notifiable_items, FreshnessStatus};
use crate::models::{Household, Item};
use crate::notifier::{NotificationDispatcher, PushMessage};
use crate::scheduler::{offset_from_hours, DEFAULT_UTC_OFFSET_HOURS};
use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

// ============================================================================
// STATUS TRIGGER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Item no longer exists (delete event)
    Deleted,

    /// Stored status already matches; nothing written
    Unchanged { status: FreshnessStatus },

    /// Exactly one status write was issued. `from` is `None` when the stored
    /// label was unreadable.
    Updated {
        from: Option<FreshnessStatus>,
        to: FreshnessStatus,
    },
}

/// Runs after an item is created or updated.
///
/// Writes only when the recomputed status differs from the stored one, so the
/// trigger's own write never leads to another write.
pub fn update_product_status(conn: &Connection, item_id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
    let item = match db::get_item(conn, item_id)? {
        Some(item) => item,
        None => return Ok(TriggerOutcome::Deleted),
    };

    let stored = item.stored_status();
    let computed = classify(item.expiry_date, now);

    if !needs_status_update(stored, computed) {
        debug!(item_id, status = %computed, "status unchanged");
        return Ok(TriggerOutcome::Unchanged { status: computed });
    }

    db::update_item_status(conn, item_id, computed)?;

    let event = Event::new(
        "item_status_changed",
        "item",
        item_id,
        serde_json::json!({ "from": stored, "to": computed }),
        "status_trigger",
    );
    if let Err(e) = db::insert_event(conn, &event) {
        warn!(item_id, error = %e, "failed to record status change event");
    }

    info!(item_id, from = ?stored, to = %computed, "item status updated");

    Ok(TriggerOutcome::Updated {
        from: stored,
        to: computed,
    })
}

/// Write an item and run the status trigger on it, as a store-side
/// trigger would
pub fn write_item(conn: &Connection, item: &Item, now: DateTime<Utc>) -> Result<TriggerOutcome> {
    db::upsert_item(conn, item)?;
    update_product_status(conn, &item.id, now)
}

// ============================================================================
// EXPIRY SCAN
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Zone used to decide what "today" is for the sent-log
    pub utc_offset: FixedOffset,

    /// Skip items already notified today
    pub dedup: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            utc_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS),
            dedup: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub households_scanned: usize,
    pub households_failed: usize,
    pub events: usize,
    pub sent: usize,
    pub skipped_duplicates: usize,
    pub send_failures: usize,
}

fn lock(db: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow!("database lock poisoned"))
}

fn load_households(db: &Arc<Mutex<Connection>>) -> Result<Vec<Household>> {
    let conn = lock(db)?;
    db::get_all_households(&conn)
}

fn load_items(db: &Arc<Mutex<Connection>>, household_id: &str) -> Result<Vec<Item>> {
    let conn = lock(db)?;
    db::get_items_for_household(&conn, household_id)
}

/// Scan every household and push a notification for each item inside its
/// notification window.
///
/// Only the household list failing to load is an error. Failures for a single
/// household or a single send are logged and counted.
pub async fn check_expiring_products(
    db: &Arc<Mutex<Connection>>,
    dispatcher: &dyn NotificationDispatcher,
    now: DateTime<Utc>,
    options: ScanOptions,
) -> Result<ScanReport> {
    let households = load_households(db)?;
    let local_date = now.with_timezone(&options.utc_offset).date_naive();
    let mut report = ScanReport::default();

    for household in &households {
        if !household.settings.enable_notifications {
            continue;
        }

        let items = match load_items(db, &household.id) {
            Ok(items) => items,
            Err(e) => {
                error!(household_id = %household.id, error = %e, "failed to load items");
                report.households_failed += 1;
                continue;
            }
        };
        report.households_scanned += 1;

        for event in select_notifiable_items(household, &items, now) {
            report.events += 1;

            // Claim the slot before sending so overlapping runs cannot both send
            let mut claimed = false;
            if options.dedup {
                let claim = lock(db).and_then(|conn| {
                    db::record_notification(&conn, &event.household_id, &event.item_id, local_date)
                });
                match claim {
                    Ok(true) => claimed = true,
                    Ok(false) => {
                        report.skipped_duplicates += 1;
                        continue;
                    }
                    // Prefer a possible duplicate over a missed warning
                    Err(e) => warn!(item_id = %event.item_id, error = %e, "sent-log claim failed"),
                }
            }

            let message = PushMessage::from(&event);
            match dispatcher.send(&message).await {
                Ok(()) => {
                    report.sent += 1;
                    info!(
                        household_id = %event.household_id,
                        item_id = %event.item_id,
                        product_name = %event.product_name,
                        days = event.days_until_expiry,
                        "expiry notification sent"
                    );
                }
                Err(e) => {
                    report.send_failures += 1;
                    error!(
                        household_id = %event.household_id,
                        item_id = %event.item_id,
                        error = %e,
                        "error sending notification"
                    );

                    if claimed {
                        let released = lock(db)
                            .and_then(|conn| db::release_notification(&conn, &event.item_id, local_date));
                        if let Err(e) = released {
                            warn!(item_id = %event.item_id, error = %e, "failed to release sent-log slot");
                        }
                    }
                }
            }
        }
    }

    info!(
        households = report.households_scanned,
        events = report.events,
        sent = report.sent,
        skipped = report.skipped_duplicates,
        failures = report.send_failures,
        "expiry scan finished"
    );

    Ok(report)
}
