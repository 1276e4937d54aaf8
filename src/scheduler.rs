// ⏰ Scheduler - Fire the expiry scan once a day at a fixed local time

use crate::jobs::{check_expiring_products, ScanOptions};
use crate::notifier::NotificationDispatcher;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Asia/Tokyo (no DST, so a fixed offset is exact)
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 9;

/// Fixed offset for whole hours; out-of-range values fall back to UTC
pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub hour: u32,
    pub minute: u32,
    pub utc_offset: FixedOffset,
}

impl Default for DailySchedule {
    /// Every day 09:00 Tokyo time
    fn default() -> Self {
        DailySchedule {
            hour: 9,
            minute: 0,
            utc_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS),
        }
    }
}

impl DailySchedule {
    /// First firing instant strictly after `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let local_today = now.with_timezone(&self.utc_offset).date_naive();
        let fire_time = local_today
            .and_hms_opt(self.hour, self.minute, 0)
            .ok_or_else(|| anyhow!("Invalid schedule time {:02}:{:02}", self.hour, self.minute))?;

        let today_run = self
            .utc_offset
            .from_local_datetime(&fire_time)
            .single()
            .ok_or_else(|| anyhow!("Ambiguous local time {}", fire_time))?
            .with_timezone(&Utc);

        if today_run > now {
            Ok(today_run)
        } else {
            Ok(today_run + Duration::days(1))
        }
    }
}

/// Run the expiry scan forever on `schedule`. A failed run is logged and the
/// loop waits for the next slot.
pub async fn run_daily(
    db: Arc<Mutex<Connection>>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    schedule: DailySchedule,
    options: ScanOptions,
) -> Result<()> {
    loop {
        let now = Utc::now();
        let next = schedule.next_run_after(now)?;
        let wait = (next - now).to_std().unwrap_or_default();

        info!(next_run = %next, "expiry scan scheduled");
        tokio::time::sleep(wait).await;

        match check_expiring_products(&db, dispatcher.as_ref(), Utc::now(), options).await {
            Ok(report) => info!(sent = report.sent, events = report.events, "scheduled scan complete"),
            Err(e) => error!(error = %e, "error checking expiring products"),
        }
    }
}
