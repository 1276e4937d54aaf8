use anyhow::{Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use fridge_manager::config::load_dotenv;
use fridge_manager::logging::init_logging;
use fridge_manager::{
    check_expiring_products, classify, days_until_expiry, db, insert_items, load_items_csv, open_database,
    AppConfig, HttpPushDispatcher, LogDispatcher, NotificationDispatcher,
};

fn usage() -> &'static str {
    "Usage:\n  \
     fridge-manager import <items.csv>   bulk import fridge items\n  \
     fridge-manager scan                 run the expiry notification scan once\n  \
     fridge-manager classify <date>      print the freshness status for a date"
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let config = AppConfig::from_env()?;
    if let Err(e) = init_logging(&config.log_level, config.log_json) {
        eprintln!("Warning: {}", e);
    }

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let path = args.get(2).context(usage())?;
            run_import(&config, Path::new(path))
        }
        Some("scan") => run_scan(&config).await,
        Some("classify") => {
            let date = args.get(2).context(usage())?;
            run_classify(date)
        }
        _ => {
            println!("{}", usage());
            Ok(())
        }
    }
}

fn run_import(config: &AppConfig, csv_path: &Path) -> Result<()> {
    println!("📂 Loading items from {:?}...", csv_path);
    let items = load_items_csv(csv_path, Utc::now())?;
    println!("✓ Loaded {} items", items.len());

    let conn = open_database(&config.database_path)?;
    let inserted = insert_items(&conn, &items)?;
    let total = db::count_items(&conn)?;

    println!("✓ Imported {} items ({} in database)", inserted, total);
    Ok(())
}

async fn run_scan(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let db = Arc::new(Mutex::new(conn));

    let dispatcher: Box<dyn NotificationDispatcher> = match &config.push_endpoint {
        Some(endpoint) => Box::new(HttpPushDispatcher::new(
            endpoint.clone(),
            config.push_token.clone(),
            config.http_timeout(),
        )?),
        None => Box::new(LogDispatcher),
    };

    let report = check_expiring_products(&db, dispatcher.as_ref(), Utc::now(), config.scan_options()).await?;
    info!(?report, "manual scan");

    println!("✓ Households scanned: {}", report.households_scanned);
    println!("✓ Notifications sent: {}", report.sent);
    if report.skipped_duplicates > 0 {
        println!("✓ Already sent today: {}", report.skipped_duplicates);
    }
    if report.send_failures > 0 {
        println!("⚠ Failed sends: {}", report.send_failures);
    }
    Ok(())
}

fn run_classify(date: &str) -> Result<()> {
    let expiry = db::parse_expiry_date(date)?;
    let now = Utc::now();
    let days = days_until_expiry(expiry, now);
    let status = classify(expiry, now);
    println!("{} {} ({} days)", status.emoji(), status, days);
    Ok(())
}
