//! Environment-driven configuration.
//!
//! Every key uses the `FRIDGE_` prefix. Values are read after an optional
//! `.env` file; anything absent falls back to a default. Precedence is
//! defaults < .env < process environment.

use crate::jobs::ScanOptions;
use crate::scheduler::{offset_from_hours, DailySchedule, DEFAULT_UTC_OFFSET_HOURS};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for any single outbound HTTP request
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse {key}: {message}")]
    Parse { key: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub log_level: String,
    pub log_json: bool,

    pub schedule_hour: u32,
    pub schedule_minute: u32,
    pub utc_offset_hours: i32,
    pub dedup_notifications: bool,

    /// Per-request timeout for push, product and model clients
    pub http_timeout_secs: u64,

    /// Bearer tokens accepted by authenticated callables
    pub api_tokens: Vec<String>,

    pub product_api_base: String,

    /// Push gateway; when unset notifications are only logged
    pub push_endpoint: Option<String>,
    pub push_token: Option<String>,

    pub gcp_project: Option<String>,
    pub gcp_location: String,
    pub gcp_access_token: Option<String>,
    pub imagen_model: String,

    /// When unset recipes come from the built-in fallback
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    pub image_dir: PathBuf,
    pub public_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("fridge.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            schedule_hour: 9,
            schedule_minute: 0,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            dedup_notifications: true,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            api_tokens: Vec::new(),
            product_api_base: "https://world.openfoodfacts.org".to_string(),
            push_endpoint: None,
            push_token: None,
            gcp_project: None,
            gcp_location: "asia-northeast1".to_string(),
            gcp_access_token: None,
            imagen_model: "imagen-3.0-generate-001".to_string(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-pro".to_string(),
            image_dir: PathBuf::from("character_images"),
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

fn parse_var<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::Parse {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Non-empty string value, `None` otherwise
fn optional(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = AppConfig::default();
        let get = |key: &str| optional(lookup(key));

        let config = AppConfig {
            database_path: get("FRIDGE_DATABASE_PATH").map(PathBuf::from).unwrap_or(d.database_path),
            bind_addr: get("FRIDGE_BIND_ADDR").unwrap_or(d.bind_addr),
            log_level: get("FRIDGE_LOG_LEVEL").unwrap_or(d.log_level),
            log_json: parse_var("FRIDGE_LOG_JSON", get("FRIDGE_LOG_JSON"), d.log_json)?,
            schedule_hour: parse_var("FRIDGE_SCHEDULE_HOUR", get("FRIDGE_SCHEDULE_HOUR"), d.schedule_hour)?,
            schedule_minute: parse_var("FRIDGE_SCHEDULE_MINUTE", get("FRIDGE_SCHEDULE_MINUTE"), d.schedule_minute)?,
            utc_offset_hours: parse_var("FRIDGE_UTC_OFFSET_HOURS", get("FRIDGE_UTC_OFFSET_HOURS"), d.utc_offset_hours)?,
            dedup_notifications: parse_var(
                "FRIDGE_DEDUP_NOTIFICATIONS",
                get("FRIDGE_DEDUP_NOTIFICATIONS"),
                d.dedup_notifications,
            )?,
            http_timeout_secs: parse_var(
                "FRIDGE_HTTP_TIMEOUT_SECS",
                get("FRIDGE_HTTP_TIMEOUT_SECS"),
                d.http_timeout_secs,
            )?,
            api_tokens: get("FRIDGE_API_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or(d.api_tokens),
            product_api_base: get("FRIDGE_PRODUCT_API_BASE").unwrap_or(d.product_api_base),
            push_endpoint: get("FRIDGE_PUSH_ENDPOINT"),
            push_token: get("FRIDGE_PUSH_TOKEN"),
            gcp_project: get("FRIDGE_GCP_PROJECT"),
            gcp_location: get("FRIDGE_GCP_LOCATION").unwrap_or(d.gcp_location),
            gcp_access_token: get("FRIDGE_GCP_ACCESS_TOKEN"),
            imagen_model: get("FRIDGE_IMAGEN_MODEL").unwrap_or(d.imagen_model),
            gemini_api_key: get("FRIDGE_GEMINI_API_KEY"),
            gemini_model: get("FRIDGE_GEMINI_MODEL").unwrap_or(d.gemini_model),
            image_dir: get("FRIDGE_IMAGE_DIR").map(PathBuf::from).unwrap_or(d.image_dir),
            public_base_url: get("FRIDGE_PUBLIC_BASE_URL").unwrap_or(d.public_base_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule_hour > 23 {
            return Err(ConfigError::Invalid {
                key: "FRIDGE_SCHEDULE_HOUR".to_string(),
                message: format!("{} is not an hour of the day", self.schedule_hour),
            });
        }
        if self.schedule_minute > 59 {
            return Err(ConfigError::Invalid {
                key: "FRIDGE_SCHEDULE_MINUTE".to_string(),
                message: format!("{} is not a minute", self.schedule_minute),
            });
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ConfigError::Invalid {
                key: "FRIDGE_UTC_OFFSET_HOURS".to_string(),
                message: format!("{} is outside -12..=14", self.utc_offset_hours),
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "FRIDGE_HTTP_TIMEOUT_SECS".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if !self.product_api_base.starts_with("http://") && !self.product_api_base.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "FRIDGE_PRODUCT_API_BASE".to_string(),
                message: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    pub fn schedule(&self) -> DailySchedule {
        DailySchedule {
            hour: self.schedule_hour,
            minute: self.schedule_minute,
            utc_offset: offset_from_hours(self.utc_offset_hours),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            utc_offset: offset_from_hours(self.utc_offset_hours),
            dedup: self.dedup_notifications,
        }
    }
}

/// HTTP client shared by the outbound collaborators. A stalled peer fails the
/// request after `timeout` instead of blocking the caller.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

/// Load .env file if present. A missing file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.schedule_hour, 9);
        assert_eq!(config.utc_offset_hours, 9);
        assert!(config.push_endpoint.is_none());
        assert!(config.gemini_api_key.is_none());
        assert!(config.dedup_notifications);
        assert!(config.api_tokens.is_empty());
        assert_eq!(config.http_timeout(), Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FRIDGE_SCHEDULE_HOUR", "7"),
            ("FRIDGE_API_TOKENS", "abc, def,,"),
            ("FRIDGE_PUSH_ENDPOINT", "https://push.example/send"),
            ("FRIDGE_GEMINI_API_KEY", "   "),
            ("FRIDGE_LOG_JSON", "true"),
        ])
        .unwrap();

        assert_eq!(config.schedule_hour, 7);
        assert_eq!(config.api_tokens, vec!["abc", "def"]);
        assert_eq!(config.push_endpoint.as_deref(), Some("https://push.example/send"));
        assert!(config.gemini_api_key.is_none());
        assert!(config.log_json);
        assert_eq!(config.schedule().hour, 7);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("FRIDGE_SCHEDULE_HOUR", "nine")]),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            load(&[("FRIDGE_SCHEDULE_MINUTE", "75")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            load(&[("FRIDGE_PRODUCT_API_BASE", "ftp://x")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            load(&[("FRIDGE_HTTP_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_http_timeout_override() {
        let config = load(&[("FRIDGE_HTTP_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(config.http_timeout(), Duration::from_secs(3));
        assert!(http_client(config.http_timeout()).is_ok());
    }
}
