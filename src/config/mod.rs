//! Configuration module for the OBC backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key granting admin and courier routes
    pub admin_psk: Option<String>,
    /// Pre-shared key granting courier routes only
    pub courier_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Overpass interpreter endpoint; lookup is disabled when unset
    pub geocoder_url: Option<String>,
    pub geocoder_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let admin_psk = non_empty_var("OBC_ADMIN_PSK");
        let courier_psk = non_empty_var("OBC_COURIER_PSK");

        let db_path = env::var("OBC_DB_PATH")
            .unwrap_or_else(|_| "./data/obc.sqlite".to_string())
            .into();

        let bind_addr = env::var("OBC_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid OBC_BIND_ADDR format: {}", e)))?;

        let log_level = env::var("OBC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let geocoder_url = non_empty_var("OBC_GEOCODER_URL");

        let geocoder_timeout_secs = match env::var("OBC_GEOCODER_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::Internal(format!("Invalid OBC_GEOCODER_TIMEOUT_SECS: {}", e))
            })?,
            Err(_) => 10,
        };

        Ok(Self {
            admin_psk,
            courier_psk,
            db_path,
            bind_addr,
            log_level,
            geocoder_url,
            geocoder_timeout_secs,
        })
    }

    /// True when neither key is set and every request is let through.
    pub fn auth_disabled(&self) -> bool {
        self.admin_psk.is_none() && self.courier_psk.is_none()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share one test so they never race on the process environment.
    #[test]
    fn test_config_from_env() {
        for key in [
            "OBC_ADMIN_PSK",
            "OBC_COURIER_PSK",
            "OBC_DB_PATH",
            "OBC_BIND_ADDR",
            "OBC_LOG_LEVEL",
            "OBC_GEOCODER_URL",
            "OBC_GEOCODER_TIMEOUT_SECS",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env().unwrap();

        assert!(config.admin_psk.is_none());
        assert!(config.courier_psk.is_none());
        assert!(config.auth_disabled());
        assert_eq!(config.db_path, PathBuf::from("./data/obc.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert!(config.geocoder_url.is_none());
        assert_eq!(config.geocoder_timeout_secs, 10);

        env::set_var("OBC_BIND_ADDR", "not-an-address");
        assert!(Config::from_env().is_err());
        env::remove_var("OBC_BIND_ADDR");
    }
}
