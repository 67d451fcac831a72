// ============================
// peerlink-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "peerlink.toml";

/// Prefix of the environment variables overriding the configuration
pub const ENV_PREFIX: &str = "PEERLINK_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Rooms whose occupancy is pushed to clients that are not in a room
    pub tracked_rooms: Vec<String>,
    /// Period of the liveness probe in seconds
    pub heartbeat_interval_secs: u64,
    /// Frames queued per connection before further frames are dropped
    pub outbound_buffer: usize,
    /// When set, clients must present this code to open a connection
    pub access_code: Option<String>,
    /// Directory of static assets served for non-API paths
    pub static_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tracked_rooms: ["lounge", "counter-strike", "league-of-legends", "empire-earth"]
                .into_iter()
                .map(String::from)
                .collect(),
            heartbeat_interval_secs: 30,
            outbound_buffer: 256,
            access_code: None,
            static_dir: None,
        }
    }
}

impl Settings {
    /// Layered sources: built-in defaults, then `path`, then `PEERLINK_*`.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load settings from `peerlink.toml` and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load settings from an explicit file and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for values the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "invalid log level '{}'",
                self.log_level
            )));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(AppError::Config(
                "heartbeat_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(AppError::Config(
                "outbound_buffer must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for room in &self.tracked_rooms {
            crate::validation::validate_room_id(room)
                .map_err(|e| AppError::Config(format!("tracked_rooms: {e}")))?;
            if !seen.insert(room.as_str()) {
                return Err(AppError::Config(format!(
                    "tracked_rooms: duplicate room '{room}'"
                )));
            }
        }

        Ok(())
    }

    /// Period of the liveness monitor
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Whether connections must present an access code
    pub fn access_gated(&self) -> bool {
        self.access_code.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(settings.tracked_rooms.len(), 4);
        assert!(!settings.access_gated());
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings::default();

        let mut invalid = settings.clone();
        invalid.log_level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.heartbeat_interval_secs = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.outbound_buffer = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.tracked_rooms.push("lounge".to_string());
        assert!(invalid.validate().is_err());

        let mut invalid = settings;
        invalid.tracked_rooms.push(String::new());
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    heartbeat_interval_secs = 10
                    tracked_rooms = ["lobby", "studio"]
                    log_level = "debug"
                "#,
            )?;
            jail.set_env("PEERLINK_ACCESS_CODE", "sesame");
            jail.set_env("PEERLINK_LOG_LEVEL", "warn");

            let settings = Settings::load().map_err(|e| e.to_string())?;
            assert_eq!(settings.heartbeat_interval_secs, 10);
            assert_eq!(settings.tracked_rooms, vec!["lobby", "studio"]);
            assert_eq!(settings.access_code.as_deref(), Some("sesame"));
            assert_eq!(settings.log_level, "warn");
            assert_eq!(settings.outbound_buffer, 256);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "heartbeat_interval_secs = 0")?;
            assert!(matches!(
                Settings::load_from("custom.toml"),
                Err(AppError::Config(_))
            ));
            Ok(())
        });
    }
}
