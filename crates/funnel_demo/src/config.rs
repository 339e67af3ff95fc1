//! Configuration management for the funnel demo.
//!
//! Loaded from a TOML file; a default file is written when none exists.

use crate::cli::CliArgs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Per-client message rate limit
    #[serde(default)]
    pub throttle: ThrottleSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Accounts known to the authentication protocol
    #[serde(default)]
    pub users: Vec<UserSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Label used in logs
    pub name: String,
    /// Address reported to protocols when the server starts
    pub bind_address: String,
}

/// A client may send at most `max_messages` within `window_ms`; further
/// messages are throttled instead of dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    pub max_messages: u32,
    pub window_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_messages: 20,
            window_ms: 1000,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub nick: String,
    pub role: String,
    pub password: String,
}

impl UserSettings {
    fn new(nick: &str, role: &str, password: &str) -> Self {
        Self {
            nick: nick.to_string(),
            role: role.to_string(),
            password: password.to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                name: "funnel-chat".to_string(),
                bind_address: "0.0.0.0:3000".to_string(),
            },
            throttle: ThrottleSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            users: vec![
                UserSettings::new("pepe", "user", "pepe$123"),
                UserSettings::new("toto", "user", "toto$123"),
                UserSettings::new("carlos", "admin", "carlos$123"),
            ],
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                tokio::fs::write(path, toml::to_string_pretty(&config)?).await?;
                info!("Created default configuration file: {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    pub fn bind_address(&self) -> Result<SocketAddr, String> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| format!("Invalid bind address: {}", self.server.bind_address))
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.bind_address()?;

        if self.throttle.max_messages == 0 {
            return Err("Throttle max_messages must be greater than zero".to_string());
        }
        if self.throttle.window_ms == 0 {
            return Err("Throttle window_ms must be greater than zero".to_string());
        }

        let mut nicks = HashSet::new();
        for user in &self.users {
            if user.nick.is_empty() {
                return Err("User nick cannot be empty".to_string());
            }
            if !nicks.insert(user.nick.as_str()) {
                return Err(format!("Duplicate user nick: {}", user.nick));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.users.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funnel_demo.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.name, "funnel-chat");
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.users, config.users);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
name = "lobby"
bind_address = "127.0.0.1:4000"

[logging]
level = "debug"
json_format = true

[[users]]
nick = "ana"
role = "admin"
password = "secret"
"#;
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&PathBuf::from(file.path()))
            .await
            .unwrap();
        assert_eq!(config.server.name, "lobby");
        assert_eq!(config.throttle.max_messages, 20);
        assert!(config.logging.json_format);
        assert_eq!(config.users, vec![UserSettings::new("ana", "admin", "secret")]);
    }

    #[tokio::test]
    async fn test_load_from_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_from_file(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[server\nname=").await.unwrap();
        assert!(AppConfig::load_from_file(file.path()).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            config_path: PathBuf::from("x.toml"),
            bind_address: Some("127.0.0.1:9000".to_string()),
            log_level: Some("trace".to_string()),
            json_logs: true,
        };
        config.apply_cli(&args);
        assert_eq!(config.bind_address().unwrap().port(), 9000);
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_duplicate_users() {
        let mut config = AppConfig::default();
        config.users.push(UserSettings::new("pepe", "user", "other"));
        assert!(config.validate().unwrap_err().contains("Duplicate user nick"));
    }

    #[test]
    fn test_validation_throttle() {
        let mut config = AppConfig::default();
        config.throttle.window_ms = 0;
        assert!(config.validate().unwrap_err().contains("window_ms"));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }
}
