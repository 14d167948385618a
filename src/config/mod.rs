//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{Session, SessionStore};

const DEFAULT_BACKEND_URL: &str = "http://localhost:54321";
const ENV_BACKEND_URL: &str = "MATCHCHAT_BACKEND_URL";
const ENV_API_KEY: &str = "MATCHCHAT_API_KEY";

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    3
}

fn default_banner_secs() -> u64 {
    3
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the hosted backend (REST, storage, auth and realtime)
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Publishable API key sent with every request
    #[serde(default)]
    pub api_key: String,
    /// Play an alert for new messages from other users
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    /// Use the push channel; when off the chat view polls
    #[serde(default = "default_true")]
    pub realtime_enabled: bool,
    /// Polling fallback interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How long a transient error banner stays visible
    #[serde(default = "default_banner_secs")]
    pub error_banner_secs: u64,
    /// Stored auth session (from last login)
    pub session: Option<Session>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: String::new(),
            sound_enabled: true,
            realtime_enabled: true,
            poll_interval_secs: default_poll_interval(),
            error_banner_secs: default_banner_secs(),
            session: None,
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "matchchat", "matchchat")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Directory for client-local durable state (read markers).
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(ENV_BACKEND_URL) {
            config.backend_url = url;
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            config.api_key = key;
        }

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn error_banner_ttl(&self) -> Duration {
        Duration::from_secs(self.error_banner_secs.max(1))
    }
}

impl SessionStore for Config {
    fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    fn clear_session(&mut self) {
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert!(config.sound_enabled);
        assert!(config.realtime_enabled);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.error_banner_ttl(), Duration::from_secs(3));
        assert!(config.session().is_none());
    }

    #[test]
    fn test_session_round_trips_through_toml() {
        let mut config = Config::default();
        config.sound_enabled = false;
        config.set_session(Session {
            user_id: "u1".to_string(),
            access_token: crate::auth::StoredToken::new("tok".to_string(), Some(3600)),
            refresh_token: Some("r".to_string()),
            profile: None,
        });

        let text = toml::to_string_pretty(&config).unwrap();
        let loaded = Config::parse(&text).unwrap();
        assert!(!loaded.sound_enabled);
        assert_eq!(loaded.session().unwrap().user_id, "u1");
        assert_eq!(loaded.session().unwrap().refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = Config::parse("poll_interval_secs = 0").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_banner_ttl_is_clamped() {
        let config = Config::parse("error_banner_secs = 0").unwrap();
        assert_eq!(config.error_banner_ttl(), Duration::from_secs(1));
    }
}
