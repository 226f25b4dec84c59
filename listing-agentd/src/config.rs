use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use uuid::Uuid;
use listing_client::RegistrationSettings;
use shared::types::{Credentials, ServerRecord, ServerStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub directory: DirectoryConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the directory service, e.g. "http://127.0.0.1:8889"
    pub url: String,
    pub communication_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Generated once at startup when absent
    pub uuid: Option<Uuid>,
    #[serde(default = "default_name")]
    pub name: String,
    pub port: u16,
    #[serde(default = "default_player_capacity")]
    pub player_capacity: u32,
    #[serde(default)]
    pub extra: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_true")]
    pub register_on_start: bool,
    #[serde(default = "default_true")]
    pub deregister_on_stop: bool,
    #[serde(default = "default_true")]
    pub retry_registration_as_update_on_fail: bool,
    #[serde(default = "default_true")]
    pub update_server_periodically: bool,
    #[serde(default = "default_update_period")]
    pub update_server_period_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "game-server".to_string())
}

fn default_player_capacity() -> u32 {
    16
}

fn default_true() -> bool {
    true
}

fn default_update_period() -> u64 {
    300
}

fn default_listen() -> String {
    "127.0.0.1:8890".to_string()
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            register_on_start: true,
            deregister_on_stop: true,
            retry_registration_as_update_on_fail: true,
            update_server_periodically: true,
            update_server_period_secs: default_update_period(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate, assigning a fresh server UUID if none is configured
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.validate()?;

        if config.server.uuid.is_none() {
            let uuid = Uuid::new_v4();
            tracing::info!("No server uuid configured; generated {}", uuid);
            config.server.uuid = Some(uuid);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.directory.url.trim();
        if url.is_empty() {
            bail!("directory.url must not be empty");
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("directory.url must start with http:// or https://, got {}", url);
        }
        if self.directory.communication_key.is_empty() {
            bail!("directory.communication_key must not be empty");
        }
        if self.registration.update_server_periodically
            && self.registration.update_server_period_secs == 0
        {
            bail!("registration.update_server_period_secs must be positive when periodic updates are enabled");
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.directory.communication_key.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.request_timeout_secs)
    }
}

impl ServerConfig {
    /// Build the directory record. Call once; the uuid is fixed by `Config::from_toml`.
    pub fn record(&self) -> ServerRecord {
        ServerRecord::new(
            self.uuid.unwrap_or_else(Uuid::new_v4),
            self.port,
            ServerStatus {
                name: self.name.clone(),
                player_count: 0,
                player_capacity: self.player_capacity,
                extra: self.extra.clone(),
            },
        )
    }
}

impl RegistrationConfig {
    pub fn settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            retry_registration_as_update_on_fail: self.retry_registration_as_update_on_fail,
            update_server_periodically: self.update_server_periodically,
            update_server_period: Duration::from_secs(self.update_server_period_secs),
            register_on_start: self.register_on_start,
            deregister_on_stop: self.deregister_on_stop,
        }
    }
}
