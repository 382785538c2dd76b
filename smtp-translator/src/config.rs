use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use translator_core::{pushover, queue};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// `username:password` file, every submitter is accepted without it
    pub credentials: Option<PathBuf>,

    pub lmtp: LmtpConfig,
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LmtpConfig {
    pub bind_addr: SocketAddr,
    pub hostname: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PushoverConfig {
    /// Single token mode when set, the sender local-part is the
    /// application token otherwise.
    pub app_token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            app_token: None,
            api_url: default_api_url(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

pub fn read_config(config_file: PathBuf) -> Result<Config> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

fn default_api_url() -> String {
    pushover::DEFAULT_API_URL.into()
}

fn default_queue_capacity() -> usize {
    queue::DEFAULT_CAPACITY
}

fn default_retry_interval_secs() -> u64 {
    queue::DEFAULT_RETRY_INTERVAL.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [lmtp]
            bind_addr = "127.0.0.1:2525"
            hostname = "translator.example"
            "#,
        )
        .unwrap();
        assert!(config.credentials.is_none());
        assert!(config.auth.is_none());
        assert!(config.pushover.app_token.is_none());
        assert_eq!(config.pushover.api_url, "https://api.pushover.net/1");
        assert_eq!(config.dispatch.queue_capacity, 10);
        assert_eq!(config.dispatch.retry_interval_secs, 10);
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            credentials = "/etc/smtp-translator/users"

            [lmtp]
            bind_addr = "[::1]:2525"
            hostname = "translator.example"

            [auth]
            bind_addr = "[::1]:12345"

            [pushover]
            app_token = "azGDORePK8gMaC0QOYAMyEEuzJnyUi"

            [dispatch]
            retry_interval_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(
            config.credentials,
            Some(PathBuf::from("/etc/smtp-translator/users"))
        );
        assert_eq!(config.auth.unwrap().bind_addr.port(), 12345);
        assert_eq!(
            config.pushover.app_token.as_deref(),
            Some("azGDORePK8gMaC0QOYAMyEEuzJnyUi")
        );
        assert_eq!(config.dispatch.queue_capacity, 10);
        assert_eq!(config.dispatch.retry_interval_secs, 30);
    }
}
