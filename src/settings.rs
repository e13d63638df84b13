use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::connection::endpoint::{Endpoint, GATEWAY_PORT, SANDBOX_GATEWAY_HOST};
use crate::notifications::retry::RetryPolicy;

/// Connection settings for one push gateway client. Fixed once a client is
/// built from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    #[serde(rename = "certificate")]
    pub certificate_path: Option<PathBuf>,
    #[serde(rename = "private_key")]
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    #[serde(rename = "ca_certificate")]
    pub ca_certificate_path: Option<PathBuf>,
    pub retries: u32,
    pub persistent: bool,
    pub connect_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn feedback_endpoint(&self) -> Endpoint {
        self.endpoint().feedback_for()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: SANDBOX_GATEWAY_HOST.to_string(),
            port: GATEWAY_PORT,
            certificate_path: None,
            private_key_path: None,
            passphrase: None,
            ca_certificate_path: None,
            retries: RetryPolicy::DEFAULT_RETRIES,
            persistent: false,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings").required(false))
            .add_source(Environment::with_prefix("APNS").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("APNS").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
