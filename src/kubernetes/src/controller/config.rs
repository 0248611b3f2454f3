use std::fs;

use serde::{Deserialize, Serialize};

use crate::config::Tls;

use super::error::ConfigError;

use vlbd_cert::constants::{DEFAULT_TLS_CERT, DEFAULT_TLS_KEY};

pub const DEFAULT_HTTP_PORT: u32 = 8080;
pub const DEFAULT_HTTPS_PORT: u32 = 8443;
pub const DEFAULT_REQUEUE_INTERVAL: u64 = 30 * 60;
pub const DEFAULT_EXTERNAL_IP_ATTEMPTS: u32 = 5;
pub const DEFAULT_EXTERNAL_IP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub http_port: u32,
    pub https_port: u32,
    pub tls: Tls,
    pub requeue_interval: u64,
    pub external_ip: ExternalIp,
    pub loose_selector: bool,
    pub migrate_kubevip: bool,
}

/// Bounds the wait for the address assigned to a Service from outside.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExternalIp {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for ExternalIp {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_EXTERNAL_IP_ATTEMPTS,
            interval_ms: DEFAULT_EXTERNAL_IP_INTERVAL_MS,
        }
    }
}

impl Config {
    pub fn load(file: &str) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(file).map_err(|e| ConfigError::FailedToRead(file.to_string(), e))?;
        serde_yaml::from_str(&contents).map_err(ConfigError::FailedToLoad)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            tls: Tls {
                cert: DEFAULT_TLS_CERT.to_string(),
                key: DEFAULT_TLS_KEY.to_string(),
            },
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            external_ip: ExternalIp::default(),
            loose_selector: false,
            migrate_kubevip: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_config_partial_yaml() {
        let config: Config = serde_yaml::from_str(
            r#"
https_port: 9443
external_ip:
  attempts: 10
loose_selector: true
"#,
        )
        .unwrap();
        assert_eq!(9443, config.https_port);
        assert_eq!(DEFAULT_HTTP_PORT, config.http_port);
        assert_eq!(10, config.external_ip.attempts);
        assert_eq!(DEFAULT_EXTERNAL_IP_INTERVAL_MS, config.external_ip.interval_ms);
        assert!(config.loose_selector);
        assert!(config.migrate_kubevip);
        assert_eq!(DEFAULT_TLS_CERT, config.tls.cert);
    }

    #[test]
    fn fails_config_load_missing_file() {
        let res = Config::load("/nonexistent/vlbd.yaml");
        assert!(matches!(res, Err(ConfigError::FailedToRead(_, _))));
    }
}
