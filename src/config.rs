//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `BHOLE_LISTEN`, `PORT`, `BHOLE_CONNECT_HOST`,
//!    `BHOLE_API_HOST`, `BHOLE_AUTH_TOKEN`, `BHOLE_VERSION`, `BHOLE_IMAGE`,
//!    `FLY_REGION`
//! 2. **Config file**: path via `--config <path>`, or `bhole.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! connect_host = "connect.example.com"   # agents dial this host
//! api_host = "api.example.com"           # status API host
//! max_request_body = 10485760            # 10 MiB
//! max_response_body = 10485760           # 10 MiB
//!
//! # Optional, omit to accept any agent
//! [auth]
//! token = "shared-secret"
//!
//! [deploy]
//! version = "1.2.3"
//! image = "registry.example.com/bhole:1.2.3"
//! region = "yyz"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener, host routing, and body-size limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Host name agents connect to for the control protocol (default `localhost`).
    #[serde(default = "default_host")]
    pub connect_host: String,
    /// Host name serving the status API (default `localhost`).
    #[serde(default = "default_host")]
    pub api_host: String,
    /// Largest request body forwarded to an agent, in bytes (default 10 MiB).
    #[serde(default = "default_max_body")]
    pub max_request_body: usize,
    /// Largest response body returned from an agent, in bytes (default 10 MiB).
    #[serde(default = "default_max_body")]
    pub max_response_body: usize,
}

/// Agent authentication.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret agents must present in the handshake. `None` disables
    /// the check. Override with `BHOLE_AUTH_TOKEN`.
    pub token: Option<String>,
}

/// Deployment metadata reported by `/api/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Reported version (default: crate version).
    #[serde(default = "default_version")]
    pub version: String,
    /// Container image reference, if any.
    #[serde(default)]
    pub image: String,
    /// Hosting region (default `local`).
    #[serde(default = "default_region")]
    pub region: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_max_body() -> usize {
    10 * 1024 * 1024 // 10 MiB
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_region() -> String {
    "local".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            connect_host: default_host(),
            api_host: default_host(),
            max_request_body: default_max_body(),
            max_response_body: default_max_body(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            image: String::new(),
            region: default_region(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for `bhole.toml`
    /// in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("bhole.toml").exists() => Self::from_file("bhole.toml")?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Apply environment overrides. Empty values are treated as unset.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = var("PORT") {
            self.server.listen = format!("0.0.0.0:{port}");
        }
        if let Some(listen) = var("BHOLE_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(host) = var("BHOLE_CONNECT_HOST") {
            self.server.connect_host = host;
        }
        if let Some(host) = var("BHOLE_API_HOST") {
            self.server.api_host = host;
        }
        if let Some(token) = var("BHOLE_AUTH_TOKEN") {
            self.auth.token = Some(token);
        }
        if let Some(version) = var("BHOLE_VERSION") {
            self.deploy.version = version;
        }
        if let Some(image) = var("BHOLE_IMAGE") {
            self.deploy.image = image;
        }
        if let Some(region) = var("FLY_REGION") {
            self.deploy.region = region;
        }
    }

    /// The configured shared secret, ignoring an empty string.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Port component of `server.listen`, used for status reporting.
    pub fn listen_port(&self) -> Option<u16> {
        self.server
            .listen
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.connect_host, "localhost");
        assert_eq!(config.server.max_request_body, 10 * 1024 * 1024);
        assert_eq!(config.server.max_response_body, 10 * 1024 * 1024);
        assert!(config.auth_token().is_none());
        assert_eq!(config.deploy.region, "local");
        assert_eq!(config.listen_port(), Some(8080));
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            connect_host = "connect.example.com"
            max_request_body = 1024

            [auth]
            token = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.connect_host, "connect.example.com");
        assert_eq!(config.server.api_host, "localhost");
        assert_eq!(config.server.max_request_body, 1024);
        assert_eq!(config.auth_token(), Some("s3cret"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("PORT", "9090"),
            ("BHOLE_CONNECT_HOST", "connect.example.com"),
            ("BHOLE_AUTH_TOKEN", "abc"),
            ("FLY_REGION", "yyz"),
        ]));
        assert_eq!(config.server.listen, "0.0.0.0:9090");
        assert_eq!(config.server.connect_host, "connect.example.com");
        assert_eq!(config.auth_token(), Some("abc"));
        assert_eq!(config.deploy.region, "yyz");
    }

    #[test]
    fn test_listen_env_beats_port() {
        let mut config = Config::default();
        config.apply_env(env(&[("PORT", "9090"), ("BHOLE_LISTEN", "127.0.0.1:7000")]));
        assert_eq!(config.server.listen, "127.0.0.1:7000");
        assert_eq!(config.listen_port(), Some(7000));
    }

    #[test]
    fn test_empty_env_is_unset() {
        let mut config = Config::default();
        config.apply_env(env(&[("BHOLE_AUTH_TOKEN", ""), ("FLY_REGION", "")]));
        assert!(config.auth.token.is_none());
        assert_eq!(config.deploy.region, "local");
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::load(Some("/nonexistent/bhole.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
