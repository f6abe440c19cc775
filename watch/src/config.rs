//! YAML configuration.
//!
//! ```yaml
//! listen: 0.0.0.0:2112
//! pyroscope:
//!   address: http://localhost:4040
//! servers:
//!   - name: mmo
//!     url: https://screeps.com
//!     username: me
//!     token: xxxxxxxx
//!     metrics_scrape_interval: 1m
//!     websocket_channels: [console, cpu]
//!     targets:
//!       - shard: shard3
//!         metrics_segment: 98
//!         profile_segment: 97
//!         constant_labels: { bot: main }
//!     markets:
//!       - { resource_type: energy, shard: shard3 }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::auth::{AuthMethod, Password, StaticToken};
use crate::domain::{ConfigError, SegmentId};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:2112";
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MARKET_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_SHARD: &str = "none";

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 2112))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// `/metrics` exporter address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub pyroscope: PyroscopeSettings,
    #[serde(default)]
    pub servers: Vec<ServerOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PyroscopeSettings {
    /// Empty disables profile pushing
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerOptions {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,

    /// Each target is one shard's segments
    #[serde(default)]
    pub targets: Vec<MemoryTarget>,
    #[serde(default)]
    pub markets: Vec<MarketTarget>,

    #[serde(default, with = "humantime_serde")]
    pub metrics_scrape_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub market_scrape_interval: Option<Duration>,
    /// Drop profile frames cheaper than this
    #[serde(default)]
    pub profile_min_self_cost_ns: Option<i64>,
    #[serde(default)]
    pub websocket_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryTarget {
    #[serde(default)]
    pub shard: String,
    #[serde(default)]
    pub metrics_segment: Option<u32>,
    #[serde(default)]
    pub profile_segment: Option<u32>,
    #[serde(default)]
    pub constant_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketTarget {
    pub resource_type: String,
    #[serde(default)]
    pub shard: String,
}

impl WatchConfig {
    /// # Errors
    /// Returns `ConfigError` when the file cannot be read, parsed or
    /// validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_yaml_str(&text)
    }

    /// # Errors
    /// Returns `ConfigError` for invalid YAML or an invalid server entry.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// The first invalid server entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.servers {
            server.base_url()?;
        }
        Ok(())
    }

    /// Server by name, or the first one when `name` is `None`.
    pub fn server(&self, name: Option<&str>) -> Option<&ServerOptions> {
        match name {
            Some(name) => self.servers.iter().find(|server| server.name == name),
            None => self.servers.first(),
        }
    }
}

impl ServerOptions {
    /// Validated API base url.
    ///
    /// # Errors
    /// Returns `ConfigError` for a missing or unparseable url, a scheme other
    /// than http(s), no targets, or both a password and a token.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingUrl(self.name.clone()));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets(self.name.clone()));
        }
        if self.password().is_some() && self.token().is_some() {
            return Err(ConfigError::ConflictingCredentials(self.name.clone()));
        }

        let url = Url::parse(&self.url)
            .map_err(|source| ConfigError::InvalidUrl { server: self.name.clone(), source })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|password| !password.is_empty())
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.is_empty())
    }

    /// Password sign-in when a password is set, the static token otherwise.
    pub fn auth_method(&self) -> Arc<dyn AuthMethod> {
        match self.password() {
            Some(password) => Arc::new(Password::new(&self.username, password)),
            None => Arc::new(StaticToken::new(&self.username, self.token().unwrap_or_default())),
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_scrape_interval.filter(|d| !d.is_zero()).unwrap_or(DEFAULT_METRICS_INTERVAL)
    }

    pub fn market_interval(&self) -> Duration {
        self.market_scrape_interval.filter(|d| !d.is_zero()).unwrap_or(DEFAULT_MARKET_INTERVAL)
    }
}

impl MemoryTarget {
    pub fn shard(&self) -> &str {
        if self.shard.is_empty() {
            DEFAULT_SHARD
        } else {
            &self.shard
        }
    }

    pub fn metrics_segment(&self) -> Option<SegmentId> {
        self.metrics_segment.map(SegmentId)
    }

    pub fn profile_segment(&self) -> Option<SegmentId> {
        self.profile_segment.map(SegmentId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r"
listen: 127.0.0.1:9100
pyroscope:
  address: http://localhost:4040
servers:
  - name: mmo
    url: https://screeps.com
    username: me
    token: abc
    metrics_scrape_interval: 30s
    websocket_channels: [console, cpu]
    targets:
      - shard: shard3
        metrics_segment: 98
        profile_segment: 97
        constant_labels: { bot: main }
      - metrics_segment: 90
    markets:
      - { resource_type: energy, shard: shard3 }
";

    fn server(extra: &str) -> String {
        format!("servers:\n  - name: s\n    targets: [{{ metrics_segment: 1 }}]\n{extra}")
    }

    #[test]
    fn test_full_config() {
        let config = WatchConfig::from_yaml_str(FULL).unwrap();
        assert_eq!(config.listen.to_string(), "127.0.0.1:9100");
        assert_eq!(config.pyroscope.address, "http://localhost:4040");

        let mmo = config.server(None).unwrap();
        assert_eq!(mmo.name, "mmo");
        assert_eq!(mmo.metrics_interval(), Duration::from_secs(30));
        assert_eq!(mmo.market_interval(), DEFAULT_MARKET_INTERVAL);
        assert_eq!(mmo.targets[0].shard(), "shard3");
        assert_eq!(mmo.targets[0].profile_segment(), Some(SegmentId(97)));
        assert_eq!(mmo.targets[0].constant_labels["bot"], "main");
        assert_eq!(mmo.targets[1].shard(), "none");
        assert_eq!(mmo.targets[1].profile_segment(), None);
        assert_eq!(mmo.markets[0].resource_type, "energy");
        assert_eq!(mmo.auth_method().username(), "me");
        assert!(config.server(Some("nope")).is_none());
    }

    #[test]
    fn test_defaults() {
        let config =
            WatchConfig::from_yaml_str(&server("    url: http://localhost:21025\n")).unwrap();
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
        assert!(config.pyroscope.address.is_empty());
        assert_eq!(config.servers[0].metrics_interval(), DEFAULT_METRICS_INTERVAL);
    }

    #[test]
    fn test_missing_url() {
        let err = WatchConfig::from_yaml_str(&server("")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingUrl(_)), "{err}");
    }

    #[test]
    fn test_no_targets() {
        let yaml = "servers:\n  - name: s\n    url: https://screeps.com\n";
        let err = WatchConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::NoTargets(_)), "{err}");
    }

    #[test]
    fn test_conflicting_credentials() {
        let yaml = server("    url: https://screeps.com\n    token: a\n    password: b\n");
        let err = WatchConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCredentials(_)), "{err}");
    }

    #[test]
    fn test_bad_urls() {
        let err = WatchConfig::from_yaml_str(&server("    url: ftp://screeps.com\n")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(_)), "{err}");

        let err = WatchConfig::from_yaml_str(&server("    url: '::nope'\n")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }), "{err}");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = WatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers.len(), 1);

        let err = WatchConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
