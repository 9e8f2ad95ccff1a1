use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("{0}")]
    Invalid(&'static str),
}

/// Server configuration. Built once at startup from defaults, then an
/// optional YAML file named by `INNKEEP_CONFIG`, then `INNKEEP_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub store_timeout_ms: u64,
    pub draft_ttl_secs: u64,
    pub mail_queue_size: usize,
    pub mail_from: String,
    pub owner_email: String,
    pub mail_template: Option<String>,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "innkeep".into(),
            max_connections: 256,
            compact_threshold: 1000,
            store_timeout_ms: 3000,
            draft_ttl_secs: 1800,
            mail_queue_size: 100,
            mail_from: "me@here.com".into(),
            owner_email: "me@here.com".into(),
            mail_template: None,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let yaml = match std::env::var("INNKEEP_CONFIG") {
            Ok(path) => {
                let path = Path::new(&path);
                Some(std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?)
            }
            Err(_) => None,
        };
        Self::from_sources(yaml.as_deref(), |var| std::env::var(var).ok())
    }

    /// Layer a YAML document and then environment lookups over the defaults.
    pub fn from_sources(
        yaml: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match yaml {
            Some(doc) if !doc.trim().is_empty() => serde_yaml::from_str(doc)?,
            _ => Config::default(),
        };

        if let Some(v) = env("INNKEEP_PORT") {
            config.port = parse_env("INNKEEP_PORT", v)?;
        }
        if let Some(v) = env("INNKEEP_BIND") {
            config.bind = v;
        }
        if let Some(v) = env("INNKEEP_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env("INNKEEP_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = env("INNKEEP_MAX_CONNECTIONS") {
            config.max_connections = parse_env("INNKEEP_MAX_CONNECTIONS", v)?;
        }
        if let Some(v) = env("INNKEEP_COMPACT_THRESHOLD") {
            config.compact_threshold = parse_env("INNKEEP_COMPACT_THRESHOLD", v)?;
        }
        if let Some(v) = env("INNKEEP_STORE_TIMEOUT_MS") {
            config.store_timeout_ms = parse_env("INNKEEP_STORE_TIMEOUT_MS", v)?;
        }
        if let Some(v) = env("INNKEEP_DRAFT_TTL_SECS") {
            config.draft_ttl_secs = parse_env("INNKEEP_DRAFT_TTL_SECS", v)?;
        }
        if let Some(v) = env("INNKEEP_MAIL_QUEUE_SIZE") {
            config.mail_queue_size = parse_env("INNKEEP_MAIL_QUEUE_SIZE", v)?;
        }
        if let Some(v) = env("INNKEEP_MAIL_FROM") {
            config.mail_from = v;
        }
        if let Some(v) = env("INNKEEP_OWNER_EMAIL") {
            config.owner_email = v;
        }
        if let Some(v) = env("INNKEEP_MAIL_TEMPLATE") {
            config.mail_template = Some(v);
        }
        if let Some(v) = env("INNKEEP_METRICS_PORT") {
            config.metrics_port = Some(parse_env("INNKEEP_METRICS_PORT", v)?);
        }
        if let Some(v) = env("INNKEEP_TLS_CERT") {
            config.tls_cert = Some(v);
        }
        if let Some(v) = env("INNKEEP_TLS_KEY") {
            config.tls_key = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive"));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be positive"));
        }
        if self.draft_ttl_secs == 0 {
            return Err(ConfigError::Invalid("draft_ttl_secs must be positive"));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "tls_cert and tls_key must be set together",
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_secs)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_sources(None, env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store_timeout(), Duration::from_secs(3));
        assert_eq!(config.draft_ttl(), Duration::from_secs(1800));
        assert_eq!(config.wal_path(), PathBuf::from("./data/innkeep.wal"));
    }

    #[test]
    fn yaml_then_env() {
        let yaml = "port: 6000\nowner_email: owner@inn.example\nstore_timeout_ms: 500\n";
        let config = Config::from_sources(Some(yaml), env(&[("INNKEEP_PORT", "7000")])).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.owner_email, "owner@inn.example");
        assert_eq!(config.store_timeout(), Duration::from_millis(500));
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let err = Config::from_sources(None, env(&[("INNKEEP_MAX_CONNECTIONS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "INNKEEP_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn unknown_yaml_key_rejected() {
        assert!(matches!(
            Config::from_sources(Some("prot: 1\n"), env(&[])),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn half_configured_tls_rejected() {
        let err = Config::from_sources(None, env(&[("INNKEEP_TLS_CERT", "cert.pem")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
