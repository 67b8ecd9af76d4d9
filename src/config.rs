// src/config.rs
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Scylla,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub scylla_node: String,
    pub scylla_keyspace: String,
    /// `None` means a random secret is generated at start-up.
    pub jwt_secret: Option<String>,
    pub session_ttl_hours: i64,
    pub market_data_url: String,
    pub admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3030".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let store_backend = match get("STORE_BACKEND")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("scylla") => StoreBackend::Scylla,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    reason: format!("expected `scylla` or `memory`, got `{}`", other),
                })
            }
        };

        let scylla_keyspace =
            get("SCYLLA_KEYSPACE").unwrap_or_else(|| "club_dashboard".to_string());
        // Interpolated into CQL statements, so keep it to identifier characters.
        if !scylla_keyspace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid {
                key: "SCYLLA_KEYSPACE",
                reason: "only letters, digits and underscores are allowed".to_string(),
            });
        }

        let session_ttl_hours = match get("SESSION_TTL_HOURS") {
            None => 12,
            Some(raw) => match raw.parse::<i64>() {
                Ok(hours) if hours > 0 => hours,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SESSION_TTL_HOURS",
                        reason: format!("expected a positive integer, got `{}`", raw),
                    })
                }
            },
        };

        let admin = match (get("ADMIN_USERNAME"), get("ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };

        Ok(Config {
            bind_addr,
            store_backend,
            scylla_node: get("SCYLLA_NODE").unwrap_or_else(|| "127.0.0.1:9042".to_string()),
            scylla_keyspace,
            jwt_secret: get("JWT_SECRET"),
            session_ttl_hours,
            market_data_url: get("MARKET_DATA_URL")
                .unwrap_or_else(|| "https://query1.finance.yahoo.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(
            config.bind_addr,
            "127.0.0.1:3030".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.store_backend, StoreBackend::Scylla);
        assert_eq!(config.scylla_keyspace, "club_dashboard");
        assert_eq!(config.session_ttl_hours, 12);
        assert!(config.jwt_secret.is_none());
        assert!(config.admin.is_none());
    }

    #[test]
    fn memory_backend_and_admin_bootstrap() {
        let config = config_from(&[
            ("STORE_BACKEND", "Memory"),
            ("ADMIN_USERNAME", "root"),
            ("ADMIN_PASSWORD", "changeme123"),
            ("MARKET_DATA_URL", "http://localhost:9999/"),
        ])
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(
            config.admin,
            Some(("root".to_string(), "changeme123".to_string()))
        );
        assert_eq!(config.market_data_url, "http://localhost:9999");
    }

    #[test]
    fn admin_requires_both_fields() {
        let config = config_from(&[("ADMIN_USERNAME", "root")]).unwrap();
        assert!(config.admin.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("STORE_BACKEND", "mongo")]).is_err());
        assert!(config_from(&[("SESSION_TTL_HOURS", "0")]).is_err());
        assert!(config_from(&[("SESSION_TTL_HOURS", "soon")]).is_err());
        assert!(config_from(&[("SCYLLA_KEYSPACE", "club; DROP")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "nowhere")]).is_err());
    }
}
