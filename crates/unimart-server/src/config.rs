use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Secrets that ship in sample configs and must never reach a deployment.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret", "unimart"];
const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("UNIMART_JWT_SECRET is not set")]
    MissingSecret,

    #[error("UNIMART_JWT_SECRET is a placeholder or shorter than {MIN_SECRET_LEN} characters")]
    WeakSecret,

    #[error("invalid UNIMART_PORT '{0}'")]
    InvalidPort(String),

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Read `UNIMART_*` variables (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("UNIMART_JWT_SECRET").ok_or(ConfigError::MissingSecret)?;
        let trimmed = jwt_secret.trim();
        if trimmed.len() < MIN_SECRET_LEN || PLACEHOLDER_SECRETS.contains(&trimmed.to_lowercase().as_str()) {
            return Err(ConfigError::WeakSecret);
        }

        let port = match lookup("UNIMART_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(lookup("UNIMART_DB_PATH").unwrap_or_else(|| "unimart.db".into())),
            host: lookup("UNIMART_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[("UNIMART_JWT_SECRET", "a-long-enough-random-secret")])).unwrap();

        assert_eq!(config.db_path, PathBuf::from("unimart.db"));
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn refuses_missing_and_placeholder_secrets() {
        assert_eq!(ServerConfig::from_lookup(lookup(&[])).err(), Some(ConfigError::MissingSecret));
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[("UNIMART_JWT_SECRET", "dev-secret-change-me")])).err(),
            Some(ConfigError::WeakSecret)
        );
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[("UNIMART_JWT_SECRET", "short")])).err(),
            Some(ConfigError::WeakSecret)
        );
    }

    #[test]
    fn rejects_bad_port_and_host() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("UNIMART_JWT_SECRET", "a-long-enough-random-secret"),
            ("UNIMART_PORT", "eighty"),
        ]))
        .err();
        assert_eq!(err, Some(ConfigError::InvalidPort("eighty".into())));

        let config = ServerConfig::from_lookup(lookup(&[
            ("UNIMART_JWT_SECRET", "a-long-enough-random-secret"),
            ("UNIMART_HOST", "not a host"),
        ]))
        .unwrap();
        assert!(matches!(config.listen_addr(), Err(ConfigError::InvalidAddress(_))));
    }
}
