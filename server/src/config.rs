//! Server configuration, read from the environment (`.env` is honored by the
//! binary through dotenvy).

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Shared secret clients must present as their token.
    pub auth_secret: Option<String>,
}

impl Config {
    /// Reads `HOST`, `PORT` and `AUTH_SECRET`. An empty secret counts as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            Err(_) => 3000,
        };

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        Ok(Self {
            host,
            port,
            auth_secret,
        })
    }

    /// Configuration for an in-process server on an ephemeral port.
    pub fn local(auth_secret: Option<&str>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_secret: auth_secret.map(str::to_string),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a client token opens a sync session. Empty tokens never do;
    /// without a secret every other token is accepted.
    pub fn accepts_token(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match &self.auth_secret {
            Some(secret) => token == secret,
            None => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0:?}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_acceptance() {
        let open = Config::local(None);
        assert!(open.accepts_token("anything"));
        assert!(!open.accepts_token(""));

        let locked = Config::local(Some("s3cret"));
        assert!(locked.accepts_token("s3cret"));
        assert!(!locked.accepts_token("guess"));
        assert!(!locked.accepts_token(""));
    }

    #[test]
    fn local_binds_loopback_ephemeral_port() {
        assert_eq!(Config::local(None).bind_addr(), "127.0.0.1:0");
    }
}
