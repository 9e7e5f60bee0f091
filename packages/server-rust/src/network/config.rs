//! Network configuration for the catalog server.

use std::path::PathBuf;
use std::time::Duration;

/// Listener, TLS and HTTP-layer settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound on a whole HTTP request, answered with 408.
    pub request_timeout: Duration,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    /// `host:port` as handed to the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|origin| origin == "*")
    }
}

/// PEM certificate and key for serving HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_everywhere_over_plain_http() {
        let config = NetworkConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:0");
        assert!(config.tls.is_none());
        assert!(config.allows_any_origin());
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn explicit_origins_disable_wildcard() {
        let config = NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec!["https://catalog.example".to_string()],
            ..NetworkConfig::default()
        };
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(!config.allows_any_origin());
    }
}
