use std::net::SocketAddr;
use std::time::Duration;

use landrop_shared::constants::{DEFAULT_MAX_UPLOAD_SIZE, LIVENESS_WINDOW};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub max_upload_size: u64,
    pub instance_name: String,
    /// How long a silent device keeps counting as reachable.
    pub liveness_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            instance_name: "landrop hub".to_string(),
            liveness_window: LIVENESS_WINDOW,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(val) = std::env::var("MAX_UPLOAD_SIZE") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default");
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Ok(val) = std::env::var("LIVENESS_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.liveness_window = Duration::from_secs(n),
                _ => {
                    tracing::warn!(value = %val, "Invalid LIVENESS_WINDOW_SECS, using default");
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.max_upload_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.liveness_window, Duration::from_secs(300));
    }
}
