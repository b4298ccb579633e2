use landrop_shared::constants::{STUN_SERVERS, WS_PATH};
use landrop_shared::types::{DeviceId, DeviceKind, TransferId};

/// Connection parameters for one device. The hub URL is the plain HTTP
/// base (`http://192.168.1.20:3000`); the signaling URL is derived.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hub_url: String,
    pub device_id: DeviceId,
    pub device_name: String,
    pub device_kind: DeviceKind,
    /// Rendezvous servers handed to the peer connection for NAT traversal.
    pub stun_servers: Vec<String>,
}

impl ClientConfig {
    pub fn new(
        hub_url: impl Into<String>,
        device_id: DeviceId,
        device_name: impl Into<String>,
        device_kind: DeviceKind,
    ) -> Self {
        let hub_url = hub_url.into();
        Self {
            hub_url: hub_url.trim_end_matches('/').to_string(),
            device_id,
            device_name: device_name.into(),
            device_kind,
            stun_servers: STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn ws_url(&self) -> String {
        let base = self
            .hub_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{base}{WS_PATH}")
    }

    pub fn upload_url(&self, id: &TransferId) -> String {
        format!("{}/api/transfer/{}/upload", self.hub_url, id)
    }

    pub fn download_url(&self, id: &TransferId) -> String {
        format!("{}/api/transfer/{}/download", self.hub_url, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_derivation() {
        let config = ClientConfig::new(
            "http://10.0.0.5:3000/",
            DeviceId::from("d1"),
            "Desk",
            DeviceKind::Laptop,
        );
        assert_eq!(config.ws_url(), "ws://10.0.0.5:3000/ws");
        assert_eq!(
            config.download_url(&TransferId::from("t1")),
            "http://10.0.0.5:3000/api/transfer/t1/download"
        );
    }
}
