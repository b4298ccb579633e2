use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Device, DeviceId, DeviceKind, DeviceStatus, TransferId};

/// Everything that crosses the `/ws` signaling session, in both directions.
///
/// Wire form is a UTF-8 JSON object with a `type` discriminant
/// (`device-register`, `webrtc-offer`, ...) and camelCase fields, so the
/// hub stays compatible with browser-grade peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    #[serde(rename_all = "camelCase")]
    DeviceRegister {
        device_id: DeviceId,
        name: String,
        #[serde(rename = "deviceType")]
        kind: DeviceKind,
    },
    #[serde(rename_all = "camelCase")]
    DeviceUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<DeviceStatus>,
    },
    #[serde(rename_all = "camelCase")]
    DeviceList { devices: Vec<Device> },
    TransferOffer(TransferOffer),
    #[serde(rename_all = "camelCase")]
    TransferAnswer {
        transfer_id: TransferId,
        accepted: bool,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        transfer_id: TransferId,
        /// Serialized SDP session description.
        offer: String,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        transfer_id: TransferId,
        answer: String,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        transfer_id: TransferId,
        /// Serialized ICE candidate init blob.
        candidate: String,
    },
    #[serde(rename_all = "camelCase")]
    TransferProgress {
        transfer_id: TransferId,
        progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    TransferComplete { transfer_id: TransferId },
    #[serde(rename_all = "camelCase")]
    TransferError {
        transfer_id: TransferId,
        message: String,
    },
    Ping {
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Pong {
        timestamp: i64,
        original_timestamp: i64,
    },
    Error {
        message: String,
    },
}

/// The fields of a `transfer-offer`, kept as a named struct because the
/// hub persists them and the receiving UI hands them back on accept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferOffer {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub sender_id: DeviceId,
    pub receiver_id: DeviceId,
}

impl SignalMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The transfer this message is about, when it is about one.
    pub fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            Self::TransferOffer(offer) => Some(&offer.transfer_id),
            Self::TransferAnswer { transfer_id, .. }
            | Self::WebrtcOffer { transfer_id, .. }
            | Self::WebrtcAnswer { transfer_id, .. }
            | Self::WebrtcIceCandidate { transfer_id, .. }
            | Self::TransferProgress { transfer_id, .. }
            | Self::TransferComplete { transfer_id }
            | Self::TransferError { transfer_id, .. } => Some(transfer_id),
            _ => None,
        }
    }
}

/// Envelope carried on the `fileTransfer` data channel: one metadata
/// object, then the chunks in index order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    #[serde(rename_all = "camelCase")]
    Metadata {
        file_name: String,
        file_size: u64,
        file_type: String,
        total_chunks: u32,
    },
    Chunk {
        index: u32,
        data: Vec<u8>,
    },
}

impl ChannelMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_kebab_case() {
        let msg = SignalMessage::WebrtcIceCandidate {
            transfer_id: TransferId::from("t-1"),
            candidate: "{}".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "webrtc-ice-candidate");
        assert_eq!(json["transferId"], "t-1");

        let msg = SignalMessage::DeviceRegister {
            device_id: DeviceId::from("d-1"),
            name: "Desk".into(),
            kind: DeviceKind::Laptop,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "device-register");
        assert_eq!(json["deviceType"], "laptop");
    }

    #[test]
    fn test_signal_roundtrip() {
        let msg = SignalMessage::TransferOffer(TransferOffer {
            transfer_id: TransferId::from("t-9"),
            file_name: "photo.jpg".into(),
            file_size: 49_152,
            file_type: "image/jpeg".into(),
            sender_id: DeviceId::from("a"),
            receiver_id: DeviceId::from("b"),
        });
        let restored = SignalMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_pong_echoes_original_timestamp() {
        let json = r#"{"type":"pong","timestamp":20,"originalTimestamp":10}"#;
        let msg = SignalMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            SignalMessage::Pong {
                timestamp: 20,
                original_timestamp: 10
            }
        );
    }

    #[test]
    fn test_unknown_discriminant_is_an_error() {
        assert!(SignalMessage::from_json(r#"{"type":"mystery"}"#).is_err());
        assert!(SignalMessage::from_json("not json at all").is_err());
    }

    #[test]
    fn test_channel_envelope_roundtrip() {
        let chunk = ChannelMessage::Chunk {
            index: 2,
            data: vec![0, 255, 7],
        };
        let json: serde_json::Value = serde_json::from_str(&chunk.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["data"], serde_json::json!([0, 255, 7]));
        assert_eq!(
            ChannelMessage::from_json(&chunk.to_json().unwrap()).unwrap(),
            chunk
        );
    }
}
