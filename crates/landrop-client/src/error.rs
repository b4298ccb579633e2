use thiserror::Error;

use landrop_shared::error::ProtocolError;
use landrop_shared::types::TransferId;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Peer connection did not open in time")]
    NegotiationTimeout,

    #[error("Relay upload exhausted after {attempts} attempts")]
    RelayExhausted { attempts: u32 },

    #[error("Relay download refused: {status}")]
    RelayRefused { status: u16 },

    #[error("Unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("Chunk {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Reassembly is missing chunk {index}")]
    MissingChunk { index: u32 },

    #[error("Data channel is not open")]
    ChannelClosed,
}
