use std::sync::Arc;

use bytes::Bytes;

use landrop_shared::protocol::TransferOffer;
use landrop_shared::types::{Device, TransferId};

use crate::engine::TransferState;

/// Messages the session client routes straight to the UI layer.
#[derive(Debug, Clone)]
pub enum UiNotice {
    /// The hub's view of who is reachable (never includes this device).
    Devices(Vec<Device>),
    /// An inbound offer awaiting the user's accept or decline.
    Offer(TransferOffer),
}

/// Per-transfer lifecycle notification for UI subscribers. Only terminal
/// states carry a message.
#[derive(Debug, Clone)]
pub struct TransferUpdate {
    pub transfer_id: TransferId,
    pub state: TransferState,
    pub progress: u8,
    pub message: Option<String>,
}

/// A completed inbound file, handed to the save handler exactly once.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub file_type: String,
    pub relative_path: Option<String>,
    pub data: Bytes,
}

/// Invoked once per completed inbound transfer; writing to disk (or
/// wherever) is the embedder's concern.
pub type SaveHandler = Arc<dyn Fn(SavedFile) + Send + Sync>;
