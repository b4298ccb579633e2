use thiserror::Error;

use crate::types::TransferStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferStateError {
    #[error("illegal transfer transition: {from} -> {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frames are not part of the signaling protocol")]
    BinaryFrame,
}
