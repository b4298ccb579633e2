pub mod chunks;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod peer;
pub mod relay;
pub mod session;

pub use config::ClientConfig;
pub use engine::{EngineHandle, OutgoingFile, TransferEngine, TransferState};
pub use error::ClientError;
pub use events::{SaveHandler, SavedFile, TransferUpdate, UiNotice};
pub use session::{SessionClient, SessionHandle};
