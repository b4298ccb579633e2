use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use landrop_shared::constants::{
    COMPLETE_NOTIFY_WINDOW, RELAY_RETAIN_AFTER_DOWNLOAD, RELAY_RETAIN_UNUSED,
};
use landrop_shared::types::TransferId;

use crate::error::ServerError;

/// A payload parked on the hub because the direct path failed.
#[derive(Debug, Clone)]
pub struct RelayEntry {
    pub payload: Bytes,
    pub file_name: String,
    pub file_type: String,
    /// Position within a folder transfer; defaults to the file name.
    pub relative_path: String,
    pub uploaded_at: DateTime<Utc>,
    downloaded: bool,
}

impl RelayEntry {
    pub fn new(payload: Bytes, file_name: String, file_type: String, relative_path: Option<String>) -> Self {
        let relative_path = relative_path.unwrap_or_else(|| file_name.clone());
        Self {
            payload,
            file_name,
            file_type,
            relative_path,
            uploaded_at: Utc::now(),
            downloaded: false,
        }
    }
}

/// Fallback storage for transfers the peers could not stream directly.
///
/// An entry's presence doubles as the completed-upload marker, which is
/// what makes retried uploads idempotent. The `accepted` set is written by
/// the signaling hub on `transfer-answer` and gates every download. The
/// `notified` map suppresses repeat completion notices per transfer.
#[derive(Debug, Default)]
pub struct RelayBuffer {
    entries: RwLock<HashMap<TransferId, RelayEntry>>,
    accepted: RwLock<HashSet<TransferId>>,
    notified: Mutex<HashMap<TransferId, Instant>>,
}

impl RelayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded when the receiver answers `accepted=true`; downloads are
    /// refused until then.
    pub async fn mark_accepted(&self, id: TransferId) {
        self.accepted.write().await.insert(id);
    }

    pub async fn is_accepted(&self, id: &TransferId) -> bool {
        self.accepted.read().await.contains(id)
    }

    /// Whether a completed upload is already parked for this id.
    pub async fn has_payload(&self, id: &TransferId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Park an uploaded payload and start the unused-entry clock: the
    /// entry is discarded after [`RELAY_RETAIN_UNUSED`] unless a download
    /// begins first.
    pub async fn store(self: &Arc<Self>, id: TransferId, entry: RelayEntry) {
        debug!(transfer = %id, size = entry.payload.len(), "Relay payload stored");
        self.entries.write().await.insert(id.clone(), entry);

        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RELAY_RETAIN_UNUSED).await;
            let mut entries = buffer.entries.write().await;
            if entries.get(&id).is_some_and(|e| !e.downloaded) {
                entries.remove(&id);
                debug!(transfer = %id, "Relay payload expired unused");
            }
        });
    }

    /// Authorize and hand out the payload for download. Marks the entry
    /// downloaded and schedules its removal (payload and accept flag)
    /// [`RELAY_RETAIN_AFTER_DOWNLOAD`] after the response begins.
    pub async fn open_download(self: &Arc<Self>, id: &TransferId) -> Result<RelayEntry, ServerError> {
        // Authorization is checked before existence so a 403 cannot be
        // used to probe which transfer ids hold payloads.
        if !self.is_accepted(id).await {
            return Err(ServerError::NotAccepted);
        }

        let entry = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| ServerError::RelayMissing(id.clone()))?;
            entry.downloaded = true;
            entry.clone()
        };

        let buffer = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RELAY_RETAIN_AFTER_DOWNLOAD).await;
            buffer.discard(&id).await;
        });

        Ok(entry)
    }

    /// Drop the payload and the acceptance flag.
    pub async fn discard(&self, id: &TransferId) {
        let removed = self.entries.write().await.remove(id).is_some();
        self.accepted.write().await.remove(id);
        if removed {
            debug!(transfer = %id, "Relay payload discarded");
        }
    }

    /// At-most-once gate for `transfer-complete` notices: true the first
    /// time per transfer within [`COMPLETE_NOTIFY_WINDOW`].
    pub async fn should_notify_complete(&self, id: &TransferId) -> bool {
        let now = Instant::now();
        let mut notified = self.notified.lock().await;
        notified.retain(|_, at| now.duration_since(*at) < COMPLETE_NOTIFY_WINDOW);

        if notified.contains_key(id) {
            return false;
        }
        notified.insert(id.clone(), now);
        true
    }
}
