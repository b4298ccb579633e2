use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use landrop_shared::constants::HISTORY_LIMIT;
use landrop_shared::error::TransferStateError;
use landrop_shared::types::{DeviceId, Transfer, TransferId, TransferStatus};

use crate::error::ServerError;

/// Status-only patch; identity fields are immutable after `create`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPatch {
    pub status: Option<TransferStatus>,
    pub progress: Option<u8>,
}

/// Owns every `Transfer` record. Updates are serialized per record behind
/// the map lock; a transition into a terminal state freezes the record.
#[derive(Debug, Default)]
pub struct TransferStore {
    transfers: RwLock<HashMap<TransferId, Transfer>>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, transfer: Transfer) -> Result<Transfer, ServerError> {
        if transfer.sender_id == transfer.receiver_id {
            return Err(ServerError::BadRequest(
                "sender and receiver must differ".into(),
            ));
        }

        let mut transfers = self.transfers.write().await;
        if transfers.contains_key(&transfer.id) {
            return Err(ServerError::TransferExists(transfer.id));
        }

        debug!(
            transfer = %transfer.id,
            sender = %transfer.sender_id,
            receiver = %transfer.receiver_id,
            size = transfer.file_size,
            "Transfer created"
        );
        transfers.insert(transfer.id.clone(), transfer.clone());
        Ok(transfer)
    }

    /// Apply a status/progress patch under the lifecycle rules:
    /// terminal records refuse all updates, progress never decreases, and
    /// `completed` pins progress to 100 and stamps `completed_at`.
    pub async fn update(
        &self,
        id: &TransferId,
        patch: TransferPatch,
    ) -> Result<Transfer, ServerError> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(id)
            .ok_or_else(|| ServerError::TransferNotFound(id.clone()))?;

        if transfer.status.is_terminal() {
            return Err(TransferStateError::InvalidTransition {
                from: transfer.status,
                to: patch.status.unwrap_or(transfer.status),
            }
            .into());
        }

        if let Some(next) = patch.status {
            transfer.status = transfer.status.transition_to(next)?;
        }
        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            // Progress is monotone within a lifespan; late or reordered
            // updates are merged with max().
            transfer.progress = transfer.progress.max(progress);
        }

        if transfer.status == TransferStatus::Completed {
            transfer.progress = 100;
        }
        if transfer.status.is_terminal() {
            transfer.completed_at = Some(Utc::now());
            debug!(transfer = %id, status = %transfer.status, "Transfer reached terminal state");
        }

        Ok(transfer.clone())
    }

    pub async fn get(&self, id: &TransferId) -> Option<Transfer> {
        self.transfers.read().await.get(id).cloned()
    }

    /// Non-terminal transfers where the device is either endpoint.
    pub async fn active_for(&self, device: &DeviceId) -> Vec<Transfer> {
        let transfers = self.transfers.read().await;
        let mut active: Vec<Transfer> = transfers
            .values()
            .filter(|t| {
                !t.status.is_terminal() && (&t.sender_id == device || &t.receiver_id == device)
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    /// Terminal transfers involving the device, newest first, truncated.
    pub async fn history_for(&self, device: &DeviceId, limit: Option<usize>) -> Vec<Transfer> {
        let transfers = self.transfers.read().await;
        let mut history: Vec<Transfer> = transfers
            .values()
            .filter(|t| {
                t.status.is_terminal() && (&t.sender_id == device || &t.receiver_id == device)
            })
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit.unwrap_or(HISTORY_LIMIT));
        history
    }
}

#[cfg(test)]
pub(crate) fn sample_transfer(id: &str, sender: &str, receiver: &str) -> Transfer {
    Transfer {
        id: TransferId::from(id),
        file_name: "report.pdf".into(),
        file_size: 1024,
        file_type: "application/pdf".into(),
        sender_id: DeviceId::from(sender),
        receiver_id: DeviceId::from(receiver),
        status: TransferStatus::Pending,
        progress: 0,
        created_at: Utc::now(),
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = TransferStore::new();
        store.create(sample_transfer("t1", "a", "b")).await.unwrap();

        let err = store.create(sample_transfer("t1", "a", "b")).await;
        assert!(matches!(err, Err(ServerError::TransferExists(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_self_transfer() {
        let store = TransferStore::new();
        let err = store.create(sample_transfer("t1", "a", "a")).await;
        assert!(matches!(err, Err(ServerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_terminal_state_is_frozen() {
        let store = TransferStore::new();
        let id = TransferId::from("t1");
        store.create(sample_transfer("t1", "a", "b")).await.unwrap();

        store
            .update(
                &id,
                TransferPatch {
                    status: Some(TransferStatus::Rejected),
                    progress: None,
                },
            )
            .await
            .unwrap();

        let err = store
            .update(
                &id,
                TransferPatch {
                    status: Some(TransferStatus::Accepted),
                    progress: None,
                },
            )
            .await;
        assert!(err.is_err());

        // Progress-only updates are refused as well.
        let err = store
            .update(
                &id,
                TransferPatch {
                    status: None,
                    progress: Some(50),
                },
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_completed_pins_progress_and_stamps_time() {
        let store = TransferStore::new();
        let id = TransferId::from("t1");
        store.create(sample_transfer("t1", "a", "b")).await.unwrap();

        for status in [TransferStatus::Accepted, TransferStatus::Transferring] {
            store
                .update(
                    &id,
                    TransferPatch {
                        status: Some(status),
                        progress: None,
                    },
                )
                .await
                .unwrap();
        }

        let done = store
            .update(
                &id,
                TransferPatch {
                    status: Some(TransferStatus::Completed),
                    progress: Some(67),
                },
            )
            .await
            .unwrap();

        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let store = TransferStore::new();
        let id = TransferId::from("t1");
        store.create(sample_transfer("t1", "a", "b")).await.unwrap();
        store
            .update(
                &id,
                TransferPatch {
                    status: Some(TransferStatus::Accepted),
                    progress: Some(60),
                },
            )
            .await
            .unwrap();

        let after = store
            .update(
                &id,
                TransferPatch {
                    status: Some(TransferStatus::Transferring),
                    progress: Some(33),
                },
            )
            .await
            .unwrap();
        assert_eq!(after.progress, 60);
    }

    #[tokio::test]
    async fn test_active_and_history_partition() {
        let store = TransferStore::new();
        let device = DeviceId::from("a");

        store.create(sample_transfer("t1", "a", "b")).await.unwrap();
        store.create(sample_transfer("t2", "b", "a")).await.unwrap();
        store.create(sample_transfer("t3", "b", "c")).await.unwrap();
        store
            .update(
                &TransferId::from("t2"),
                TransferPatch {
                    status: Some(TransferStatus::Rejected),
                    progress: None,
                },
            )
            .await
            .unwrap();

        let active = store.active_for(&device).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, TransferId::from("t1"));

        let history = store.history_for(&device, None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, TransferId::from("t2"));
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = TransferStore::new();
        for i in 0..15 {
            let id = format!("t{i}");
            store.create(sample_transfer(&id, "a", "b")).await.unwrap();
            store
                .update(
                    &TransferId(id),
                    TransferPatch {
                        status: Some(TransferStatus::Rejected),
                        progress: None,
                    },
                )
                .await
                .unwrap();
        }

        let history = store.history_for(&DeviceId::from("a"), None).await;
        assert_eq!(history.len(), HISTORY_LIMIT);
    }
}
