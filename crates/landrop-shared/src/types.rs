use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransferStateError;

/// Stable device identifier, chosen by the client on first launch.
/// Case is preserved exactly; two ids differing only in case are distinct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transfer identifier, chosen by the sending device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Laptop,
    Mobile,
    Tablet,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Available,
    Busy,
    Offline,
}

/// A device known to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// A device is reachable when it is not offline and was seen within
    /// the given liveness window ([`crate::constants::LIVENESS_WINDOW`]
    /// unless the hub is configured otherwise).
    pub fn is_reachable(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        let window = chrono::Duration::seconds(window.as_secs() as i64);
        self.status != DeviceStatus::Offline
            && now.signed_duration_since(self.last_seen) <= window
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Transferring,
    Completed,
    Failed,
    Rejected,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// The legal status transitions:
    ///
    /// ```text
    /// pending -> accepted -> transferring -> completed
    /// pending -> rejected
    /// accepted | transferring -> failed
    /// ```
    ///
    /// Terminal states admit no further transition. Self-transitions are
    /// allowed for the non-terminal states so progress-only updates can
    /// re-assert the current status.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Pending, Accepted) | (Pending, Rejected) => true,
            (Accepted, Transferring) | (Accepted, Failed) => true,
            (Transferring, Completed) | (Transferring, Failed) => true,
            // Completed straight from accepted happens for zero-byte files
            // and relay uploads that finish before any progress message.
            (Accepted, Completed) | (Pending, Completed) => true,
            (Pending, Transferring) => true,
            (a, b) if a == b && !a.is_terminal() => true,
            _ => false,
        }
    }

    pub fn transition_to(self, next: TransferStatus) -> Result<TransferStatus, TransferStateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransferStateError::InvalidTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Transferring => "transferring",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// One file flowing from a sender device to a receiver device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: TransferId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub sender_id: DeviceId,
    pub receiver_id: DeviceId,
    pub status: TransferStatus,
    /// 0..=100; equals 100 exactly when status is `completed`.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_window() {
        let now = Utc::now();
        let window = crate::constants::LIVENESS_WINDOW;
        let mut device = Device {
            id: DeviceId::from("abc"),
            name: "Couch laptop".into(),
            kind: DeviceKind::Laptop,
            status: DeviceStatus::Available,
            last_seen: now,
        };
        assert!(device.is_reachable(now, window));

        device.last_seen = now - chrono::Duration::seconds(301);
        assert!(!device.is_reachable(now, window));
        // A wider configured window keeps the same record reachable.
        assert!(device.is_reachable(now, std::time::Duration::from_secs(600)));

        device.last_seen = now;
        device.status = DeviceStatus::Offline;
        assert!(!device.is_reachable(now, window));
    }

    #[test]
    fn test_terminal_states_frozen() {
        use TransferStatus::*;
        for terminal in [Completed, Failed, Rejected] {
            for next in [Pending, Accepted, Transferring, Completed, Failed, Rejected] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be refused"
                );
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use TransferStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Accepted.can_transition_to(Transferring));
        assert!(Transferring.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Failed));
        assert!(Transferring.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Failed));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Transferring.can_transition_to(Accepted));
    }

    #[test]
    fn test_device_wire_shape() {
        let device = Device {
            id: DeviceId::from("d-1"),
            name: "Phone".into(),
            kind: DeviceKind::Mobile,
            status: DeviceStatus::Available,
            last_seen: Utc::now(),
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["type"], "mobile");
        assert_eq!(json["status"], "available");
        assert!(json.get("lastSeen").is_some());
    }
}
