use std::time::Duration;

/// WebSocket path on the hub.
pub const WS_PATH: &str = "/ws";

/// Devices unseen for longer than this are treated as offline.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(300);

/// Data-channel chunk payload size (16 KiB).
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Sender yields for [`CHUNK_YIELD`] after every this many chunks so the
/// data channel buffer can drain.
pub const CHUNK_YIELD_EVERY: usize = 10;
pub const CHUNK_YIELD: Duration = Duration::from_millis(10);

/// Label of the reliable ordered data channel carrying file chunks.
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// Per-packet lifetime cap on the data channel, in milliseconds.
pub const DATA_CHANNEL_PACKET_LIFETIME_MS: u16 = 3000;

/// Deadline for the peer connection to open before falling back to relay.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Public rendezvous (STUN) servers used for NAT traversal by default.
pub const STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Relay upload aborts after this long without inbound body data.
pub const UPLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a single relayed payload (2 GiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Relay entries are deleted this long after a successful download begins.
pub const RELAY_RETAIN_AFTER_DOWNLOAD: Duration = Duration::from_secs(60);

/// Unused relay entries are deleted this long after upload.
pub const RELAY_RETAIN_UNUSED: Duration = Duration::from_secs(30);

/// Window during which repeat completion notices for one transfer are
/// suppressed.
pub const COMPLETE_NOTIFY_WINDOW: Duration = Duration::from_secs(30);

/// Session heartbeat: ping cadence and the pong deadline that declares a
/// half-open session dead.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const PONG_DEADLINE: Duration = Duration::from_secs(60);

/// Reconnect policy: `min(2^attempt * 1s, cap)` for up to the max attempts.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Relay fallback upload: attempt count, backoff cap, per-attempt deadline.
pub const FALLBACK_MAX_ATTEMPTS: u32 = 3;
pub const FALLBACK_BACKOFF_CAP: Duration = Duration::from_secs(8);
pub const FALLBACK_REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Cool-downs clearing the per-transfer duplicate-suppression flags.
pub const FALLBACK_COOLDOWN: Duration = Duration::from_secs(5);
pub const DOWNLOAD_COOLDOWN: Duration = Duration::from_secs(30);

/// `historyFor` default truncation.
pub const HISTORY_LIMIT: usize = 10;

/// Relay upload request headers.
pub const HEADER_FILENAME: &str = "x-filename";
pub const HEADER_RELATIVE_PATH: &str = "x-relative-path";
pub const HEADER_RETRY_COUNT: &str = "x-retry-count";
pub const HEADER_CLIENT_TIMESTAMP: &str = "x-client-timestamp";
pub const HEADER_SENDER_ID: &str = "x-sender-id";
pub const HEADER_RECEIVER_ID: &str = "x-receiver-id";
