//! The single persistent signaling session between a device and the hub.
//!
//! Owns reconnection, the offline outbound queue, and the heartbeat; hands
//! inbound messages to either the UI (`device-list`, `transfer-offer`) or
//! the transfer engine (everything else).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use landrop_shared::constants::{
    HEARTBEAT_INTERVAL, PONG_DEADLINE, RECONNECT_BACKOFF_CAP, RECONNECT_MAX_ATTEMPTS,
};
use landrop_shared::protocol::SignalMessage;

use crate::config::ClientConfig;
use crate::events::UiNotice;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Send side of the session. Messages sent while disconnected are queued
/// and flushed FIFO on the next open.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SignalMessage>,
    rtt_ms: watch::Receiver<Option<i64>>,
}

impl SessionHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<SignalMessage>,
        rtt_ms: watch::Receiver<Option<i64>>,
    ) -> Self {
        Self { tx, rtt_ms }
    }

    pub fn send(&self, msg: SignalMessage) {
        let _ = self.tx.send(msg);
    }

    /// Round-trip of the most recent heartbeat, once one completed.
    pub fn last_rtt_ms(&self) -> Option<i64> {
        *self.rtt_ms.borrow()
    }
}

/// Why a connected session ended, from the reconnect loop's perspective.
enum SessionEnd {
    /// Server said goodbye (close code 1000/1001); do not reconnect.
    Clean,
    /// Anything else; reconnect with backoff.
    Dirty,
    /// The local handle side was dropped.
    HandleDropped,
}

pub struct SessionClient {
    config: Arc<ClientConfig>,
}

impl SessionClient {
    /// Spawn the session task. Returns the handle plus the two inbound
    /// routes: engine messages and UI notices.
    pub fn spawn(
        config: Arc<ClientConfig>,
    ) -> (
        SessionHandle,
        mpsc::UnboundedReceiver<SignalMessage>,
        mpsc::UnboundedReceiver<UiNotice>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (rtt_tx, rtt_rx) = watch::channel(None);

        let client = SessionClient { config };
        tokio::spawn(client.run(cmd_rx, engine_tx, ui_tx, rtt_tx));

        (SessionHandle::new(cmd_tx, rtt_rx), engine_rx, ui_rx)
    }

    async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<SignalMessage>,
        engine_tx: mpsc::UnboundedSender<SignalMessage>,
        ui_tx: mpsc::UnboundedSender<UiNotice>,
        rtt_tx: watch::Sender<Option<i64>>,
    ) {
        let url = self.config.ws_url();
        let mut queue: VecDeque<SignalMessage> = VecDeque::new();
        let mut attempt: u32 = 0;

        loop {
            match connect_async(&url).await {
                Ok((stream, _)) => {
                    info!(url = %url, "Signaling session open");
                    attempt = 0;
                    let end = self
                        .drive(stream, &mut cmd_rx, &engine_tx, &ui_tx, &rtt_tx, &mut queue)
                        .await;
                    match end {
                        SessionEnd::Clean => {
                            info!("Hub closed the session cleanly");
                            return;
                        }
                        SessionEnd::HandleDropped => return,
                        SessionEnd::Dirty => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Failed to reach the hub");
                }
            }

            attempt += 1;
            if attempt > RECONNECT_MAX_ATTEMPTS {
                warn!(attempts = attempt - 1, "Giving up on the hub");
                return;
            }
            let delay = backoff_delay(attempt);
            debug!(attempt, ?delay, "Reconnecting after backoff");
            if !self.wait_and_queue(delay, &mut cmd_rx, &mut queue).await {
                return;
            }
        }
    }

    /// One connected session, start to finish.
    async fn drive(
        &self,
        stream: WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<SignalMessage>,
        engine_tx: &mpsc::UnboundedSender<SignalMessage>,
        ui_tx: &mpsc::UnboundedSender<UiNotice>,
        rtt_tx: &watch::Sender<Option<i64>>,
        queue: &mut VecDeque<SignalMessage>,
    ) -> SessionEnd {
        let (mut sink, mut source) = stream.split();

        // The hub rebinds presence off the first message, so registration
        // always precedes the queued backlog.
        let register = SignalMessage::DeviceRegister {
            device_id: self.config.device_id.clone(),
            name: self.config.device_name.clone(),
            kind: self.config.device_kind,
        };
        if send_signal(&mut sink, &register).await.is_err() {
            return SessionEnd::Dirty;
        }
        while let Some(msg) = queue.pop_front() {
            if send_signal(&mut sink, &msg).await.is_err() {
                queue.push_front(msg);
                return SessionEnd::Dirty;
            }
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.reset();
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(msg) => {
                        if send_signal(&mut sink, &msg).await.is_err() {
                            queue.push_back(msg);
                            return SessionEnd::Dirty;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::HandleDropped;
                    }
                },

                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match SignalMessage::from_json(&text) {
                            Ok(SignalMessage::Pong { original_timestamp, .. }) => {
                                last_pong = Instant::now();
                                let rtt = Utc::now().timestamp_millis() - original_timestamp;
                                rtt_tx.send_replace(Some(rtt));
                            }
                            Ok(SignalMessage::DeviceList { devices }) => {
                                let _ = ui_tx.send(UiNotice::Devices(devices));
                            }
                            Ok(SignalMessage::TransferOffer(offer)) => {
                                let _ = ui_tx.send(UiNotice::Offer(offer));
                            }
                            Ok(msg) => {
                                let _ = engine_tx.send(msg);
                            }
                            Err(err) => {
                                warn!(error = %err, "Dropping unparseable hub message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return if is_clean_close(frame.as_ref()) {
                            SessionEnd::Clean
                        } else {
                            SessionEnd::Dirty
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "Session read failed");
                        return SessionEnd::Dirty;
                    }
                    None => return SessionEnd::Dirty,
                },

                _ = heartbeat.tick() => {
                    // A half-open session answers nothing; force the
                    // reconnect path instead of waiting forever.
                    if last_pong.elapsed() > PONG_DEADLINE {
                        warn!("No pong within deadline, recycling session");
                        return SessionEnd::Dirty;
                    }
                    let ping = SignalMessage::Ping {
                        timestamp: Utc::now().timestamp_millis(),
                    };
                    if send_signal(&mut sink, &ping).await.is_err() {
                        return SessionEnd::Dirty;
                    }
                }
            }
        }
    }

    /// Sleep out the backoff while still accepting outbound messages into
    /// the queue. Returns false when the handle side is gone.
    async fn wait_and_queue(
        &self,
        delay: Duration,
        cmd_rx: &mut mpsc::UnboundedReceiver<SignalMessage>,
        queue: &mut VecDeque<SignalMessage>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = cmd_rx.recv() => match cmd {
                    Some(msg) => queue.push_back(msg),
                    None => return false,
                },
            }
        }
    }
}

async fn send_signal<S>(sink: &mut S, msg: &SignalMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let Ok(json) = msg.to_json() else {
        return Ok(());
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Close codes 1000 (normal) and 1001 (going away) do not trigger
/// reconnection; everything else does.
fn is_clean_close(frame: Option<&CloseFrame>) -> bool {
    matches!(
        frame.map(|f| f.code),
        Some(CloseCode::Normal) | Some(CloseCode::Away)
    )
}

/// 1 s, 2 s, 4 s, ... capped; `attempt` is the reconnect ordinal
/// (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let exp = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(10));
    exp.min(RECONNECT_BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        // Capped from here on.
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(30), Duration::from_secs(30));
    }

    #[test]
    fn test_clean_close_codes() {
        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let away = CloseFrame {
            code: CloseCode::Away,
            reason: "".into(),
        };
        let abnormal = CloseFrame {
            code: CloseCode::Abnormal,
            reason: "".into(),
        };
        assert!(is_clean_close(Some(&normal)));
        assert!(is_clean_close(Some(&away)));
        assert!(!is_clean_close(Some(&abnormal)));
        // No close frame at all means the TCP stream just died.
        assert!(!is_clean_close(None));
    }
}
