use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use landrop_shared::error::ProtocolError;
use landrop_shared::protocol::{SignalMessage, TransferOffer};
use landrop_shared::types::{DeviceId, Transfer, TransferId, TransferStatus};

use crate::error::ServerError;
use crate::presence::{DevicePatch, PresenceRegistry};
use crate::relay::RelayBuffer;
use crate::transfers::{TransferPatch, TransferStore};

/// What the writer task pulls off a session's mailbox.
#[derive(Debug)]
pub enum OutboundFrame {
    Signal(SignalMessage),
    /// Sent when a newer session claims the same device id.
    Close,
}

/// The send side of one connected session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session: Uuid,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl SessionHandle {
    fn send(&self, msg: SignalMessage) -> bool {
        self.tx.send(OutboundFrame::Signal(msg)).is_ok()
    }

    fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }
}

/// Device id -> live session. A device binds at most one session; binding
/// replaces and closes the previous one atomically under the map lock.
#[derive(Debug, Default)]
pub struct SessionMap {
    by_device: Mutex<HashMap<DeviceId, SessionHandle>>,
}

impl SessionMap {
    /// Close-old-then-insert-new in one lock acquisition.
    pub async fn bind(&self, device: DeviceId, handle: SessionHandle) {
        let mut map = self.by_device.lock().await;
        if let Some(old) = map.insert(device.clone(), handle) {
            info!(device = %device, "Evicting prior session for re-registered device");
            old.close();
        }
    }

    /// Remove the binding only if it still points at this session; the
    /// close of an evicted session must not unbind its successor.
    pub async fn unbind_if(&self, device: &DeviceId, session: Uuid) -> bool {
        let mut map = self.by_device.lock().await;
        if map.get(device).is_some_and(|h| h.session == session) {
            map.remove(device);
            true
        } else {
            false
        }
    }

    /// Forward a message; unroutable recipients are ignored silently.
    pub async fn send_to(&self, device: &DeviceId, msg: SignalMessage) -> bool {
        let map = self.by_device.lock().await;
        match map.get(device) {
            Some(handle) => handle.send(msg),
            None => false,
        }
    }

    pub async fn bound_devices(&self) -> Vec<DeviceId> {
        self.by_device.lock().await.keys().cloned().collect()
    }
}

/// The signaling hub: routes messages between bound sessions and drives
/// transfer state through the shared stores.
pub struct Hub {
    pub registry: Arc<PresenceRegistry>,
    pub store: Arc<TransferStore>,
    pub relay: Arc<RelayBuffer>,
    pub sessions: SessionMap,
}

/// Per-connection state threaded through the dispatcher.
struct SessionCtx {
    session: Uuid,
    device: Option<DeviceId>,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl SessionCtx {
    fn reply(&self, msg: SignalMessage) {
        let _ = self.tx.send(OutboundFrame::Signal(msg));
    }

    fn reply_error(&self, message: impl Into<String>) {
        self.reply(SignalMessage::Error {
            message: message.into(),
        });
    }
}

impl Hub {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        store: Arc<TransferStore>,
        relay: Arc<RelayBuffer>,
    ) -> Self {
        Self {
            registry,
            store,
            relay,
            sessions: SessionMap::default(),
        }
    }

    /// Drive one WebSocket session to completion.
    pub async fn run_session(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    OutboundFrame::Signal(msg) => {
                        let Ok(json) = msg.to_json() else { continue };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let mut ctx = SessionCtx {
            session: Uuid::new_v4(),
            device: None,
            tx,
        };
        debug!(session = %ctx.session, "Signaling session opened");

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                    Ok(msg) => self.dispatch(&mut ctx, msg).await,
                    // An unknown discriminant on an otherwise well-formed
                    // object is logged and dropped; everything else gets
                    // a single error reply. Neither closes the session.
                    Err(err) => match unknown_message_type(&text) {
                        Some(kind) => {
                            warn!(session = %ctx.session, kind = %kind, "Unknown message type");
                        }
                        None => {
                            debug!(session = %ctx.session, error = %err, "Malformed message");
                            ctx.reply_error(format!("malformed message: {err}"));
                        }
                    },
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(Message::Binary(_)) => {
                    let err = ProtocolError::BinaryFrame;
                    debug!(session = %ctx.session, error = %err, "Binary frame rejected");
                    ctx.reply_error(err.to_string());
                }
                // Transport pings are answered by the WebSocket layer.
                Ok(_) => {}
            }
        }

        self.finish_session(&ctx).await;
        writer.abort();
        debug!(session = %ctx.session, "Signaling session closed");
    }

    /// Session close: release the binding, mark the device offline, and
    /// tell everyone else.
    async fn finish_session(&self, ctx: &SessionCtx) {
        let Some(device) = &ctx.device else { return };
        if self.sessions.unbind_if(device, ctx.session).await {
            self.registry.mark_offline(device).await;
            self.broadcast_device_list().await;
        }
    }

    async fn dispatch(self: &Arc<Self>, ctx: &mut SessionCtx, msg: SignalMessage) {
        match msg {
            SignalMessage::DeviceRegister {
                device_id,
                name,
                kind,
            } => {
                self.registry.register(device_id.clone(), name, kind).await;
                self.sessions
                    .bind(
                        device_id.clone(),
                        SessionHandle {
                            session: ctx.session,
                            tx: ctx.tx.clone(),
                        },
                    )
                    .await;
                ctx.device = Some(device_id.clone());

                ctx.reply(SignalMessage::DeviceList {
                    devices: self.registry.list_reachable(Some(&device_id)).await,
                });
                self.broadcast_device_list().await;
            }

            SignalMessage::DeviceUpdate { name, status } => {
                let Some(device) = ctx.device.clone() else {
                    ctx.reply_error("register before sending device-update");
                    return;
                };
                self.registry
                    .update(&device, DevicePatch { name, status })
                    .await;
                self.broadcast_device_list().await;
            }

            SignalMessage::TransferOffer(offer) => {
                let Some(device) = ctx.device.clone() else {
                    ctx.reply_error("register before offering a transfer");
                    return;
                };
                if offer.sender_id != device {
                    ctx.reply_error("transfer-offer sender must match the registered device");
                    return;
                }

                match self.store.create(transfer_from_offer(&offer)).await {
                    Ok(_) => {}
                    // A re-offer after reconnect is forwarded again; the
                    // record itself is left untouched.
                    Err(ServerError::TransferExists(_)) => {
                        debug!(transfer = %offer.transfer_id, "Re-offer for existing transfer");
                    }
                    Err(err) => {
                        warn!(transfer = %offer.transfer_id, error = %err, "Offer refused");
                        ctx.reply_error(err.to_string());
                        return;
                    }
                }

                let receiver = offer.receiver_id.clone();
                self.sessions
                    .send_to(&receiver, SignalMessage::TransferOffer(offer))
                    .await;
            }

            SignalMessage::TransferAnswer {
                transfer_id,
                accepted,
            } => {
                // Only the addressed receiver may answer; anyone else
                // could otherwise authorize the relay download.
                let Some(existing) = self.lookup(&transfer_id).await else { return };
                if ctx.device.as_ref() != Some(&existing.receiver_id) {
                    warn!(transfer = %transfer_id, "Answer from a device that is not the receiver");
                    return;
                }

                let status = if accepted {
                    TransferStatus::Accepted
                } else {
                    TransferStatus::Rejected
                };
                let Some(transfer) = self
                    .apply_patch(&transfer_id, TransferPatch { status: Some(status), progress: None })
                    .await
                else {
                    return;
                };

                if accepted {
                    self.relay.mark_accepted(transfer_id.clone()).await;
                }
                self.sessions
                    .send_to(
                        &transfer.sender_id,
                        SignalMessage::TransferAnswer {
                            transfer_id,
                            accepted,
                        },
                    )
                    .await;
            }

            SignalMessage::WebrtcOffer { transfer_id, offer } => {
                let Some(transfer) = self.lookup(&transfer_id).await else { return };
                // Only the transfer's sender opens negotiation; a spoofed
                // offer would hijack the receiver's peer session.
                if ctx.device.as_ref() != Some(&transfer.sender_id) {
                    warn!(transfer = %transfer_id, "webrtc-offer from a device that is not the sender");
                    return;
                }
                self.sessions
                    .send_to(
                        &transfer.receiver_id,
                        SignalMessage::WebrtcOffer { transfer_id, offer },
                    )
                    .await;
            }

            SignalMessage::WebrtcAnswer {
                transfer_id,
                answer,
            } => {
                let Some(transfer) = self.lookup(&transfer_id).await else { return };
                if ctx.device.as_ref() != Some(&transfer.receiver_id) {
                    warn!(transfer = %transfer_id, "webrtc-answer from a device that is not the receiver");
                    return;
                }
                self.sessions
                    .send_to(
                        &transfer.sender_id,
                        SignalMessage::WebrtcAnswer {
                            transfer_id,
                            answer,
                        },
                    )
                    .await;
            }

            SignalMessage::WebrtcIceCandidate {
                transfer_id,
                candidate,
            } => {
                let Some(transfer) = self.lookup(&transfer_id).await else { return };
                let Some(target) = other_endpoint(&transfer, ctx.device.as_ref()) else {
                    warn!(transfer = %transfer_id, "Candidate from a device outside the transfer");
                    return;
                };
                self.sessions
                    .send_to(
                        &target,
                        SignalMessage::WebrtcIceCandidate {
                            transfer_id,
                            candidate,
                        },
                    )
                    .await;
            }

            SignalMessage::TransferProgress {
                transfer_id,
                progress,
            } => {
                let status = if progress < 100 {
                    TransferStatus::Transferring
                } else {
                    TransferStatus::Completed
                };
                let Some(transfer) = self
                    .apply_patch(
                        &transfer_id,
                        TransferPatch {
                            status: Some(status),
                            progress: Some(progress),
                        },
                    )
                    .await
                else {
                    return;
                };

                let update = SignalMessage::TransferProgress {
                    transfer_id,
                    progress: transfer.progress,
                };
                self.sessions.send_to(&transfer.sender_id, update.clone()).await;
                self.sessions.send_to(&transfer.receiver_id, update).await;
            }

            SignalMessage::TransferComplete { transfer_id } => {
                let Some(transfer) = self
                    .apply_patch(
                        &transfer_id,
                        TransferPatch {
                            status: Some(TransferStatus::Completed),
                            progress: Some(100),
                        },
                    )
                    .await
                else {
                    return;
                };
                self.notify_transfer_complete(&transfer.receiver_id, &transfer_id)
                    .await;
            }

            SignalMessage::TransferError {
                transfer_id,
                message,
            } => {
                let Some(transfer) = self
                    .apply_patch(
                        &transfer_id,
                        TransferPatch {
                            status: Some(TransferStatus::Failed),
                            progress: None,
                        },
                    )
                    .await
                else {
                    return;
                };

                let notice = SignalMessage::TransferError {
                    transfer_id,
                    message,
                };
                self.sessions.send_to(&transfer.sender_id, notice.clone()).await;
                self.sessions.send_to(&transfer.receiver_id, notice).await;
            }

            SignalMessage::Ping { timestamp } => {
                ctx.reply(SignalMessage::Pong {
                    timestamp: Utc::now().timestamp_millis(),
                    original_timestamp: timestamp,
                });
            }

            // Server-originated kinds arriving inbound are dropped without
            // closing the session.
            SignalMessage::DeviceList { .. }
            | SignalMessage::Pong { .. }
            | SignalMessage::Error { .. } => {
                warn!(session = %ctx.session, "Dropping unexpected inbound message kind");
            }
        }
    }

    /// Emit at most one `transfer-complete` to the receiver per transfer.
    /// Shared by the signaling path and the relay upload path.
    pub async fn notify_transfer_complete(&self, receiver: &DeviceId, transfer_id: &TransferId) {
        if !self.relay.should_notify_complete(transfer_id).await {
            debug!(transfer = %transfer_id, "Suppressing duplicate completion notice");
            return;
        }
        self.sessions
            .send_to(
                receiver,
                SignalMessage::TransferComplete {
                    transfer_id: transfer_id.clone(),
                },
            )
            .await;
    }

    /// Each bound device gets the reachable list without its own record.
    pub async fn broadcast_device_list(&self) {
        for device in self.sessions.bound_devices().await {
            let devices = self.registry.list_reachable(Some(&device)).await;
            self.sessions
                .send_to(&device, SignalMessage::DeviceList { devices })
                .await;
        }
    }

    async fn lookup(&self, id: &TransferId) -> Option<Transfer> {
        let transfer = self.store.get(id).await;
        if transfer.is_none() {
            debug!(transfer = %id, "Dropping message for unknown transfer");
        }
        transfer
    }

    /// Store update where failure means log-and-drop, per the hub's
    /// failure model. A terminal record swallows late updates silently.
    async fn apply_patch(&self, id: &TransferId, patch: TransferPatch) -> Option<Transfer> {
        match self.store.update(id, patch).await {
            Ok(transfer) => Some(transfer),
            Err(err) => {
                debug!(transfer = %id, error = %err, "Dropping update");
                None
            }
        }
    }
}

fn transfer_from_offer(offer: &TransferOffer) -> Transfer {
    Transfer {
        id: offer.transfer_id.clone(),
        file_name: offer.file_name.clone(),
        file_size: offer.file_size,
        file_type: offer.file_type.clone(),
        sender_id: offer.sender_id.clone(),
        receiver_id: offer.receiver_id.clone(),
        status: TransferStatus::Pending,
        progress: 0,
        created_at: Utc::now(),
        completed_at: None,
    }
}

const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "device-register",
    "device-update",
    "device-list",
    "transfer-offer",
    "transfer-answer",
    "webrtc-offer",
    "webrtc-answer",
    "webrtc-ice-candidate",
    "transfer-progress",
    "transfer-complete",
    "transfer-error",
    "ping",
    "pong",
    "error",
];

/// When a frame is valid JSON carrying an unrecognized `type` tag, return
/// that tag; such frames are dropped rather than answered. A known tag
/// with bad fields stays a malformed message.
fn unknown_message_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let tag = value.get("type")?.as_str()?;
    if KNOWN_MESSAGE_TYPES.contains(&tag) {
        None
    } else {
        Some(tag.to_string())
    }
}

/// The endpoint a transfer message should be forwarded to, given who sent
/// it. `None` when the sender is not part of the transfer.
fn other_endpoint(transfer: &Transfer, from: Option<&DeviceId>) -> Option<DeviceId> {
    match from {
        Some(d) if d == &transfer.sender_id => Some(transfer.receiver_id.clone()),
        Some(d) if d == &transfer.receiver_id => Some(transfer.sender_id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landrop_shared::types::DeviceKind;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            Arc::new(PresenceRegistry::default()),
            Arc::new(TransferStore::new()),
            Arc::new(RelayBuffer::new()),
        ))
    }

    /// A fake connected session: context plus the frames it would be sent.
    fn session() -> (SessionCtx, UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionCtx {
                session: Uuid::new_v4(),
                device: None,
                tx,
            },
            rx,
        )
    }

    async fn register(hub: &Arc<Hub>, ctx: &mut SessionCtx, id: &str) {
        hub.dispatch(
            ctx,
            SignalMessage::DeviceRegister {
                device_id: DeviceId::from(id),
                name: id.to_uppercase(),
                kind: DeviceKind::Laptop,
            },
        )
        .await;
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn signals(frames: Vec<OutboundFrame>) -> Vec<SignalMessage> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                OutboundFrame::Signal(msg) => Some(msg),
                OutboundFrame::Close => None,
            })
            .collect()
    }

    fn offer(id: &str, sender: &str, receiver: &str) -> TransferOffer {
        TransferOffer {
            transfer_id: TransferId::from(id),
            file_name: "clip.mp4".into(),
            file_size: 48 * 1024,
            file_type: "video/mp4".into(),
            sender_id: DeviceId::from(sender),
            receiver_id: DeviceId::from(receiver),
        }
    }

    #[tokio::test]
    async fn test_register_sends_list_excluding_self() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, mut b_rx) = session();

        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;

        // B's direct reply must not contain B itself.
        let frames = signals(drain(&mut b_rx));
        let SignalMessage::DeviceList { devices } = &frames[0] else {
            panic!("expected device-list, got {frames:?}");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id.as_str(), "a");

        // A eventually hears about B through the broadcast.
        let frames = signals(drain(&mut a_rx));
        let SignalMessage::DeviceList { devices } = frames.last().unwrap() else {
            panic!("expected device-list");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_duplicate_registration_evicts_prior_session() {
        let hub = hub();
        let (mut s1, mut s1_rx) = session();
        let (mut s2, mut s2_rx) = session();

        register(&hub, &mut s1, "x").await;
        drain(&mut s1_rx);
        register(&hub, &mut s2, "x").await;

        let s1_frames = drain(&mut s1_rx);
        assert!(
            s1_frames.iter().any(|f| matches!(f, OutboundFrame::Close)),
            "prior session must be closed"
        );
        // The new session got a device list (empty: only itself exists).
        let frames = signals(drain(&mut s2_rx));
        assert!(matches!(&frames[0], SignalMessage::DeviceList { devices } if devices.is_empty()));

        // Closing the evicted session must not unbind the new one.
        hub.finish_session(&s1).await;
        assert!(
            hub.sessions
                .send_to(&DeviceId::from("x"), SignalMessage::Ping { timestamp: 0 })
                .await
        );
    }

    #[tokio::test]
    async fn test_offer_creates_pending_and_forwards() {
        let hub = hub();
        let (mut a, _a_rx) = session();
        let (mut b, mut b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        drain(&mut b_rx);

        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;

        let stored = hub.store.get(&TransferId::from("t1")).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);

        let frames = signals(drain(&mut b_rx));
        assert!(matches!(&frames[0], SignalMessage::TransferOffer(o) if o.transfer_id.as_str() == "t1"));
    }

    #[tokio::test]
    async fn test_offer_to_offline_receiver_is_stored() {
        let hub = hub();
        let (mut a, _a_rx) = session();
        register(&hub, &mut a, "a").await;

        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;

        // Receiver has never connected; the record still exists for its
        // next inventory poll.
        let active = hub.store.active_for(&DeviceId::from("b")).await;
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_answer_routes_to_sender_and_authorizes_download() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, mut b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.dispatch(
            &mut b,
            SignalMessage::TransferAnswer {
                transfer_id: TransferId::from("t1"),
                accepted: true,
            },
        )
        .await;

        let frames = signals(drain(&mut a_rx));
        assert!(matches!(
            &frames[0],
            SignalMessage::TransferAnswer { accepted: true, .. }
        ));
        assert!(hub.relay.is_accepted(&TransferId::from("t1")).await);
        assert_eq!(
            hub.store.get(&TransferId::from("t1")).await.unwrap().status,
            TransferStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_rejection_leaves_no_download_authorization() {
        let hub = hub();
        let (mut a, _a_rx) = session();
        let (mut b, _b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;

        hub.dispatch(
            &mut b,
            SignalMessage::TransferAnswer {
                transfer_id: TransferId::from("t1"),
                accepted: false,
            },
        )
        .await;

        assert!(!hub.relay.is_accepted(&TransferId::from("t1")).await);
        assert_eq!(
            hub.store.get(&TransferId::from("t1")).await.unwrap().status,
            TransferStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_webrtc_offer_forwards_only_from_sender() {
        let hub = hub();
        let (mut a, _a_rx) = session();
        let (mut b, mut b_rx) = session();
        let (mut c, _c_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        register(&hub, &mut c, "c").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        drain(&mut b_rx);

        // A third party that learned the transfer id cannot hijack the
        // negotiation.
        hub.dispatch(
            &mut c,
            SignalMessage::WebrtcOffer {
                transfer_id: TransferId::from("t1"),
                offer: "spoofed".into(),
            },
        )
        .await;
        assert!(drain(&mut b_rx).is_empty());

        hub.dispatch(
            &mut a,
            SignalMessage::WebrtcOffer {
                transfer_id: TransferId::from("t1"),
                offer: "genuine".into(),
            },
        )
        .await;
        let frames = signals(drain(&mut b_rx));
        assert!(matches!(
            &frames[0],
            SignalMessage::WebrtcOffer { offer, .. } if offer == "genuine"
        ));
    }

    #[tokio::test]
    async fn test_webrtc_answer_forwards_only_from_receiver() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, _b_rx) = session();
        let (mut c, _c_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        register(&hub, &mut c, "c").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        drain(&mut a_rx);

        hub.dispatch(
            &mut c,
            SignalMessage::WebrtcAnswer {
                transfer_id: TransferId::from("t1"),
                answer: "spoofed".into(),
            },
        )
        .await;
        assert!(drain(&mut a_rx).is_empty());

        hub.dispatch(
            &mut b,
            SignalMessage::WebrtcAnswer {
                transfer_id: TransferId::from("t1"),
                answer: "genuine".into(),
            },
        )
        .await;
        let frames = signals(drain(&mut a_rx));
        assert!(matches!(
            &frames[0],
            SignalMessage::WebrtcAnswer { answer, .. } if answer == "genuine"
        ));
    }

    #[tokio::test]
    async fn test_ice_candidate_routes_to_other_endpoint() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, mut b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.dispatch(
            &mut b,
            SignalMessage::WebrtcIceCandidate {
                transfer_id: TransferId::from("t1"),
                candidate: "{\"candidate\":\"...\"}".into(),
            },
        )
        .await;

        let frames = signals(drain(&mut a_rx));
        assert!(matches!(&frames[0], SignalMessage::WebrtcIceCandidate { .. }));
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_progress_fans_out_to_both_endpoints() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, mut b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        hub.dispatch(
            &mut b,
            SignalMessage::TransferAnswer {
                transfer_id: TransferId::from("t1"),
                accepted: true,
            },
        )
        .await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.dispatch(
            &mut a,
            SignalMessage::TransferProgress {
                transfer_id: TransferId::from("t1"),
                progress: 33,
            },
        )
        .await;

        for rx in [&mut a_rx, &mut b_rx] {
            let frames = signals(drain(rx));
            assert!(matches!(
                &frames[0],
                SignalMessage::TransferProgress { progress: 33, .. }
            ));
        }
        assert_eq!(
            hub.store.get(&TransferId::from("t1")).await.unwrap().status,
            TransferStatus::Transferring
        );
    }

    #[tokio::test]
    async fn test_complete_notice_is_deduplicated() {
        let hub = hub();
        let (mut a, _a_rx) = session();
        let (mut b, mut b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;
        hub.dispatch(
            &mut b,
            SignalMessage::TransferAnswer {
                transfer_id: TransferId::from("t1"),
                accepted: true,
            },
        )
        .await;
        drain(&mut b_rx);

        hub.dispatch(
            &mut a,
            SignalMessage::TransferComplete {
                transfer_id: TransferId::from("t1"),
            },
        )
        .await;
        hub.dispatch(
            &mut a,
            SignalMessage::TransferComplete {
                transfer_id: TransferId::from("t1"),
            },
        )
        .await;

        let completions = signals(drain(&mut b_rx))
            .into_iter()
            .filter(|m| matches!(m, SignalMessage::TransferComplete { .. }))
            .count();
        assert_eq!(completions, 1);

        let stored = hub.store.get(&TransferId::from("t1")).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
        assert_eq!(stored.progress, 100);
    }

    #[tokio::test]
    async fn test_ping_pong_echoes_timestamp() {
        let hub = hub();
        let (mut a, mut a_rx) = session();

        hub.dispatch(&mut a, SignalMessage::Ping { timestamp: 42 }).await;

        let frames = signals(drain(&mut a_rx));
        assert!(matches!(
            &frames[0],
            SignalMessage::Pong {
                original_timestamp: 42,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unbound_offer_gets_error_reply() {
        let hub = hub();
        let (mut a, mut a_rx) = session();

        hub.dispatch(&mut a, SignalMessage::TransferOffer(offer("t1", "a", "b")))
            .await;

        let frames = signals(drain(&mut a_rx));
        assert!(matches!(&frames[0], SignalMessage::Error { .. }));
        assert!(hub.store.get(&TransferId::from("t1")).await.is_none());
    }

    #[test]
    fn test_unknown_type_classification() {
        assert_eq!(
            unknown_message_type(r#"{"type":"file-preview","data":1}"#).as_deref(),
            Some("file-preview")
        );
        // Known tag with missing fields is malformed, not unknown.
        assert_eq!(unknown_message_type(r#"{"type":"ping"}"#), None);
        assert_eq!(unknown_message_type("{not json"), None);
        assert_eq!(unknown_message_type(r#"{"kind":"ping"}"#), None);
    }

    #[tokio::test]
    async fn test_session_close_marks_offline_and_broadcasts() {
        let hub = hub();
        let (mut a, mut a_rx) = session();
        let (mut b, _b_rx) = session();
        register(&hub, &mut a, "a").await;
        register(&hub, &mut b, "b").await;
        drain(&mut a_rx);

        hub.finish_session(&b).await;

        let frames = signals(drain(&mut a_rx));
        let SignalMessage::DeviceList { devices } = frames.last().unwrap() else {
            panic!("expected device-list");
        };
        assert!(devices.is_empty());
    }
}
