//! Per-transfer state machine: offer, accept, negotiate, stream, and the
//! relay fallback when the direct path never opens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use landrop_shared::constants::{
    CHUNK_YIELD, CHUNK_YIELD_EVERY, DOWNLOAD_COOLDOWN, NEGOTIATION_TIMEOUT,
};
use landrop_shared::protocol::{ChannelMessage, SignalMessage, TransferOffer};
use landrop_shared::types::{DeviceId, TransferId};

use crate::chunks::{self, FileAssembly};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{SaveHandler, SavedFile, TransferUpdate};
use crate::peer::{PeerEvent, PeerSession};
use crate::relay::RelayTransport;
use crate::session::SessionHandle;

/// Client-side transfer states. Richer than the hub's lifecycle: the
/// negotiation window is visible here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Connecting,
    Connected,
    Transferring,
    Completed,
    Failed,
    Rejected,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Sender,
    Receiver,
}

/// A file handed to the engine for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub file_name: String,
    pub file_type: String,
    /// Position within a folder batch, when sending one.
    pub relative_path: Option<String>,
    pub data: Bytes,
}

enum EngineCommand {
    Send { offer: TransferOffer, relative_path: Option<String>, data: Bytes },
    Accept { offer: TransferOffer },
    Decline { offer: TransferOffer },
}

enum EngineMsg {
    Hub(SignalMessage),
    Peer(TransferId, PeerEvent),
    NegotiationDeadline(TransferId),
    SenderProgress(TransferId, u8),
    ChunksStreamed(TransferId, Result<(), ClientError>),
    FallbackResolved(TransferId, Result<(), ClientError>),
    DownloadResolved(TransferId, Result<Bytes, ClientError>),
    DownloadGuardExpired(TransferId),
}

/// Commands into the engine; cheap to clone into UI code.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
    device_id: DeviceId,
}

impl EngineHandle {
    /// Offer a file to another device. Returns the transfer id the whole
    /// exchange will be keyed by.
    pub fn send_file(&self, receiver: DeviceId, file: OutgoingFile) -> TransferId {
        let transfer_id = TransferId(Uuid::new_v4().to_string());
        let offer = TransferOffer {
            transfer_id: transfer_id.clone(),
            file_name: file.file_name,
            file_size: file.data.len() as u64,
            file_type: file.file_type,
            sender_id: self.device_id.clone(),
            receiver_id: receiver,
        };
        let _ = self.tx.send(EngineCommand::Send {
            offer,
            relative_path: file.relative_path,
            data: file.data,
        });
        transfer_id
    }

    /// The user accepted an inbound offer the UI surfaced.
    pub fn accept(&self, offer: TransferOffer) {
        let _ = self.tx.send(EngineCommand::Accept { offer });
    }

    /// The user declined; the offer is dropped without further state.
    pub fn decline(&self, offer: TransferOffer) {
        let _ = self.tx.send(EngineCommand::Decline { offer });
    }
}

struct TransferTask {
    offer: TransferOffer,
    role: Role,
    state: TransferState,
    progress: u8,
    /// Sender payload, held until the transfer settles.
    data: Option<Bytes>,
    relative_path: Option<String>,
    peer: Option<PeerSession>,
    assembly: Option<FileAssembly>,
    /// Whether any peer data arrived; a hub `transfer-complete` without
    /// it means the relay path is active.
    peer_data_seen: bool,
    // Sticky duplicate-suppression flags.
    negotiation_started: bool,
    fallback_engaged: bool,
    download_engaged: bool,
    /// Remote candidates that arrived before the peer session existed.
    queued_candidates: Vec<String>,
}

impl TransferTask {
    fn new(offer: TransferOffer, role: Role) -> Self {
        Self {
            offer,
            role,
            state: TransferState::Pending,
            progress: 0,
            data: None,
            relative_path: None,
            peer: None,
            assembly: None,
            peer_data_seen: false,
            negotiation_started: false,
            fallback_engaged: false,
            download_engaged: false,
            queued_candidates: Vec::new(),
        }
    }
}

pub struct TransferEngine {
    config: Arc<ClientConfig>,
    session: SessionHandle,
    relay: RelayTransport,
    save: SaveHandler,
    events: mpsc::UnboundedSender<TransferUpdate>,
    internal_tx: mpsc::UnboundedSender<EngineMsg>,
    tasks: HashMap<TransferId, TransferTask>,
}

impl TransferEngine {
    /// Spawn the engine task. `hub_rx` is the session client's engine
    /// route; the returned receiver carries lifecycle updates for the UI.
    pub fn spawn(
        config: Arc<ClientConfig>,
        session: SessionHandle,
        hub_rx: mpsc::UnboundedReceiver<SignalMessage>,
        save: SaveHandler,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<TransferUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            tx: cmd_tx,
            device_id: config.device_id.clone(),
        };

        let engine = TransferEngine {
            relay: RelayTransport::new(Arc::clone(&config)),
            config,
            session,
            save,
            events: event_tx,
            internal_tx,
            tasks: HashMap::new(),
        };
        tokio::spawn(engine.run(cmd_rx, hub_rx, internal_rx));

        (handle, event_rx)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut hub_rx: mpsc::UnboundedReceiver<SignalMessage>,
        mut internal_rx: mpsc::UnboundedReceiver<EngineMsg>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                msg = hub_rx.recv() => match msg {
                    Some(msg) => self.handle_msg(EngineMsg::Hub(msg)).await,
                    None => break,
                },
                msg = internal_rx.recv() => {
                    // The engine owns a sender, so this never yields None.
                    if let Some(msg) = msg {
                        self.handle_msg(msg).await;
                    }
                },
            }
        }
        debug!("Transfer engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Send { offer, relative_path, data } => {
                let id = offer.transfer_id.clone();
                let mut task = TransferTask::new(offer.clone(), Role::Sender);
                task.data = Some(data);
                task.relative_path = relative_path;
                self.tasks.insert(id.clone(), task);

                info!(transfer = %id, receiver = %offer.receiver_id, "Offering transfer");
                self.session.send(SignalMessage::TransferOffer(offer));
                self.emit(&id);
            }

            EngineCommand::Accept { offer } => {
                let id = offer.transfer_id.clone();
                if self.tasks.contains_key(&id) {
                    debug!(transfer = %id, "Duplicate accept ignored");
                    return;
                }
                self.tasks
                    .insert(id.clone(), TransferTask::new(offer, Role::Receiver));

                info!(transfer = %id, "Accepting transfer");
                self.session.send(SignalMessage::TransferAnswer {
                    transfer_id: id.clone(),
                    accepted: true,
                });
                self.emit(&id);
            }

            EngineCommand::Decline { offer } => {
                info!(transfer = %offer.transfer_id, "Declining transfer");
                self.session.send(SignalMessage::TransferAnswer {
                    transfer_id: offer.transfer_id,
                    accepted: false,
                });
            }
        }
    }

    async fn handle_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Hub(msg) => self.handle_hub(msg).await,
            EngineMsg::Peer(id, event) => self.handle_peer(id, event).await,

            EngineMsg::NegotiationDeadline(id) => {
                let still_connecting = self
                    .tasks
                    .get(&id)
                    .is_some_and(|t| t.role == Role::Sender && t.state == TransferState::Connecting);
                if still_connecting {
                    let cause = ClientError::NegotiationTimeout;
                    info!(transfer = %id, error = %cause, "Falling back to relay");
                    self.trigger_fallback(&id);
                }
            }

            EngineMsg::SenderProgress(id, progress) => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    if !task.state.is_terminal() {
                        task.state = TransferState::Transferring;
                        task.progress = task.progress.max(progress);
                        self.emit(&id);
                    }
                }
            }

            EngineMsg::ChunksStreamed(id, Ok(())) => {
                self.settle(&id, TransferState::Completed, None);
                self.session.send(SignalMessage::TransferComplete {
                    transfer_id: id,
                });
            }
            EngineMsg::ChunksStreamed(id, Err(err)) => {
                warn!(transfer = %id, error = %err, "Chunk stream broke, falling back to relay");
                self.trigger_fallback(&id);
            }

            EngineMsg::FallbackResolved(id, Ok(())) => {
                // The hub completed the record off the upload; only local
                // state still needs to catch up.
                self.settle(&id, TransferState::Completed, None);
            }
            EngineMsg::FallbackResolved(id, Err(err)) => {
                self.fail(&id, err.to_string());
            }

            EngineMsg::DownloadResolved(id, Ok(data)) => {
                let Some(task) = self.tasks.get(&id) else { return };
                if task.state.is_terminal() {
                    return;
                }
                let saved = SavedFile {
                    transfer_id: id.clone(),
                    file_name: task.offer.file_name.clone(),
                    file_type: task.offer.file_type.clone(),
                    relative_path: None,
                    data,
                };
                (self.save)(saved);
                self.settle(&id, TransferState::Completed, None);
            }
            EngineMsg::DownloadResolved(id, Err(err)) => {
                self.fail(&id, format!("relay download failed: {err}"));
            }

            EngineMsg::DownloadGuardExpired(id) => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    if !task.state.is_terminal() {
                        task.download_engaged = false;
                    }
                }
            }
        }
    }

    async fn handle_hub(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::TransferAnswer {
                transfer_id,
                accepted,
            } => {
                let Some(task) = self.tasks.get(&transfer_id) else {
                    debug!(transfer = %transfer_id, "Answer for unknown transfer");
                    return;
                };
                if task.role != Role::Sender || task.state != TransferState::Pending {
                    return;
                }
                if accepted {
                    self.begin_negotiation(&transfer_id).await;
                } else {
                    info!(transfer = %transfer_id, "Receiver declined");
                    self.settle(&transfer_id, TransferState::Rejected, None);
                }
            }

            SignalMessage::WebrtcOffer { transfer_id, offer } => {
                if let Err(err) = self.answer_negotiation(&transfer_id, &offer).await {
                    warn!(transfer = %transfer_id, error = %err, "Refusing negotiation");
                }
            }

            SignalMessage::WebrtcAnswer {
                transfer_id,
                answer,
            } => {
                let Some(task) = self.tasks.get(&transfer_id) else { return };
                let Some(peer) = task.peer.clone() else { return };
                if let Err(err) = peer.apply_answer(&answer).await {
                    warn!(transfer = %transfer_id, error = %err, "Failed to apply answer");
                    self.trigger_fallback(&transfer_id);
                }
            }

            SignalMessage::WebrtcIceCandidate {
                transfer_id,
                candidate,
            } => {
                let Some(task) = self.tasks.get_mut(&transfer_id) else { return };
                match task.peer.clone() {
                    Some(peer) => {
                        if let Err(err) = peer.add_remote_candidate(&candidate).await {
                            debug!(transfer = %transfer_id, error = %err, "Candidate refused");
                        }
                    }
                    None => task.queued_candidates.push(candidate),
                }
            }

            SignalMessage::TransferProgress {
                transfer_id,
                progress,
            } => {
                // The hub's fan-out is the source of truth; the local
                // number is a cache that only moves forward.
                if let Some(task) = self.tasks.get_mut(&transfer_id) {
                    if !task.state.is_terminal() && progress > task.progress {
                        task.progress = progress;
                        self.emit(&transfer_id);
                    }
                }
            }

            SignalMessage::TransferComplete { transfer_id } => {
                let Some(task) = self.tasks.get(&transfer_id) else { return };
                if task.state.is_terminal() || task.role != Role::Receiver {
                    return;
                }
                if task.peer_data_seen {
                    // The direct stream is (or was) delivering; completion
                    // will come from the channel side.
                    return;
                }
                info!(transfer = %transfer_id, "Completion without peer data, pulling from relay");
                self.start_download(&transfer_id);
            }

            SignalMessage::TransferError {
                transfer_id,
                message,
            } => {
                let Some(task) = self.tasks.get(&transfer_id) else { return };
                if !task.state.is_terminal() {
                    self.settle(&transfer_id, TransferState::Failed, Some(message));
                }
            }

            SignalMessage::Error { message } => {
                warn!(message = %message, "Hub reported an error");
            }

            other => {
                debug!(?other, "Ignoring non-engine message");
            }
        }
    }

    async fn handle_peer(&mut self, id: TransferId, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.session.send(SignalMessage::WebrtcIceCandidate {
                    transfer_id: id,
                    candidate,
                });
            }

            PeerEvent::ChannelOpen => {
                let Some(task) = self.tasks.get_mut(&id) else { return };
                if task.state.is_terminal() {
                    return;
                }
                task.state = TransferState::Connected;
                self.emit(&id);

                let Some(task) = self.tasks.get_mut(&id) else { return };
                if task.role == Role::Sender {
                    task.state = TransferState::Transferring;
                    let peer = task.peer.clone();
                    let data = task.data.clone();
                    let offer = task.offer.clone();
                    self.emit(&id);
                    if let (Some(peer), Some(data)) = (peer, data) {
                        self.spawn_chunk_stream(&id, peer, data, offer);
                    }
                }
            }

            PeerEvent::ChannelMessage(msg) => self.handle_channel_message(&id, msg),

            PeerEvent::ConnectionFailed => {
                let Some(task) = self.tasks.get(&id) else { return };
                if task.state.is_terminal() {
                    return;
                }
                match task.role {
                    Role::Sender => {
                        warn!(transfer = %id, "Peer path failed, falling back to relay");
                        self.trigger_fallback(&id);
                    }
                    // The receiver waits: the sender's fallback surfaces
                    // as a hub transfer-complete.
                    Role::Receiver => {
                        debug!(transfer = %id, "Peer path failed, expecting relay handoff");
                    }
                }
            }
        }
    }

    /// Sender: the receiver accepted, open the peer path. Guarded so a
    /// duplicate answer cannot double-negotiate.
    async fn begin_negotiation(&mut self, id: &TransferId) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        if task.negotiation_started {
            debug!(transfer = %id, "Negotiation already started");
            return;
        }
        task.negotiation_started = true;
        task.state = TransferState::Connecting;
        self.emit(id);

        let peer_tx = self.peer_event_route(id);
        match PeerSession::initiate(&self.config.stun_servers, peer_tx).await {
            Ok((peer, offer_sdp)) => {
                self.flush_queued_candidates(id, &peer).await;
                if let Some(task) = self.tasks.get_mut(id) {
                    task.peer = Some(peer);
                }
                self.session.send(SignalMessage::WebrtcOffer {
                    transfer_id: id.clone(),
                    offer: offer_sdp,
                });
                self.schedule(NEGOTIATION_TIMEOUT, EngineMsg::NegotiationDeadline(id.clone()));
            }
            Err(err) => {
                warn!(transfer = %id, error = %err, "Could not start negotiation");
                self.trigger_fallback(id);
            }
        }
    }

    /// Receiver: a `webrtc-offer` arrived. A task only exists after the
    /// user accepted, so an unknown transfer id is refused outright.
    async fn answer_negotiation(
        &mut self,
        id: &TransferId,
        remote_offer: &str,
    ) -> Result<(), ClientError> {
        let Some(task) = self.tasks.get_mut(id) else {
            return Err(ClientError::UnknownTransfer(id.clone()));
        };
        if task.role != Role::Receiver || task.negotiation_started {
            return Ok(());
        }
        task.negotiation_started = true;
        task.state = TransferState::Connecting;
        self.emit(id);

        let peer_tx = self.peer_event_route(id);
        let (peer, answer_sdp) =
            PeerSession::respond(&self.config.stun_servers, remote_offer, peer_tx).await?;
        self.flush_queued_candidates(id, &peer).await;
        if let Some(task) = self.tasks.get_mut(id) {
            task.peer = Some(peer);
        }
        self.session.send(SignalMessage::WebrtcAnswer {
            transfer_id: id.clone(),
            answer: answer_sdp,
        });
        Ok(())
    }

    fn handle_channel_message(&mut self, id: &TransferId, msg: ChannelMessage) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        if task.role != Role::Receiver || task.state.is_terminal() {
            return;
        }
        task.peer_data_seen = true;

        match msg {
            ChannelMessage::Metadata { total_chunks, .. } => {
                task.assembly = Some(FileAssembly::new(total_chunks));
                task.state = TransferState::Transferring;
                self.emit(id);
                if total_chunks == 0 {
                    self.finish_receive(id);
                }
            }
            ChannelMessage::Chunk { index, data } => {
                let Some(assembly) = task.assembly.as_mut() else {
                    warn!(transfer = %id, index, "Chunk before metadata, dropping");
                    return;
                };
                if let Err(err) = assembly.insert(index, data) {
                    self.fail(id, err.to_string());
                    return;
                }
                let progress = assembly.progress();
                let complete = assembly.is_complete();
                task.progress = task.progress.max(progress);
                task.state = TransferState::Transferring;

                self.session.send(SignalMessage::TransferProgress {
                    transfer_id: id.clone(),
                    progress,
                });
                self.emit(id);

                if complete {
                    self.finish_receive(id);
                }
            }
        }
    }

    /// All chunks are in: reassemble, hand off, report completion.
    fn finish_receive(&mut self, id: &TransferId) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        let Some(assembly) = task.assembly.take() else { return };
        let offer = task.offer.clone();

        match assembly.assemble() {
            Ok(data) => {
                info!(transfer = %id, size = data.len(), "File reassembled");
                (self.save)(SavedFile {
                    transfer_id: id.clone(),
                    file_name: offer.file_name,
                    file_type: offer.file_type,
                    relative_path: None,
                    data,
                });
                self.settle(id, TransferState::Completed, None);
                self.session.send(SignalMessage::TransferComplete {
                    transfer_id: id.clone(),
                });
            }
            Err(err) => self.fail(id, err.to_string()),
        }
    }

    fn spawn_chunk_stream(
        &self,
        id: &TransferId,
        peer: PeerSession,
        data: Bytes,
        offer: TransferOffer,
    ) {
        let id = id.clone();
        let session = self.session.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = stream_chunks(&peer, &offer, &data, &session, &internal).await;
            let _ = internal.send(EngineMsg::ChunksStreamed(id, result));
        });
    }

    /// Sender fallback: upload to the hub instead. The lock holds until
    /// the transfer settles, so retriggers cannot race the upload.
    fn trigger_fallback(&mut self, id: &TransferId) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        if task.role != Role::Sender || task.state.is_terminal() || task.fallback_engaged {
            return;
        }
        let Some(data) = task.data.clone() else {
            warn!(transfer = %id, "No payload held for fallback");
            return;
        };
        task.fallback_engaged = true;

        if let Some(peer) = task.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }

        let offer = task.offer.clone();
        let relative_path = task.relative_path.clone();
        let relay = self.relay.clone();
        let internal = self.internal_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = relay.upload(&offer, relative_path.as_deref(), data).await;
            let _ = internal.send(EngineMsg::FallbackResolved(id, result));
        });
    }

    /// Receiver: pull the relayed payload, at most once per cool-down.
    fn start_download(&mut self, id: &TransferId) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        if task.download_engaged {
            debug!(transfer = %id, "Download already in flight");
            return;
        }
        task.download_engaged = true;
        self.schedule(DOWNLOAD_COOLDOWN, EngineMsg::DownloadGuardExpired(id.clone()));

        let relay = self.relay.clone();
        let internal = self.internal_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = relay.download(&id).await;
            let _ = internal.send(EngineMsg::DownloadResolved(id, result));
        });
    }

    /// Route for a transfer's peer events into the engine loop.
    fn peer_event_route(&self, id: &TransferId) -> mpsc::UnboundedSender<PeerEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let internal = self.internal_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal.send(EngineMsg::Peer(id.clone(), event)).is_err() {
                    break;
                }
            }
        });
        tx
    }

    async fn flush_queued_candidates(&mut self, id: &TransferId, peer: &PeerSession) {
        let queued = match self.tasks.get_mut(id) {
            Some(task) => std::mem::take(&mut task.queued_candidates),
            None => return,
        };
        for candidate in queued {
            if let Err(err) = peer.add_remote_candidate(&candidate).await {
                debug!(transfer = %id, error = %err, "Queued candidate refused");
            }
        }
    }

    fn schedule(&self, delay: Duration, msg: EngineMsg) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    fn fail(&mut self, id: &TransferId, reason: String) {
        let already_terminal = self
            .tasks
            .get(id)
            .is_none_or(|t| t.state.is_terminal());
        if already_terminal {
            return;
        }
        self.settle(id, TransferState::Failed, Some(reason.clone()));
        self.session.send(SignalMessage::TransferError {
            transfer_id: id.clone(),
            message: reason,
        });
    }

    /// Move a transfer to a terminal state exactly once and release its
    /// resources. Later terminal signals are ignored.
    fn settle(&mut self, id: &TransferId, state: TransferState, message: Option<String>) {
        let Some(task) = self.tasks.get_mut(id) else { return };
        if task.state.is_terminal() {
            return;
        }
        task.state = state;
        if state == TransferState::Completed {
            task.progress = 100;
        }
        task.data = None;
        task.assembly = None;
        if let Some(peer) = task.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }

        let update = TransferUpdate {
            transfer_id: id.clone(),
            state,
            progress: task.progress,
            message,
        };
        info!(transfer = %id, state = ?state, "Transfer settled");
        let _ = self.events.send(update);
    }

    fn emit(&self, id: &TransferId) {
        if let Some(task) = self.tasks.get(id) {
            let _ = self.events.send(TransferUpdate {
                transfer_id: id.clone(),
                state: task.state,
                progress: task.progress,
                message: None,
            });
        }
    }
}

/// Metadata first, then the chunks in order, yielding periodically so the
/// channel can drain. Progress goes to the hub after every chunk.
async fn stream_chunks(
    peer: &PeerSession,
    offer: &TransferOffer,
    data: &Bytes,
    session: &SessionHandle,
    internal: &mpsc::UnboundedSender<EngineMsg>,
) -> Result<(), ClientError> {
    let id = &offer.transfer_id;
    peer.send(&chunks::metadata_for(&offer.file_name, &offer.file_type, data))
        .await?;

    let total = chunks::chunk_count(data.len() as u64);
    for (index, chunk) in chunks::split(data) {
        peer.send(&ChannelMessage::Chunk {
            index,
            data: chunk.to_vec(),
        })
        .await?;

        let progress = (((index + 1) as f64 / total as f64) * 100.0).round() as u8;
        session.send(SignalMessage::TransferProgress {
            transfer_id: id.clone(),
            progress,
        });
        let _ = internal.send(EngineMsg::SenderProgress(id.clone(), progress));

        if (index as usize + 1) % CHUNK_YIELD_EVERY == 0 {
            tokio::time::sleep(CHUNK_YIELD).await;
        }
    }

    Ok(())
}
