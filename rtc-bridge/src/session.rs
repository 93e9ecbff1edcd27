//! Peer connection session actor
//!
//! One tokio task owns the [`PeerConnection`] core. Controller commands and
//! native notifications share a single queue, so the core never sees two
//! things at once. [`PeerConnectionSession`] is the cloneable handle.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::buffered_sink::EventListener;
use crate::data_channel::{ChannelListener, ChannelMessage};
use crate::dispatch::{Dispatcher, NativeEvent};
use crate::engine::NativeEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::peer_connection::{PeerConnection, SessionSnapshot};
use crate::track::MediaStream;
use bytes::Bytes;
use rtc_bridge_config::BridgeConfig;
use rtc_bridge_logging::session_span;
use rtc_bridge_types::*;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, Instrument};
use uuid::Uuid;

/// First id minted for channels opened by the remote peer
pub const DEFAULT_CHANNEL_ID_BASE: u32 = 10000;

/// Session tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub channel_id_base: u32,
    /// Upper bound on each engine negotiation call
    pub negotiation_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            channel_id_base: DEFAULT_CHANNEL_ID_BASE,
            negotiation_timeout: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            channel_id_base: config.channel_id_base,
            negotiation_timeout: config.negotiation_timeout(),
        }
    }
}

type Reply<T> = oneshot::Sender<BridgeResult<T>>;

pub(crate) enum Envelope {
    Command(Command),
    Native(NativeEvent),
}

pub(crate) enum Command {
    CreateOffer {
        options: Option<OfferOptions>,
        reply: Reply<SessionDescription>,
    },
    CreateAnswer {
        options: Option<OfferOptions>,
        reply: Reply<SessionDescription>,
    },
    SetLocalDescription {
        description: SessionDescription,
        reply: Reply<SessionDescription>,
    },
    SetRemoteDescription {
        description: SessionDescription,
        reply: Reply<SessionDescription>,
    },
    AddIceCandidate {
        candidate: IceCandidate,
        reply: Reply<RemoteDescriptionSnapshot>,
    },
    AddStream {
        stream: MediaStream,
        reply: Reply<bool>,
    },
    RemoveStream {
        stream: MediaStream,
        reply: Reply<bool>,
    },
    Mute {
        request: MuteRequest,
        reply: Reply<()>,
    },
    SwitchCamera {
        stream: MediaStream,
        reply: Reply<()>,
    },
    CreateDataChannel {
        dc_id: u32,
        label: String,
        init: DataChannelInit,
        listener: Option<ChannelListener>,
        reply: Reply<DataChannelInfo>,
    },
    SetDataChannelListener {
        dc_id: u32,
        listener: ChannelListener,
        reply: Reply<usize>,
    },
    SendData {
        dc_id: u32,
        message: ChannelMessage,
        reply: Reply<()>,
    },
    CloseDataChannel {
        dc_id: u32,
        reply: Reply<()>,
    },
    DataChannelInfo {
        dc_id: u32,
        reply: Reply<DataChannelInfo>,
    },
    CreateDtmfSender {
        id: u32,
        track_id: String,
        reply: Reply<()>,
    },
    InsertDtmf {
        id: u32,
        tones: String,
        duration: Duration,
        inter_tone_gap: Duration,
        reply: Reply<()>,
    },
    CloseDtmfSender {
        id: u32,
        reply: Reply<()>,
    },
    GetStats {
        track_id: Option<String>,
        reply: Reply<Vec<StatsReport>>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    LocalStreams {
        reply: Reply<Vec<MediaStream>>,
    },
    RemoteStream {
        stream_id: String,
        reply: Reply<Option<MediaStream>>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::CreateOffer { .. } => "create_offer",
            Command::CreateAnswer { .. } => "create_answer",
            Command::SetLocalDescription { .. } => "set_local_description",
            Command::SetRemoteDescription { .. } => "set_remote_description",
            Command::AddIceCandidate { .. } => "add_ice_candidate",
            Command::AddStream { .. } => "add_stream",
            Command::RemoveStream { .. } => "remove_stream",
            Command::Mute { .. } => "mute",
            Command::SwitchCamera { .. } => "switch_camera",
            Command::CreateDataChannel { .. } => "create_data_channel",
            Command::SetDataChannelListener { .. } => "set_data_channel_listener",
            Command::SendData { .. } => "send_data",
            Command::CloseDataChannel { .. } => "close_data_channel",
            Command::DataChannelInfo { .. } => "data_channel_info",
            Command::CreateDtmfSender { .. } => "create_dtmf_sender",
            Command::InsertDtmf { .. } => "insert_dtmf",
            Command::CloseDtmfSender { .. } => "close_dtmf_sender",
            Command::GetStats { .. } => "get_stats",
            Command::Snapshot { .. } => "snapshot",
            Command::LocalStreams { .. } => "local_streams",
            Command::RemoteStream { .. } => "remote_stream",
            Command::Close { .. } => "close",
        }
    }
}

/// Controller-facing handle to one peer connection session
#[derive(Clone)]
pub struct PeerConnectionSession {
    id: Uuid,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl PeerConnectionSession {
    /// Build the native peer connection and spawn the session task.
    ///
    /// Must be called from within a tokio runtime. `listener` receives every
    /// session event from the first native notification onward.
    pub fn initialize<L>(
        engine: &dyn NativeEngine,
        config: &RtcConfiguration,
        constraints: Option<&OfferOptions>,
        options: SessionOptions,
        listener: L,
    ) -> BridgeResult<Self>
    where
        L: EventListener<SessionEvent> + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| BridgeError::Engine(format!("no async runtime available: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(&tx);
        let constraints = MediaConstraints::from_options(constraints);
        let core = PeerConnection::new(
            engine,
            config,
            &constraints,
            &options,
            dispatcher,
            Box::new(listener),
        )?;

        let id = Uuid::new_v4();
        info!(session_id = %id, "Session started");
        runtime.spawn(run(core, rx).instrument(session_span(id)));

        Ok(Self { id, tx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> BridgeResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope::Command(build(reply)))
            .map_err(|_| BridgeError::ClosedSession)?;
        response.await.map_err(|_| BridgeError::ClosedSession)?
    }

    pub async fn create_offer(&self, options: Option<OfferOptions>) -> BridgeResult<SessionDescription> {
        self.request(|reply| Command::CreateOffer { options, reply }).await
    }

    pub async fn create_answer(&self, options: Option<OfferOptions>) -> BridgeResult<SessionDescription> {
        self.request(|reply| Command::CreateAnswer { options, reply }).await
    }

    /// Resolves to the description the engine committed
    pub async fn set_local_description(&self, description: SessionDescription) -> BridgeResult<SessionDescription> {
        self.request(|reply| Command::SetLocalDescription { description, reply })
            .await
    }

    pub async fn set_remote_description(&self, description: SessionDescription) -> BridgeResult<SessionDescription> {
        self.request(|reply| Command::SetRemoteDescription { description, reply })
            .await
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> BridgeResult<RemoteDescriptionSnapshot> {
        self.request(|reply| Command::AddIceCandidate { candidate, reply }).await
    }

    pub async fn add_stream(&self, stream: MediaStream) -> BridgeResult<bool> {
        self.request(|reply| Command::AddStream { stream, reply }).await
    }

    pub async fn remove_stream(&self, stream: MediaStream) -> BridgeResult<bool> {
        self.request(|reply| Command::RemoveStream { stream, reply }).await
    }

    pub async fn mute(&self, request: MuteRequest) -> BridgeResult<()> {
        self.request(|reply| Command::Mute { request, reply }).await
    }

    pub async fn switch_camera(&self, stream: MediaStream) -> BridgeResult<()> {
        self.request(|reply| Command::SwitchCamera { stream, reply }).await
    }

    pub async fn create_data_channel(
        &self,
        dc_id: u32,
        label: impl Into<String>,
        init: DataChannelInit,
        listener: Option<ChannelListener>,
    ) -> BridgeResult<DataChannelInfo> {
        let label = label.into();
        self.request(|reply| Command::CreateDataChannel {
            dc_id,
            label,
            init,
            listener,
            reply,
        })
        .await
    }

    /// Returns how many buffered events were replayed into `listener`
    pub async fn set_data_channel_listener(&self, dc_id: u32, listener: ChannelListener) -> BridgeResult<usize> {
        self.request(|reply| Command::SetDataChannelListener { dc_id, listener, reply })
            .await
    }

    pub async fn send_text(&self, dc_id: u32, text: impl Into<String>) -> BridgeResult<()> {
        let message = ChannelMessage::Text(text.into());
        self.request(|reply| Command::SendData { dc_id, message, reply }).await
    }

    pub async fn send_binary(&self, dc_id: u32, data: impl Into<Bytes>) -> BridgeResult<()> {
        let message = ChannelMessage::Binary(data.into());
        self.request(|reply| Command::SendData { dc_id, message, reply }).await
    }

    pub async fn close_data_channel(&self, dc_id: u32) -> BridgeResult<()> {
        self.request(|reply| Command::CloseDataChannel { dc_id, reply }).await
    }

    pub async fn data_channel_info(&self, dc_id: u32) -> BridgeResult<DataChannelInfo> {
        self.request(|reply| Command::DataChannelInfo { dc_id, reply }).await
    }

    pub async fn create_dtmf_sender(&self, id: u32, track_id: impl Into<String>) -> BridgeResult<()> {
        let track_id = track_id.into();
        self.request(|reply| Command::CreateDtmfSender { id, track_id, reply })
            .await
    }

    pub async fn insert_dtmf(
        &self,
        id: u32,
        tones: impl Into<String>,
        duration: Duration,
        inter_tone_gap: Duration,
    ) -> BridgeResult<()> {
        let tones = tones.into();
        self.request(|reply| Command::InsertDtmf {
            id,
            tones,
            duration,
            inter_tone_gap,
            reply,
        })
        .await
    }

    pub async fn close_dtmf_sender(&self, id: u32) -> BridgeResult<()> {
        self.request(|reply| Command::CloseDtmfSender { id, reply }).await
    }

    /// Stats for one track, or for the whole connection when `track_id` is `None`
    pub async fn get_stats(&self, track_id: Option<String>) -> BridgeResult<Vec<StatsReport>> {
        self.request(|reply| Command::GetStats { track_id, reply }).await
    }

    pub async fn snapshot(&self) -> BridgeResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn signaling_state(&self) -> BridgeResult<SignalingState> {
        Ok(self.snapshot().await?.signaling_state)
    }

    pub async fn ice_gathering_state(&self) -> BridgeResult<IceGatheringState> {
        Ok(self.snapshot().await?.ice_gathering_state)
    }

    pub async fn ice_connection_state(&self) -> BridgeResult<IceConnectionState> {
        Ok(self.snapshot().await?.ice_connection_state)
    }

    pub async fn local_description(&self) -> BridgeResult<Option<SessionDescription>> {
        Ok(self.snapshot().await?.local_description)
    }

    pub async fn remote_description(&self) -> BridgeResult<Option<SessionDescription>> {
        Ok(self.snapshot().await?.remote_description)
    }

    pub async fn local_streams(&self) -> BridgeResult<Vec<MediaStream>> {
        self.request(|reply| Command::LocalStreams { reply }).await
    }

    pub async fn remote_stream(&self, stream_id: impl Into<String>) -> BridgeResult<Option<MediaStream>> {
        let stream_id = stream_id.into();
        self.request(|reply| Command::RemoteStream { stream_id, reply }).await
    }

    /// Idempotent
    pub async fn close(&self) -> BridgeResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }
}

impl std::fmt::Debug for PeerConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionSession")
            .field("id", &self.id)
            .field("alive", &!self.tx.is_closed())
            .finish()
    }
}

async fn run(mut core: PeerConnection, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Native(event) => {
                debug!(notification = event.name(), "Native notification");
                core.handle_native_event(event);
            }
            Envelope::Command(command) => {
                debug!(command = command.name(), "Command");
                execute(&mut core, command).await;
            }
        }
    }

    // Every handle dropped
    if !core.is_closed() {
        if let Err(e) = core.close() {
            debug!(error = %e, "Close on shutdown failed");
        }
    }
    info!("Session task finished");
}

/// Replies are best-effort: a caller that stopped waiting is not an error.
async fn execute(core: &mut PeerConnection, command: Command) {
    match command {
        Command::CreateOffer { options, reply } => {
            let _ = reply.send(core.create_offer(options).await);
        }
        Command::CreateAnswer { options, reply } => {
            let _ = reply.send(core.create_answer(options).await);
        }
        Command::SetLocalDescription { description, reply } => {
            let _ = reply.send(core.set_local_description(description).await);
        }
        Command::SetRemoteDescription { description, reply } => {
            let _ = reply.send(core.set_remote_description(description).await);
        }
        Command::AddIceCandidate { candidate, reply } => {
            let _ = reply.send(core.add_ice_candidate(candidate));
        }
        Command::AddStream { stream, reply } => {
            let _ = reply.send(core.add_stream(stream));
        }
        Command::RemoveStream { stream, reply } => {
            let _ = reply.send(core.remove_stream(&stream));
        }
        Command::Mute { request, reply } => {
            let _ = reply.send(core.mute(request));
        }
        Command::SwitchCamera { stream, reply } => {
            let _ = reply.send(core.switch_camera(stream));
        }
        Command::CreateDataChannel {
            dc_id,
            label,
            init,
            listener,
            reply,
        } => {
            let _ = reply.send(core.create_data_channel(dc_id, &label, &init, listener));
        }
        Command::SetDataChannelListener { dc_id, listener, reply } => {
            let _ = reply.send(core.set_data_channel_listener(dc_id, listener));
        }
        Command::SendData { dc_id, message, reply } => {
            let _ = reply.send(core.send_data(dc_id, message));
        }
        Command::CloseDataChannel { dc_id, reply } => {
            let _ = reply.send(core.close_data_channel(dc_id));
        }
        Command::DataChannelInfo { dc_id, reply } => {
            let _ = reply.send(core.data_channel_info(dc_id));
        }
        Command::CreateDtmfSender { id, track_id, reply } => {
            let _ = reply.send(core.create_dtmf_sender(id, &track_id));
        }
        Command::InsertDtmf {
            id,
            tones,
            duration,
            inter_tone_gap,
            reply,
        } => {
            let _ = reply.send(core.insert_dtmf(id, &tones, duration, inter_tone_gap));
        }
        Command::CloseDtmfSender { id, reply } => {
            let _ = reply.send(core.close_dtmf_sender(id));
        }
        Command::GetStats { track_id, reply } => {
            let _ = reply.send(core.get_stats(track_id).await);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(Ok(core.snapshot()));
        }
        Command::LocalStreams { reply } => {
            let _ = reply.send(Ok(core.local_streams()));
        }
        Command::RemoteStream { stream_id, reply } => {
            let _ = reply.send(Ok(core.remote_stream(&stream_id)));
        }
        Command::Close { reply } => {
            let _ = reply.send(core.close());
        }
    }
}
