//! Peer connection core
//!
//! Owns the native peer connection and every sub-object hanging off it.
//! This is the only consumer of native notifications and the only producer
//! of the session event stream. It runs exclusively on the session task.
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
use crate::data_channel::{ChannelListener, ChannelMessage, DataChannelRegistry};
use crate::dispatch::{Dispatcher, NativeEvent};
use crate::dtmf::DtmfSenderRegistry;
use crate::engine::{EngineResult, NativeEngine, NativePeerConnection, NativeRtpSender};
use crate::error::{BridgeError, BridgeResult};
use crate::session::SessionOptions;
use crate::track::{MediaStream, MediaStreamTrack};
use rtc_bridge_types::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Point-in-time view of the session's states and descriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub signaling_state: SignalingState,
    pub ice_gathering_state: IceGatheringState,
    pub ice_connection_state: IceConnectionState,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
}

/// Await an engine call, bounded by the optional timeout
async fn bounded<T, F>(operation: &'static str, limit: Option<Duration>, call: F) -> BridgeResult<EngineResult<T>>
where
    F: Future<Output = EngineResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            warn!(operation, ?limit, "Engine call timed out");
            BridgeError::Timeout(limit)
        }),
        None => Ok(call.await),
    }
}

async fn negotiate<T, F>(operation: &'static str, limit: Option<Duration>, call: F) -> BridgeResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    bounded(operation, limit, call).await?.map_err(|e| {
        warn!(operation, error = %e, "Negotiation failed");
        BridgeError::Negotiation(format!("{} failed: {}", operation, e))
    })
}

pub(crate) struct PeerConnection {
    /// `None` once closed
    native: Option<Arc<dyn NativePeerConnection>>,
    signaling_state: SignalingState,
    ice_gathering_state: IceGatheringState,
    ice_connection_state: IceConnectionState,
    data_channels: DataChannelRegistry,
    dtmf_senders: DtmfSenderRegistry,
    local_streams: Vec<MediaStream>,
    remote_streams: HashMap<String, MediaStream>,
    dispatcher: Dispatcher,
    listener: Box<dyn EventListener<SessionEvent>>,
    negotiation_timeout: Option<Duration>,
}

impl PeerConnection {
    pub fn new(
        engine: &dyn NativeEngine,
        config: &RtcConfiguration,
        constraints: &MediaConstraints,
        options: &SessionOptions,
        dispatcher: Dispatcher,
        listener: Box<dyn EventListener<SessionEvent>>,
    ) -> BridgeResult<Self> {
        let native = engine.create_peer_connection(config, constraints, Arc::new(dispatcher.clone()))?;

        info!(
            ice_servers = config.ice_servers.len(),
            policy = ?config.ice_transport_policy,
            "Peer connection created"
        );

        Ok(Self {
            native: Some(native),
            signaling_state: SignalingState::Stable,
            ice_gathering_state: IceGatheringState::New,
            ice_connection_state: IceConnectionState::New,
            data_channels: DataChannelRegistry::new(options.channel_id_base),
            dtmf_senders: DtmfSenderRegistry::new(),
            local_streams: Vec::new(),
            remote_streams: HashMap::new(),
            dispatcher,
            listener,
            negotiation_timeout: options.negotiation_timeout,
        })
    }

    fn native(&self) -> BridgeResult<Arc<dyn NativePeerConnection>> {
        self.native.clone().ok_or(BridgeError::ClosedSession)
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        self.native.as_ref().map(|_| ()).ok_or(BridgeError::ClosedSession)
    }

    pub fn is_closed(&self) -> bool {
        self.native.is_none()
    }

    fn emit(&mut self, event: SessionEvent) {
        debug!(event = event.event_type(), "Session event");
        self.listener.on_event(event);
    }

    fn set_signaling_state(&mut self, state: SignalingState) {
        if state == self.signaling_state {
            return;
        }
        self.signaling_state = state;
        self.emit(SessionEvent::SignalingStateChange { signaling_state: state });
    }

    pub async fn create_offer(&mut self, options: Option<OfferOptions>) -> BridgeResult<SessionDescription> {
        let native = self.native()?;
        let constraints = MediaConstraints::from_options(options.as_ref());
        negotiate("createOffer", self.negotiation_timeout, native.create_offer(&constraints)).await
    }

    pub async fn create_answer(&mut self, options: Option<OfferOptions>) -> BridgeResult<SessionDescription> {
        let native = self.native()?;
        if !self.signaling_state.can_answer() {
            return Err(BridgeError::Negotiation(format!(
                "cannot create answer in state {:?}",
                self.signaling_state
            )));
        }
        let constraints = MediaConstraints::from_options(options.as_ref());
        negotiate("createAnswer", self.negotiation_timeout, native.create_answer(&constraints)).await
    }

    pub async fn set_local_description(&mut self, description: SessionDescription) -> BridgeResult<SessionDescription> {
        let native = self.native()?;
        let next = self.next_signaling_state(DescriptionSource::Local, description.sdp_type)?;

        negotiate(
            "setLocalDescription",
            self.negotiation_timeout,
            native.set_local_description(&description),
        )
        .await?;

        let committed = native
            .local_description()
            .ok_or_else(|| BridgeError::Negotiation("engine reported no local description".to_string()))?;
        self.set_signaling_state(next);
        Ok(committed)
    }

    pub async fn set_remote_description(&mut self, description: SessionDescription) -> BridgeResult<SessionDescription> {
        let native = self.native()?;
        let next = self.next_signaling_state(DescriptionSource::Remote, description.sdp_type)?;

        negotiate(
            "setRemoteDescription",
            self.negotiation_timeout,
            native.set_remote_description(&description),
        )
        .await?;

        let committed = native
            .remote_description()
            .ok_or_else(|| BridgeError::Negotiation("engine reported no remote description".to_string()))?;
        self.set_signaling_state(next);
        Ok(committed)
    }

    fn next_signaling_state(&self, source: DescriptionSource, sdp_type: SdpType) -> BridgeResult<SignalingState> {
        self.signaling_state.next(source, sdp_type).ok_or_else(|| {
            BridgeError::Negotiation(format!(
                "cannot apply {:?} {} in state {:?}",
                source, sdp_type, self.signaling_state
            ))
        })
    }

    pub fn add_ice_candidate(&mut self, candidate: IceCandidate) -> BridgeResult<RemoteDescriptionSnapshot> {
        let native = self.native()?;
        if !native.add_ice_candidate(&candidate) {
            warn!(sdp_mid = %candidate.sdp_mid, "Engine did not apply ICE candidate");
        }
        Ok(RemoteDescriptionSnapshot {
            remote_description: native.remote_description(),
        })
    }

    pub fn add_stream(&mut self, stream: MediaStream) -> BridgeResult<bool> {
        let native = self.native()?;
        let added = native.add_stream(stream.native());
        if added && !self.local_streams.iter().any(|s| s.id() == stream.id()) {
            info!(stream_id = %stream.id(), "Local stream added");
            self.local_streams.push(stream);
        }
        Ok(added)
    }

    pub fn remove_stream(&mut self, stream: &MediaStream) -> BridgeResult<bool> {
        let native = self.native()?;
        let removed = native.remove_stream(stream.native());
        self.local_streams.retain(|s| s.id() != stream.id());
        if removed {
            info!(stream_id = %stream.id(), "Local stream removed");
        }
        Ok(removed)
    }

    /// `true` disables outgoing tracks of that kind, `false` re-enables
    /// them, absent leaves them alone.
    pub fn mute(&mut self, request: MuteRequest) -> BridgeResult<()> {
        let native = self.native()?;
        for sender in native.senders() {
            let Some(track) = sender.track() else { continue };
            let Some(muted) = request.flag_for(track.kind()) else { continue };

            match self.find_local_track(&track.id()) {
                Some(monitor) => monitor.set_enabled(!muted),
                None => track.set_enabled(!muted),
            }
            debug!(track_id = %track.id(), muted, "Outgoing track toggled");
        }
        Ok(())
    }

    /// Replace each outgoing sender's track with the first track of the same
    /// kind in `stream`. Every lookup is validated before anything changes.
    pub fn switch_camera(&mut self, stream: MediaStream) -> BridgeResult<()> {
        let native = self.native()?;
        let senders = native.senders();
        let mut replacements: Vec<(Arc<dyn NativeRtpSender>, MediaStreamTrack)> = Vec::new();

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let sender = senders
                .iter()
                .find(|sender| sender.track().map(|track| track.kind()) == Some(kind));

            match (sender, stream.first_track(kind)) {
                (Some(sender), Some(track)) => replacements.push((Arc::clone(sender), track.clone())),
                (None, None) => {}
                (Some(_), None) => {
                    return Err(BridgeError::NotFound(format!(
                        "{} track in stream {}",
                        kind,
                        stream.id()
                    )))
                }
                (None, Some(_)) => return Err(BridgeError::NotFound(format!("outgoing {} sender", kind))),
            }
        }

        if replacements.is_empty() {
            return Err(BridgeError::NotFound(format!(
                "tracks to switch in stream {}",
                stream.id()
            )));
        }

        for (sender, track) in replacements {
            if !sender.replace_track(track.native()) {
                warn!(track_id = %track.id(), "Engine refused track replacement");
            }
        }

        info!(stream_id = %stream.id(), "Outgoing tracks switched");
        if !self.local_streams.iter().any(|s| s.id() == stream.id()) {
            self.local_streams.push(stream);
        }
        Ok(())
    }

    pub fn create_data_channel(
        &mut self,
        dc_id: u32,
        label: &str,
        init: &DataChannelInit,
        listener: Option<ChannelListener>,
    ) -> BridgeResult<DataChannelInfo> {
        let native = self.native()?;
        self.data_channels
            .create(native.as_ref(), &self.dispatcher, dc_id, label, init, listener)
    }

    pub fn set_data_channel_listener(&mut self, dc_id: u32, listener: ChannelListener) -> BridgeResult<usize> {
        self.ensure_open()?;
        self.data_channels.set_listener(dc_id, listener)
    }

    pub fn send_data(&mut self, dc_id: u32, message: ChannelMessage) -> BridgeResult<()> {
        self.ensure_open()?;
        self.data_channels.send(dc_id, message)
    }

    pub fn close_data_channel(&mut self, dc_id: u32) -> BridgeResult<()> {
        self.ensure_open()?;
        self.data_channels.close(dc_id)
    }

    pub fn data_channel_info(&self, dc_id: u32) -> BridgeResult<DataChannelInfo> {
        self.ensure_open()?;
        self.data_channels.info(dc_id)
    }

    pub fn create_dtmf_sender(&mut self, id: u32, track_id: &str) -> BridgeResult<()> {
        let native = self.native()?;
        let track = self
            .find_local_track(track_id)
            .ok_or_else(|| BridgeError::NotFound(format!("outgoing track {}", track_id)))?;
        self.dtmf_senders.create(native.as_ref(), id, &track)
    }

    pub fn insert_dtmf(&mut self, id: u32, tones: &str, duration: Duration, inter_tone_gap: Duration) -> BridgeResult<()> {
        self.ensure_open()?;
        self.dtmf_senders.insert_dtmf(id, tones, duration, inter_tone_gap)
    }

    pub fn close_dtmf_sender(&mut self, id: u32) -> BridgeResult<()> {
        self.ensure_open()?;
        self.dtmf_senders.close(id);
        Ok(())
    }

    pub async fn get_stats(&mut self, track_id: Option<String>) -> BridgeResult<Vec<StatsReport>> {
        let native = self.native()?;
        let track = match track_id {
            Some(id) => {
                let track = self
                    .find_track(&id)
                    .ok_or_else(|| BridgeError::NotFound(format!("track {}", id)))?;
                Some(track.native())
            }
            None => None,
        };

        bounded("getStats", self.negotiation_timeout, native.stats(track))
            .await?
            .map_err(BridgeError::from)
    }

    /// Idempotent. Releases every sub-object and reports `closed` once.
    pub fn close(&mut self) -> BridgeResult<()> {
        let Some(native) = self.native.take() else {
            return Ok(());
        };

        self.data_channels.close_all();
        self.dtmf_senders.clear();
        native.close();
        self.local_streams.clear();
        self.remote_streams.clear();

        self.signaling_state = SignalingState::Closed;
        self.emit(SessionEvent::SignalingStateChange {
            signaling_state: SignalingState::Closed,
        });
        info!("Peer connection closed");
        Ok(())
    }

    /// Translate one native notification into session events
    pub fn handle_native_event(&mut self, event: NativeEvent) {
        let Some(native) = self.native.clone() else {
            debug!(notification = event.name(), "Session closed, dropping notification");
            return;
        };

        match event {
            NativeEvent::SignalingChange(SignalingState::Closed) => {
                // Engine closed underneath us
                let _ = self.close();
            }
            NativeEvent::SignalingChange(state) => self.set_signaling_state(state),
            NativeEvent::IceGatheringChange(state) => {
                let entering_complete =
                    state == IceGatheringState::Complete && self.ice_gathering_state != IceGatheringState::Complete;
                self.ice_gathering_state = state;
                self.emit(SessionEvent::IceGatheringStateChange {
                    ice_gathering_state: state,
                });

                if entering_complete {
                    if let Some(local_description) = native.local_description() {
                        self.emit(SessionEvent::IceCandidate {
                            candidate: None,
                            local_description: Some(local_description),
                        });
                    }
                }
            }
            NativeEvent::IceCandidate(candidate) => {
                self.emit(SessionEvent::IceCandidate {
                    candidate: Some(candidate),
                    local_description: native.local_description(),
                });
            }
            NativeEvent::IceConnectionChange(state) => {
                self.ice_connection_state = state;
                self.emit(SessionEvent::IceConnectionStateChange {
                    ice_connection_state: state,
                });
            }
            NativeEvent::AddStream(native_stream) => {
                let stream = MediaStream::from_native(native_stream);
                let info = stream.info();
                self.remote_streams.insert(stream.id().to_string(), stream);
                self.emit(SessionEvent::AddStream { stream: info });
            }
            NativeEvent::RemoveStream(stream_id) => {
                self.remote_streams.remove(&stream_id);
                self.emit(SessionEvent::RemoveStream { stream_id });
            }
            NativeEvent::RenegotiationNeeded => self.emit(SessionEvent::NegotiationNeeded),
            NativeEvent::DataChannel(native_channel) => {
                match self.data_channels.adopt(native_channel, &self.dispatcher) {
                    Ok(channel) => self.emit(SessionEvent::DataChannel { channel }),
                    Err(e) => warn!(error = %e, "Rejected remote data channel"),
                }
            }
            NativeEvent::Channel { key, notification } => {
                self.data_channels.handle_notification(key, notification);
            }
        }
    }

    fn find_local_track(&self, track_id: &str) -> Option<MediaStreamTrack> {
        self.local_streams
            .iter()
            .find_map(|stream| stream.find_track(track_id))
            .cloned()
    }

    fn find_track(&self, track_id: &str) -> Option<MediaStreamTrack> {
        self.find_local_track(track_id).or_else(|| {
            self.remote_streams
                .values()
                .find_map(|stream| stream.find_track(track_id))
                .cloned()
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            signaling_state: self.signaling_state,
            ice_gathering_state: self.ice_gathering_state,
            ice_connection_state: self.ice_connection_state,
            local_description: self.native.as_ref().and_then(|native| native.local_description()),
            remote_description: self.native.as_ref().and_then(|native| native.remote_description()),
        }
    }

    pub fn local_streams(&self) -> Vec<MediaStream> {
        self.local_streams.clone()
    }

    pub fn remote_stream(&self, stream_id: &str) -> Option<MediaStream> {
        self.remote_streams.get(stream_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackEngine;
    use crate::session::Envelope;
    use parking_lot::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    struct Harness {
        _tx: UnboundedSender<Envelope>,
        rx: UnboundedReceiver<Envelope>,
        engine: LoopbackEngine,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        core: PeerConnection,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let engine = LoopbackEngine::new();
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&events);
            let core = PeerConnection::new(
                &engine,
                &RtcConfiguration::default(),
                &MediaConstraints::default(),
                &SessionOptions::default(),
                Dispatcher::new(&tx),
                Box::new(move |event: SessionEvent| sink.lock().push(event)),
            )
            .unwrap();

            Self {
                _tx: tx,
                rx,
                engine,
                events,
                core,
            }
        }

        fn pump(&mut self) {
            while let Ok(envelope) = self.rx.try_recv() {
                if let Envelope::Native(event) = envelope {
                    self.core.handle_native_event(event);
                }
            }
        }

        fn take_events(&self) -> Vec<SessionEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    #[tokio::test]
    async fn test_end_of_candidates_emitted_once() {
        let mut h = Harness::new();
        let offer = h.core.create_offer(None).await.unwrap();
        h.core.set_local_description(offer).await.unwrap();
        h.pump();

        let native = h.engine.last_peer_connection().unwrap();
        native.simulate_ice_gathering(IceGatheringState::Complete);
        h.pump();

        let events = h.take_events();
        let end_markers: Vec<_> = events.iter().filter(|e| e.is_end_of_candidates()).collect();
        assert_eq!(end_markers.len(), 1);
        match end_markers[0] {
            SessionEvent::IceCandidate { local_description, .. } => {
                assert_eq!(local_description.as_ref().map(|d| d.sdp_type), Some(SdpType::Offer));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signaling_change_not_duplicated() {
        let mut h = Harness::new();
        let offer = h.core.create_offer(None).await.unwrap();
        h.core.set_local_description(offer).await.unwrap();
        h.pump();

        let changes: Vec<_> = h
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::SignalingStateChange { .. }))
            .collect();
        assert_eq!(
            changes,
            vec![SessionEvent::SignalingStateChange {
                signaling_state: SignalingState::HaveLocalOffer
            }]
        );
    }

    #[tokio::test]
    async fn test_create_answer_requires_remote_offer() {
        let mut h = Harness::new();
        assert!(matches!(
            h.core.create_answer(None).await,
            Err(BridgeError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn test_notifications_after_close_are_dropped() {
        let mut h = Harness::new();
        let native = h.engine.last_peer_connection().unwrap();

        h.core.close().unwrap();
        h.core.close().unwrap();
        native.simulate_renegotiation_needed();
        h.pump();

        assert_eq!(
            h.take_events(),
            vec![SessionEvent::SignalingStateChange {
                signaling_state: SignalingState::Closed
            }]
        );
        assert!(native.is_closed());
    }

    #[tokio::test]
    async fn test_engine_side_close_tears_down() {
        let mut h = Harness::new();
        let native = h.engine.last_peer_connection().unwrap();

        native.simulate_signaling_change(SignalingState::Closed);
        h.pump();

        assert!(h.core.is_closed());
        assert_eq!(h.core.snapshot().signaling_state, SignalingState::Closed);
        assert!(matches!(h.core.create_offer(None).await, Err(BridgeError::ClosedSession)));
    }

    #[tokio::test]
    async fn test_negotiation_timeout() {
        use crate::engine::{NativeDataChannel, NativeDtmfSender, NativeMediaStream, NativeMediaTrack, PeerConnectionObserver};
        use async_trait::async_trait;

        struct Stalled;

        #[async_trait]
        impl NativePeerConnection for Stalled {
            async fn create_offer(&self, _: &MediaConstraints) -> EngineResult<SessionDescription> {
                std::future::pending().await
            }
            async fn create_answer(&self, _: &MediaConstraints) -> EngineResult<SessionDescription> {
                std::future::pending().await
            }
            async fn set_local_description(&self, _: &SessionDescription) -> EngineResult<()> {
                std::future::pending().await
            }
            async fn set_remote_description(&self, _: &SessionDescription) -> EngineResult<()> {
                std::future::pending().await
            }
            fn local_description(&self) -> Option<SessionDescription> {
                None
            }
            fn remote_description(&self) -> Option<SessionDescription> {
                None
            }
            fn add_ice_candidate(&self, _: &IceCandidate) -> bool {
                false
            }
            fn add_stream(&self, _: &Arc<dyn NativeMediaStream>) -> bool {
                false
            }
            fn remove_stream(&self, _: &Arc<dyn NativeMediaStream>) -> bool {
                false
            }
            fn senders(&self) -> Vec<Arc<dyn NativeRtpSender>> {
                Vec::new()
            }
            fn create_data_channel(&self, _: &str, _: &DataChannelInit) -> EngineResult<Arc<dyn NativeDataChannel>> {
                Err(crate::engine::EngineError::Unsupported("data channels".to_string()))
            }
            fn create_dtmf_sender(&self, _: &Arc<dyn NativeMediaTrack>) -> EngineResult<Arc<dyn NativeDtmfSender>> {
                Err(crate::engine::EngineError::Unsupported("dtmf".to_string()))
            }
            async fn stats(&self, _: Option<Arc<dyn NativeMediaTrack>>) -> EngineResult<Vec<StatsReport>> {
                Ok(Vec::new())
            }
            fn close(&self) {}
        }

        struct StalledEngine;

        impl NativeEngine for StalledEngine {
            fn create_peer_connection(
                &self,
                _: &RtcConfiguration,
                _: &MediaConstraints,
                _: Arc<dyn PeerConnectionObserver>,
            ) -> EngineResult<Arc<dyn NativePeerConnection>> {
                Ok(Arc::new(Stalled))
            }
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let options = SessionOptions {
            negotiation_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let mut core = PeerConnection::new(
            &StalledEngine,
            &RtcConfiguration::default(),
            &MediaConstraints::default(),
            &options,
            Dispatcher::new(&tx),
            Box::new(|_: SessionEvent| {}),
        )
        .unwrap();

        let result = core.create_offer(None).await;
        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(20))));
    }
}
