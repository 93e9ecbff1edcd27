//! In-process engine
//!
//! Implements every native trait without touching the network: offers and
//! answers are generated with the [`sdp`](crate::sdp) module, ICE gathering
//! yields one host candidate per media section, and the connection reports
//! itself connected as soon as an offer/answer exchange completes. The
//! `simulate_*` hooks inject remote activity.
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


use crate::acquisition::{VideoConstraints, MIN_WIDTH};
use crate::data_channel::ChannelMessage;
use crate::engine::*;
use crate::sdp::{Attribute, MediaDescription, SdpSession};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rtc_bridge_types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const RTP_PROTOCOL: &str = "UDP/TLS/RTP/SAVPF";
const SCTP_PROTOCOL: &str = "UDP/DTLS/SCTP";
const DTMF_TONES: &str = "0123456789ABCD#*,";

/// Engine factory that keeps every peer connection it created
#[derive(Default)]
pub struct LoopbackEngine {
    peer_connections: Mutex<Vec<Arc<LoopbackPeerConnection>>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_connections(&self) -> Vec<Arc<LoopbackPeerConnection>> {
        self.peer_connections.lock().clone()
    }

    pub fn last_peer_connection(&self) -> Option<Arc<LoopbackPeerConnection>> {
        self.peer_connections.lock().last().cloned()
    }
}

impl NativeEngine for LoopbackEngine {
    fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
        constraints: &MediaConstraints,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> EngineResult<Arc<dyn NativePeerConnection>> {
        let pc = LoopbackPeerConnection::new(observer);
        {
            let mut state = pc.state.lock();
            state.configuration = config.clone();
            state.constraints = *constraints;
        }
        self.peer_connections.lock().push(Arc::clone(&pc));
        Ok(pc as Arc<dyn NativePeerConnection>)
    }
}

struct PeerState {
    configuration: RtcConfiguration,
    constraints: MediaConstraints,
    signaling: SignalingState,
    gathering: IceGatheringState,
    connection: IceConnectionState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    session_version: u64,
    streams: Vec<Arc<dyn NativeMediaStream>>,
    senders: Vec<Arc<LoopbackRtpSender>>,
    channels: Vec<Arc<LoopbackDataChannel>>,
    dtmf_senders: Vec<Arc<LoopbackDtmfSender>>,
    remote_candidates: Vec<IceCandidate>,
    next_stream_id: u16,
    refuse_channels: bool,
    closed: bool,
}

impl PeerState {
    fn sends(&self, kind: MediaKind) -> bool {
        self.senders
            .iter()
            .any(|sender| sender.track().map(|track| track.kind()) == Some(kind))
    }

    fn sending_tracks(&self, kind: MediaKind) -> Vec<(String, String)> {
        let mut tracks = Vec::new();
        for stream in &self.streams {
            for track in stream.tracks() {
                if track.kind() == kind {
                    tracks.push((stream.id(), track.id()));
                }
            }
        }
        tracks
    }

    fn allocate_stream_id(&mut self) -> u16 {
        let id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(2);
        id
    }

    fn ready_to_connect(&self) -> bool {
        self.signaling == SignalingState::Stable
            && self.local.is_some()
            && self.remote.is_some()
            && self.connection == IceConnectionState::New
    }
}

/// Loopback peer connection
pub struct LoopbackPeerConnection {
    observer: Arc<dyn PeerConnectionObserver>,
    session_id: u64,
    state: Mutex<PeerState>,
}

impl LoopbackPeerConnection {
    pub fn new(observer: Arc<dyn PeerConnectionObserver>) -> Arc<Self> {
        Arc::new(Self {
            observer,
            session_id: (Uuid::new_v4().as_u128() as u64) >> 1,
            state: Mutex::new(PeerState {
                configuration: RtcConfiguration::default(),
                constraints: MediaConstraints::default(),
                signaling: SignalingState::Stable,
                gathering: IceGatheringState::New,
                connection: IceConnectionState::New,
                local: None,
                remote: None,
                session_version: 0,
                streams: Vec::new(),
                senders: Vec::new(),
                channels: Vec::new(),
                dtmf_senders: Vec::new(),
                remote_candidates: Vec::new(),
                next_stream_id: 1,
                refuse_channels: false,
                closed: false,
            }),
        })
    }

    pub fn configuration(&self) -> RtcConfiguration {
        self.state.lock().configuration.clone()
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.state.lock().constraints
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make `create_data_channel` fail until switched back
    pub fn refuse_data_channels(&self, refuse: bool) {
        self.state.lock().refuse_channels = refuse;
    }

    pub fn data_channel(&self, stream_id: u16) -> Option<Arc<LoopbackDataChannel>> {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.parameters().stream_id == stream_id)
            .cloned()
    }

    pub fn data_channels(&self) -> Vec<Arc<LoopbackDataChannel>> {
        self.state.lock().channels.clone()
    }

    pub fn dtmf_sender(&self, track_id: &str) -> Option<Arc<LoopbackDtmfSender>> {
        self.state
            .lock()
            .dtmf_senders
            .iter()
            .find(|sender| sender.track_id == track_id)
            .cloned()
    }

    pub fn loopback_senders(&self) -> Vec<Arc<LoopbackRtpSender>> {
        self.state.lock().senders.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.state.lock().closed {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn build_offer(&self) -> EngineResult<SessionDescription> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }

        state.session_version += 1;
        let mut sdp = self.session_skeleton(state.session_version);

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let sending = state.sends(kind);
            let receiving = match kind {
                MediaKind::Audio => state.constraints.offer_to_receive_audio,
                MediaKind::Video => state.constraints.offer_to_receive_video,
            };
            if !sending && !receiving {
                continue;
            }

            let direction = match (sending, receiving) {
                (true, true) => "sendrecv",
                (true, false) => "sendonly",
                _ => "recvonly",
            };
            let mid = sdp.media_descriptions.len().to_string();
            let mut media = rtp_section(kind)
                .with_attribute(Attribute::value("mid", mid))
                .with_attribute(Attribute::flag(direction));
            for (stream_id, track_id) in state.sending_tracks(kind) {
                media = media.with_attribute(Attribute::value("msid", format!("{} {}", stream_id, track_id)));
            }
            sdp.media_descriptions.push(media);
        }

        if !state.channels.is_empty() {
            let mid = sdp.media_descriptions.len().to_string();
            sdp.media_descriptions.push(
                MediaDescription::new("application", 9, SCTP_PROTOCOL, &["webrtc-datachannel"])
                    .with_attribute(Attribute::value("mid", mid))
                    .with_attribute(Attribute::value("sctp-port", "5000")),
            );
        }

        Ok(SessionDescription::new(SdpType::Offer, sdp.serialize()))
    }

    fn build_answer(&self) -> EngineResult<SessionDescription> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }
        if !state.signaling.can_answer() {
            return Err(EngineError::Rejected(format!(
                "no remote offer to answer in state {:?}",
                state.signaling
            )));
        }
        let offer = match state.remote {
            Some(ref remote) => SdpSession::parse(&remote.sdp)?,
            None => return Err(EngineError::Rejected("no remote offer".to_string())),
        };

        state.session_version += 1;
        let mut sdp = self.session_skeleton(state.session_version);

        for offered in &offer.media_descriptions {
            let mid = offered.mid().unwrap_or_default().to_string();
            let kind: Option<MediaKind> = offered.media_type.parse().ok();
            let mut media = MediaDescription::new(
                &offered.media_type,
                9,
                &offered.protocol,
                &offered.formats.iter().map(String::as_str).collect::<Vec<_>>(),
            )
            .with_attribute(Attribute::value("mid", mid));

            if let Some(kind) = kind {
                let remote_sends = offered.has_attribute("sendrecv") || offered.has_attribute("sendonly");
                let remote_receives = offered.has_attribute("sendrecv") || offered.has_attribute("recvonly");
                let direction = match (state.sends(kind) && remote_receives, remote_sends) {
                    (true, true) => "sendrecv",
                    (true, false) => "sendonly",
                    (false, true) => "recvonly",
                    (false, false) => "inactive",
                };
                media = media.with_attribute(Attribute::flag(direction));
            }
            sdp.media_descriptions.push(media);
        }

        Ok(SessionDescription::new(SdpType::Answer, sdp.serialize()))
    }

    fn session_skeleton(&self, version: u64) -> SdpSession {
        let mut sdp = SdpSession::new(self.session_id, version);
        let credentials = format!("{:016x}", self.session_id);
        sdp.attributes.push(Attribute::value("ice-ufrag", &credentials[..8]));
        sdp.attributes.push(Attribute::value("ice-pwd", format!("{}{}", credentials, credentials)));
        sdp.attributes.push(Attribute::value("group", "BUNDLE"));
        sdp
    }

    /// Validate and store a description, then play out the notifications
    /// a real engine would produce.
    fn apply_description(&self, source: DescriptionSource, description: &SessionDescription) -> EngineResult<()> {
        let parsed = SdpSession::parse(&description.sdp)?;

        let (next, candidates, connect) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            let next = state.signaling.next(source, description.sdp_type).ok_or_else(|| {
                EngineError::Rejected(format!(
                    "cannot apply {:?} {} in state {:?}",
                    source, description.sdp_type, state.signaling
                ))
            })?;

            state.signaling = next;
            let candidates = match source {
                DescriptionSource::Local => {
                    state.local = Some(description.clone());
                    if state.gathering == IceGatheringState::New {
                        state.gathering = IceGatheringState::Complete;
                        Some(host_candidates(&parsed))
                    } else {
                        None
                    }
                }
                DescriptionSource::Remote => {
                    state.remote = Some(description.clone());
                    None
                }
            };

            let connect = state.ready_to_connect();
            if connect {
                state.connection = IceConnectionState::Connected;
            }
            (next, candidates, connect)
        };

        self.observer.on_signaling_change(next);

        if let Some(candidates) = candidates {
            self.observer.on_ice_gathering_change(IceGatheringState::Gathering);
            for candidate in candidates {
                self.observer.on_ice_candidate(candidate);
            }
            self.observer.on_ice_gathering_change(IceGatheringState::Complete);
        }

        if connect {
            self.observer.on_ice_connection_change(IceConnectionState::Checking);
            self.observer.on_ice_connection_change(IceConnectionState::Connected);
            for channel in self.data_channels() {
                if channel.ready_state() == DataChannelState::Connecting {
                    channel.simulate_state(DataChannelState::Open);
                }
            }
        }

        Ok(())
    }

    fn new_channel(&self, label: &str, init: &DataChannelInit) -> EngineResult<(Arc<LoopbackDataChannel>, bool)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }
        if state.refuse_channels {
            return Err(EngineError::Rejected("data channels disabled".to_string()));
        }
        if label.len() > u16::MAX as usize {
            return Err(EngineError::Rejected("label too long".to_string()));
        }

        let stream_id = match (init.negotiated, init.id) {
            (Some(true), Some(id)) => id,
            _ => state.allocate_stream_id(),
        };
        let ready_state = if state.connection == IceConnectionState::Connected {
            DataChannelState::Open
        } else {
            DataChannelState::Connecting
        };

        let channel = LoopbackDataChannel::new(label, init, stream_id, ready_state);
        let first = state.channels.is_empty();
        state.channels.push(Arc::clone(&channel));
        Ok((channel, first))
    }

    /// Remote peer opens a data channel
    pub fn simulate_remote_data_channel(&self, label: &str, init: &DataChannelInit) -> EngineResult<Arc<LoopbackDataChannel>> {
        let (channel, _) = self.new_channel(label, init)?;
        self.observer.on_data_channel(channel.clone());
        Ok(channel)
    }

    /// Remote peer adds a stream with the requested tracks
    pub fn simulate_remote_stream(&self, stream_id: &str, audio: bool, video: bool) -> Arc<LoopbackMediaStream> {
        let stream = LoopbackMediaStream::new(stream_id);
        if audio {
            stream.add_track(LoopbackMediaTrack::new(&format!("{}-audio", stream_id), MediaKind::Audio));
        }
        if video {
            stream.add_track(LoopbackMediaTrack::new(&format!("{}-video", stream_id), MediaKind::Video));
        }
        self.observer.on_add_stream(stream.clone());
        stream
    }

    pub fn simulate_remove_stream(&self, stream_id: &str) {
        self.observer.on_remove_stream(stream_id.to_string());
    }

    pub fn simulate_signaling_change(&self, state: SignalingState) {
        self.state.lock().signaling = state;
        self.observer.on_signaling_change(state);
    }

    pub fn simulate_ice_gathering(&self, state: IceGatheringState) {
        self.state.lock().gathering = state;
        self.observer.on_ice_gathering_change(state);
    }

    pub fn simulate_ice_connection(&self, state: IceConnectionState) {
        self.state.lock().connection = state;
        self.observer.on_ice_connection_change(state);
    }

    pub fn simulate_candidate(&self, candidate: IceCandidate) {
        self.observer.on_ice_candidate(candidate);
    }

    pub fn simulate_renegotiation_needed(&self) {
        self.observer.on_renegotiation_needed();
    }
}

fn rtp_section(kind: MediaKind) -> MediaDescription {
    match kind {
        MediaKind::Audio => MediaDescription::new("audio", 9, RTP_PROTOCOL, &["111", "126"])
            .with_attribute(Attribute::value("rtpmap", "111 opus/48000/2"))
            .with_attribute(Attribute::value("rtpmap", "126 telephone-event/8000")),
        MediaKind::Video => MediaDescription::new("video", 9, RTP_PROTOCOL, &["96"])
            .with_attribute(Attribute::value("rtpmap", "96 VP8/90000")),
    }
}

fn host_candidates(sdp: &SdpSession) -> Vec<IceCandidate> {
    sdp.media_descriptions
        .iter()
        .enumerate()
        .map(|(index, media)| IceCandidate {
            sdp_mid: media.mid().unwrap_or_default().to_string(),
            sdp_m_line_index: index as u32,
            candidate: format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                index + 1,
                50000 + index
            ),
        })
        .collect()
}

#[async_trait]
impl NativePeerConnection for LoopbackPeerConnection {
    async fn create_offer(&self, constraints: &MediaConstraints) -> EngineResult<SessionDescription> {
        self.state.lock().constraints = *constraints;
        self.build_offer()
    }

    async fn create_answer(&self, constraints: &MediaConstraints) -> EngineResult<SessionDescription> {
        self.state.lock().constraints = *constraints;
        self.build_answer()
    }

    async fn set_local_description(&self, description: &SessionDescription) -> EngineResult<()> {
        self.apply_description(DescriptionSource::Local, description)
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> EngineResult<()> {
        self.apply_description(DescriptionSource::Remote, description)
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    fn add_ice_candidate(&self, candidate: &IceCandidate) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.remote.is_none() || candidate.candidate.is_empty() {
            return false;
        }
        state.remote_candidates.push(candidate.clone());
        true
    }

    fn add_stream(&self, stream: &Arc<dyn NativeMediaStream>) -> bool {
        {
            let mut state = self.state.lock();
            let stream_id = stream.id();
            if state.closed || state.streams.iter().any(|s| s.id() == stream_id) {
                return false;
            }
            for track in stream.tracks() {
                state.senders.push(LoopbackRtpSender::new(track));
            }
            state.streams.push(Arc::clone(stream));
        }
        self.observer.on_renegotiation_needed();
        true
    }

    fn remove_stream(&self, stream: &Arc<dyn NativeMediaStream>) -> bool {
        {
            let mut state = self.state.lock();
            let stream_id = stream.id();
            let Some(position) = state.streams.iter().position(|s| s.id() == stream_id) else {
                return false;
            };
            let removed = state.streams.remove(position);
            let track_ids: Vec<String> = removed.tracks().iter().map(|track| track.id()).collect();
            state.senders.retain(|sender| {
                sender
                    .track()
                    .map(|track| !track_ids.contains(&track.id()))
                    .unwrap_or(true)
            });
        }
        self.observer.on_renegotiation_needed();
        true
    }

    fn senders(&self) -> Vec<Arc<dyn NativeRtpSender>> {
        self.state
            .lock()
            .senders
            .iter()
            .map(|sender| Arc::clone(sender) as Arc<dyn NativeRtpSender>)
            .collect()
    }

    fn create_data_channel(&self, label: &str, init: &DataChannelInit) -> EngineResult<Arc<dyn NativeDataChannel>> {
        let (channel, first) = self.new_channel(label, init)?;
        if first {
            self.observer.on_renegotiation_needed();
        }
        Ok(channel as Arc<dyn NativeDataChannel>)
    }

    fn create_dtmf_sender(&self, track: &Arc<dyn NativeMediaTrack>) -> EngineResult<Arc<dyn NativeDtmfSender>> {
        if track.kind() != MediaKind::Audio {
            return Err(EngineError::Unsupported("DTMF requires an audio track".to_string()));
        }
        self.check_open()?;

        let sender = Arc::new(LoopbackDtmfSender {
            track_id: track.id(),
            tones: Mutex::new(Vec::new()),
        });
        self.state.lock().dtmf_senders.push(Arc::clone(&sender));
        Ok(sender as Arc<dyn NativeDtmfSender>)
    }

    async fn stats(&self, track: Option<Arc<dyn NativeMediaTrack>>) -> EngineResult<Vec<StatsReport>> {
        let state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }

        let timestamp = Utc::now();
        let track_report = |track: &Arc<dyn NativeMediaTrack>| StatsReport {
            report_id: format!("RTCMediaStreamTrack_{}", track.id()),
            report_type: "track".to_string(),
            timestamp,
            values: BTreeMap::from([
                ("trackIdentifier".to_string(), track.id()),
                ("kind".to_string(), track.kind().to_string()),
                ("enabled".to_string(), track.is_enabled().to_string()),
                ("ended".to_string(), (track.ready_state() == TrackState::Ended).to_string()),
            ]),
        };

        let reports = match track {
            Some(track) => vec![track_report(&track)],
            None => {
                let mut reports = vec![StatsReport {
                    report_id: "RTCPeerConnection".to_string(),
                    report_type: "peer-connection".to_string(),
                    timestamp,
                    values: BTreeMap::from([
                        ("dataChannelsOpened".to_string(), state.channels.len().to_string()),
                        ("iceConnectionState".to_string(), format!("{:?}", state.connection)),
                    ]),
                }];
                reports.extend(
                    state
                        .senders
                        .iter()
                        .filter_map(|sender| sender.track())
                        .map(|track| track_report(&track)),
                );
                reports
            }
        };
        Ok(reports)
    }

    fn close(&self) {
        let channels = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.signaling = SignalingState::Closed;
            state.connection = IceConnectionState::Closed;
            std::mem::take(&mut state.channels)
        };

        for channel in channels {
            channel.close();
        }
        self.observer.on_ice_connection_change(IceConnectionState::Closed);
        self.observer.on_signaling_change(SignalingState::Closed);
        debug!(session_id = self.session_id, "Loopback peer connection closed");
    }
}

/// Loopback data channel. Sent messages are recorded, not delivered.
pub struct LoopbackDataChannel {
    parameters: Mutex<DataChannelParameters>,
    observer: Mutex<Option<Arc<dyn DataChannelObserver>>>,
    sent: Mutex<Vec<ChannelMessage>>,
}

impl LoopbackDataChannel {
    pub fn new(label: &str, init: &DataChannelInit, stream_id: u16, ready_state: DataChannelState) -> Arc<Self> {
        Arc::new(Self {
            parameters: Mutex::new(DataChannelParameters {
                label: label.to_string(),
                ordered: init.ordered.unwrap_or(true),
                max_packet_life_time: init.max_packet_life_time,
                max_retransmits: init.max_retransmits,
                protocol: init.protocol.clone().unwrap_or_default(),
                negotiated: init.negotiated.unwrap_or(false),
                stream_id,
                ready_state,
                buffered_amount: 0,
            }),
            observer: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn observer(&self) -> Option<Arc<dyn DataChannelObserver>> {
        self.observer.lock().clone()
    }

    pub fn simulate_state(&self, state: DataChannelState) {
        self.parameters.lock().ready_state = state;
        if let Some(observer) = self.observer() {
            observer.on_state_change(state);
        }
    }

    pub fn simulate_message(&self, message: ChannelMessage) {
        if let Some(observer) = self.observer() {
            observer.on_message(message);
        }
    }

    pub fn simulate_buffered_amount(&self, amount: u64) {
        self.parameters.lock().buffered_amount = amount;
        if let Some(observer) = self.observer() {
            observer.on_buffered_amount_change(amount);
        }
    }

    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().clone()
    }

    pub fn has_observer(&self) -> bool {
        self.observer.lock().is_some()
    }
}

impl NativeDataChannel for LoopbackDataChannel {
    fn parameters(&self) -> DataChannelParameters {
        self.parameters.lock().clone()
    }

    fn ready_state(&self) -> DataChannelState {
        self.parameters.lock().ready_state
    }

    fn buffered_amount(&self) -> u64 {
        self.parameters.lock().buffered_amount
    }

    fn send(&self, message: ChannelMessage) -> bool {
        if self.ready_state() != DataChannelState::Open {
            return false;
        }
        self.sent.lock().push(message);
        true
    }

    fn close(&self) {
        match self.ready_state() {
            DataChannelState::Closing | DataChannelState::Closed => {}
            _ => {
                self.simulate_state(DataChannelState::Closing);
                self.simulate_state(DataChannelState::Closed);
            }
        }
    }

    fn register_observer(&self, observer: Arc<dyn DataChannelObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn unregister_observer(&self) {
        self.observer.lock().take();
    }
}

/// Loopback RTP sender
pub struct LoopbackRtpSender {
    track: Mutex<Option<Arc<dyn NativeMediaTrack>>>,
}

impl LoopbackRtpSender {
    pub fn new(track: Arc<dyn NativeMediaTrack>) -> Arc<Self> {
        Arc::new(Self {
            track: Mutex::new(Some(track)),
        })
    }

    pub fn track_id(&self) -> Option<String> {
        self.track.lock().as_ref().map(|track| track.id())
    }
}

impl NativeRtpSender for LoopbackRtpSender {
    fn track(&self) -> Option<Arc<dyn NativeMediaTrack>> {
        self.track.lock().clone()
    }

    fn replace_track(&self, track: Arc<dyn NativeMediaTrack>) -> bool {
        *self.track.lock() = Some(track);
        true
    }
}

/// Loopback DTMF sender that records the tones it was asked to play
pub struct LoopbackDtmfSender {
    track_id: String,
    tones: Mutex<Vec<String>>,
}

impl LoopbackDtmfSender {
    pub fn tones(&self) -> Vec<String> {
        self.tones.lock().clone()
    }
}

impl NativeDtmfSender for LoopbackDtmfSender {
    fn insert_dtmf(&self, tones: &str, duration: Duration, inter_tone_gap: Duration) -> bool {
        let valid = !tones.is_empty()
            && tones
                .chars()
                .all(|tone| DTMF_TONES.contains(tone.to_ascii_uppercase()));
        if !valid {
            return false;
        }

        debug!(
            track_id = %self.track_id,
            tones,
            duration_ms = duration.as_millis() as u64,
            gap_ms = inter_tone_gap.as_millis() as u64,
            "Playing DTMF"
        );
        self.tones.lock().push(tones.to_string());
        true
    }
}

/// Loopback media stream
pub struct LoopbackMediaStream {
    id: String,
    tracks: Mutex<Vec<Arc<dyn NativeMediaTrack>>>,
}

impl LoopbackMediaStream {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            tracks: Mutex::new(Vec::new()),
        })
    }
}

impl NativeMediaStream for LoopbackMediaStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn tracks(&self) -> Vec<Arc<dyn NativeMediaTrack>> {
        self.tracks.lock().clone()
    }

    fn add_track(&self, track: Arc<dyn NativeMediaTrack>) -> bool {
        let mut tracks = self.tracks.lock();
        let track_id = track.id();
        if tracks.iter().any(|t| t.id() == track_id) {
            return false;
        }
        tracks.push(track);
        true
    }
}

/// Loopback media track
pub struct LoopbackMediaTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    state: Mutex<TrackState>,
    observer: Mutex<Option<Arc<dyn TrackObserver>>>,
}

impl LoopbackMediaTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            state: Mutex::new(TrackState::Live),
            observer: Mutex::new(None),
        })
    }

    fn set_state(&self, state: TrackState) {
        *self.state.lock() = state;
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_state_change(state);
        }
    }

    /// Source went away underneath the track
    pub fn simulate_ended(&self) {
        self.set_state(TrackState::Ended);
    }

    pub fn simulate_live(&self) {
        self.set_state(TrackState::Live);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl NativeMediaTrack for LoopbackMediaTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn label(&self) -> String {
        format!("loopback {}", self.kind)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn ready_state(&self) -> TrackState {
        *self.state.lock()
    }

    fn stop(&self) -> bool {
        self.stopped.store(true, Ordering::SeqCst);
        self.set_state(TrackState::Ended);
        true
    }

    fn register_observer(&self, observer: Arc<dyn TrackObserver>) {
        *self.observer.lock() = Some(observer);
    }
}

/// Device provider with a front camera, a back camera and a microphone
pub struct LoopbackDevices {
    authorization: Mutex<HashMap<MediaKind, AuthorizationStatus>>,
    devices: Mutex<Vec<CaptureDevice>>,
}

impl LoopbackDevices {
    pub fn new() -> Self {
        let devices = vec![
            CaptureDevice {
                unique_id: "front-camera".to_string(),
                label: "Front Camera".to_string(),
                kind: MediaKind::Video,
                position: DevicePosition::Front,
            },
            CaptureDevice {
                unique_id: "back-camera".to_string(),
                label: "Back Camera".to_string(),
                kind: MediaKind::Video,
                position: DevicePosition::Back,
            },
            CaptureDevice {
                unique_id: "microphone".to_string(),
                label: "Microphone".to_string(),
                kind: MediaKind::Audio,
                position: DevicePosition::Unspecified,
            },
        ];

        Self {
            authorization: Mutex::new(HashMap::new()),
            devices: Mutex::new(devices),
        }
    }

    pub fn set_authorization(&self, kind: MediaKind, status: AuthorizationStatus) {
        self.authorization.lock().insert(kind, status);
    }

    pub fn set_devices(&self, devices: Vec<CaptureDevice>) {
        *self.devices.lock() = devices;
    }
}

impl Default for LoopbackDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for LoopbackDevices {
    fn authorization_status(&self, kind: MediaKind) -> AuthorizationStatus {
        self.authorization
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or(AuthorizationStatus::Authorized)
    }

    fn devices(&self, kind: MediaKind) -> Vec<CaptureDevice> {
        self.devices
            .lock()
            .iter()
            .filter(|device| device.kind == kind)
            .cloned()
            .collect()
    }
}

struct LoopbackVideoSource {
    state: SourceState,
}

impl NativeVideoSource for LoopbackVideoSource {
    fn state(&self) -> SourceState {
        self.state
    }
}

/// Capture pipeline that counts every call made to it.
///
/// A video source ends immediately when the requested minimum width exceeds
/// what the simulated camera supports.
pub struct LoopbackCapture {
    calls: AtomicUsize,
    max_width: AtomicU32,
    last_device: Mutex<Option<String>>,
    last_constraints: Mutex<Option<VideoConstraints>>,
}

impl LoopbackCapture {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            max_width: AtomicU32::new(1920),
            last_device: Mutex::new(None),
            last_constraints: Mutex::new(None),
        }
    }

    pub fn capture_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_max_width(&self, width: u32) {
        self.max_width.store(width, Ordering::SeqCst);
    }

    pub fn last_device(&self) -> Option<String> {
        self.last_device.lock().clone()
    }

    pub fn last_constraints(&self) -> Option<VideoConstraints> {
        self.last_constraints.lock().clone()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for LoopbackCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePipeline for LoopbackCapture {
    fn create_media_stream(&self, stream_id: &str) -> Arc<dyn NativeMediaStream> {
        self.record_call();
        LoopbackMediaStream::new(stream_id)
    }

    fn create_video_source(
        &self,
        device: &CaptureDevice,
        constraints: &VideoConstraints,
    ) -> EngineResult<Arc<dyn NativeVideoSource>> {
        self.record_call();
        *self.last_device.lock() = Some(device.unique_id.clone());
        *self.last_constraints.lock() = Some(constraints.clone());

        let supported = f64::from(self.max_width.load(Ordering::SeqCst));
        let state = match constraints.get(MIN_WIDTH) {
            Some(min_width) if min_width > supported => SourceState::Ended,
            _ => SourceState::Live,
        };
        Ok(Arc::new(LoopbackVideoSource { state }))
    }

    fn create_video_track(
        &self,
        _source: &Arc<dyn NativeVideoSource>,
        track_id: &str,
    ) -> EngineResult<Arc<dyn NativeMediaTrack>> {
        self.record_call();
        Ok(LoopbackMediaTrack::new(track_id, MediaKind::Video))
    }

    fn create_audio_track(&self, track_id: &str) -> EngineResult<Arc<dyn NativeMediaTrack>> {
        self.record_call();
        Ok(LoopbackMediaTrack::new(track_id, MediaKind::Audio))
    }
}
