//! Native engine seams
//!
//! The bridge never talks to a media engine directly. Everything it needs
//! is expressed by the traits below, and every asynchronous notification
//! comes back through one of the single-purpose observer traits.
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


use crate::acquisition::VideoConstraints;
use crate::data_channel::ChannelMessage;
use async_trait::async_trait;
use rtc_bridge_types::*;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by an engine collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine declined the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// A description the engine could not parse or apply
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// The engine has no implementation for the request
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The native object is already closed
    #[error("native object closed")]
    Closed,
}

/// Factory for native peer connections
pub trait NativeEngine: Send + Sync {
    fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
        constraints: &MediaConstraints,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> EngineResult<Arc<dyn NativePeerConnection>>;
}

/// Native peer connection
///
/// Negotiation calls are asynchronous; everything else completes
/// synchronously on the caller's thread.
#[async_trait]
pub trait NativePeerConnection: Send + Sync {
    async fn create_offer(&self, constraints: &MediaConstraints) -> EngineResult<SessionDescription>;

    async fn create_answer(&self, constraints: &MediaConstraints) -> EngineResult<SessionDescription>;

    async fn set_local_description(&self, description: &SessionDescription) -> EngineResult<()>;

    async fn set_remote_description(&self, description: &SessionDescription) -> EngineResult<()>;

    fn local_description(&self) -> Option<SessionDescription>;

    fn remote_description(&self) -> Option<SessionDescription>;

    /// Returns false when the candidate could not be applied
    fn add_ice_candidate(&self, candidate: &IceCandidate) -> bool;

    fn add_stream(&self, stream: &Arc<dyn NativeMediaStream>) -> bool;

    fn remove_stream(&self, stream: &Arc<dyn NativeMediaStream>) -> bool;

    fn senders(&self) -> Vec<Arc<dyn NativeRtpSender>>;

    fn create_data_channel(
        &self,
        label: &str,
        init: &DataChannelInit,
    ) -> EngineResult<Arc<dyn NativeDataChannel>>;

    fn create_dtmf_sender(
        &self,
        track: &Arc<dyn NativeMediaTrack>,
    ) -> EngineResult<Arc<dyn NativeDtmfSender>>;

    /// Statistics for one track, or for the whole connection
    async fn stats(&self, track: Option<Arc<dyn NativeMediaTrack>>) -> EngineResult<Vec<StatsReport>>;

    fn close(&self);
}

/// Native SCTP data channel
pub trait NativeDataChannel: Send + Sync {
    /// Parameters as negotiated by the engine
    fn parameters(&self) -> DataChannelParameters;

    fn ready_state(&self) -> DataChannelState;

    fn buffered_amount(&self) -> u64;

    /// Returns false when the engine refuses to enqueue the message
    fn send(&self, message: ChannelMessage) -> bool;

    fn close(&self);

    fn register_observer(&self, observer: Arc<dyn DataChannelObserver>);

    fn unregister_observer(&self);
}

/// Outgoing RTP sender
pub trait NativeRtpSender: Send + Sync {
    fn track(&self) -> Option<Arc<dyn NativeMediaTrack>>;

    fn replace_track(&self, track: Arc<dyn NativeMediaTrack>) -> bool;
}

/// Native DTMF sender bound to an audio track
pub trait NativeDtmfSender: Send + Sync {
    /// Queue tones for playout. There is no completion signal.
    fn insert_dtmf(&self, tones: &str, duration: Duration, inter_tone_gap: Duration) -> bool;
}

/// Native media stream
pub trait NativeMediaStream: Send + Sync {
    fn id(&self) -> String;

    fn tracks(&self) -> Vec<Arc<dyn NativeMediaTrack>>;

    fn add_track(&self, track: Arc<dyn NativeMediaTrack>) -> bool;
}

/// Native media track
pub trait NativeMediaTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn label(&self) -> String;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn ready_state(&self) -> TrackState;

    /// Returns false when the engine has no stop primitive
    fn stop(&self) -> bool;

    fn register_observer(&self, observer: Arc<dyn TrackObserver>);
}

/// Capture device position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePosition {
    Front,
    Back,
    Unspecified,
}

/// An enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub unique_id: String,
    pub label: String,
    pub kind: MediaKind,
    pub position: DevicePosition,
}

/// Capture permission and device enumeration
pub trait DeviceProvider: Send + Sync {
    fn authorization_status(&self, kind: MediaKind) -> AuthorizationStatus;

    fn devices(&self, kind: MediaKind) -> Vec<CaptureDevice>;
}

/// State of a video capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initializing,
    Live,
    Ended,
    Muted,
}

/// Native video capture source
pub trait NativeVideoSource: Send + Sync {
    fn state(&self) -> SourceState;
}

/// Factory for local capture objects
pub trait CapturePipeline: Send + Sync {
    fn create_media_stream(&self, stream_id: &str) -> Arc<dyn NativeMediaStream>;

    fn create_video_source(
        &self,
        device: &CaptureDevice,
        constraints: &VideoConstraints,
    ) -> EngineResult<Arc<dyn NativeVideoSource>>;

    fn create_video_track(
        &self,
        source: &Arc<dyn NativeVideoSource>,
        track_id: &str,
    ) -> EngineResult<Arc<dyn NativeMediaTrack>>;

    fn create_audio_track(&self, track_id: &str) -> EngineResult<Arc<dyn NativeMediaTrack>>;
}

/// Peer connection notifications
pub trait PeerConnectionObserver: Send + Sync {
    fn on_signaling_change(&self, state: SignalingState);

    fn on_ice_gathering_change(&self, state: IceGatheringState);

    fn on_ice_candidate(&self, candidate: IceCandidate);

    fn on_ice_connection_change(&self, state: IceConnectionState);

    fn on_add_stream(&self, stream: Arc<dyn NativeMediaStream>);

    fn on_remove_stream(&self, stream_id: String);

    fn on_renegotiation_needed(&self);

    fn on_data_channel(&self, channel: Arc<dyn NativeDataChannel>);
}

/// Data channel notifications
pub trait DataChannelObserver: Send + Sync {
    fn on_state_change(&self, state: DataChannelState);

    fn on_message(&self, message: ChannelMessage);

    fn on_buffered_amount_change(&self, amount: u64);
}

/// Track notifications
pub trait TrackObserver: Send + Sync {
    fn on_state_change(&self, state: TrackState);
}
