//! Data model shared between the bridge, its engine and its controller
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


use crate::error::{Result, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Serializes `None` as the JSON literal `false`.
///
/// Controllers distinguish "absent" from "present" by a boolean sentinel
/// rather than `null` (e.g. the end-of-candidates record).
pub fn false_if_none<T, S>(value: &Option<T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match value {
        Some(inner) => inner.serialize(serializer),
        None => serializer.serialize_bool(false),
    }
}

// ============================================================================
// Session descriptions and candidates
// ============================================================================

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            "pranswer" => Ok(SdpType::Pranswer),
            other => Err(TypesError::InvalidSdpType(other.to_string())),
        }
    }
}

/// `{type, sdp}` pair exchanged during offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// Trickle ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub sdp_mid: String,
    #[serde(default)]
    pub sdp_m_line_index: u32,
    #[serde(default)]
    pub candidate: String,
}

/// Result of `addIceCandidate`: whatever remote description is currently set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDescriptionSnapshot {
    #[serde(serialize_with = "false_if_none")]
    pub remote_description: Option<SessionDescription>,
}

// ============================================================================
// Session states
// ============================================================================

/// Which side a description is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSource {
    Local,
    Remote,
}

/// Offer/answer signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveLocalPranswer,
    HaveRemoteOffer,
    HaveRemotePranswer,
    Closed,
}

impl SignalingState {
    /// State reached by applying a description of `sdp_type` from `source`,
    /// or `None` when the offer/answer model forbids the transition.
    pub fn next(self, source: DescriptionSource, sdp_type: SdpType) -> Option<SignalingState> {
        use DescriptionSource::{Local, Remote};
        use SignalingState::*;

        match (self, source, sdp_type) {
            (Stable | HaveLocalOffer, Local, SdpType::Offer) => Some(HaveLocalOffer),
            (HaveRemoteOffer | HaveLocalPranswer, Local, SdpType::Answer) => Some(Stable),
            (HaveRemoteOffer | HaveLocalPranswer, Local, SdpType::Pranswer) => Some(HaveLocalPranswer),
            (Stable | HaveRemoteOffer, Remote, SdpType::Offer) => Some(HaveRemoteOffer),
            (HaveLocalOffer | HaveRemotePranswer, Remote, SdpType::Answer) => Some(Stable),
            (HaveLocalOffer | HaveRemotePranswer, Remote, SdpType::Pranswer) => Some(HaveRemotePranswer),
            _ => None,
        }
    }

    /// Whether an answer can be created in this state
    pub fn can_answer(self) -> bool {
        matches!(self, SignalingState::HaveRemoteOffer | SignalingState::HaveLocalPranswer)
    }
}

/// ICE candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// ICE connection state, forwarded verbatim from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Data channel ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Media track ready state. `Ended` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

// ============================================================================
// Media
// ============================================================================

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(TypesError::InvalidMediaKind(other.to_string())),
        }
    }
}

/// Capture authorization outcome for one media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    Restricted,
    NotDetermined,
}

impl AuthorizationStatus {
    /// Undetermined and authorized both let acquisition proceed
    pub fn permits_capture(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized | AuthorizationStatus::NotDetermined)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationStatus::Authorized => "authorized",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Restricted => "restricted",
            AuthorizationStatus::NotDetermined => "not determined",
        };
        f.write_str(s)
    }
}

/// Snapshot of a media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
    pub enabled: bool,
    pub ready_state: TrackState,
}

/// Snapshot of a media stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: String,
    pub audio_tracks: Vec<TrackInfo>,
    pub video_tracks: Vec<TrackInfo>,
}

/// `getUserMedia`-style request
///
/// Numeric fields default to 0, meaning "unconstrained".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserMediaConstraints {
    pub audio: bool,
    pub video: bool,
    #[serde(alias = "videoDeviceId")]
    pub device_id: Option<String>,
    #[serde(alias = "videoMinWidth")]
    pub min_width: i64,
    #[serde(alias = "videoMaxWidth")]
    pub max_width: i64,
    #[serde(alias = "videoMinHeight")]
    pub min_height: i64,
    #[serde(alias = "videoMaxHeight")]
    pub max_height: i64,
    #[serde(alias = "videoMinFrameRate")]
    pub min_frame_rate: f64,
    #[serde(alias = "videoMaxFrameRate")]
    pub max_frame_rate: f64,
}

/// `mute()` request. Absent flags leave that kind untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuteRequest {
    pub audio: Option<bool>,
    pub video: Option<bool>,
}

impl MuteRequest {
    pub fn flag_for(&self, kind: MediaKind) -> Option<bool> {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

// ============================================================================
// Data channels
// ============================================================================

/// Options accepted by `createDataChannel`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataChannelInit {
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: Option<String>,
    pub negotiated: Option<bool>,
    pub id: Option<u16>,
}

impl DataChannelInit {
    /// Partial reliability allows one limit, never both
    pub fn has_conflicting_limits(&self) -> bool {
        self.max_packet_life_time.is_some() && self.max_retransmits.is_some()
    }
}

/// Channel parameters as reported back by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelParameters {
    pub label: String,
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    pub negotiated: bool,
    #[serde(rename = "id")]
    pub stream_id: u16,
    pub ready_state: DataChannelState,
    pub buffered_amount: u64,
}

/// Channel parameters plus the bridge handle a controller keys it by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelInfo {
    #[serde(rename = "dcId")]
    pub dc_id: u32,
    #[serde(flatten)]
    pub parameters: DataChannelParameters,
}

// ============================================================================
// Configuration passed to the engine
// ============================================================================

/// STUN/TURN server entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Candidate types the engine may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

impl FromStr for IceTransportPolicy {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(IceTransportPolicy::All),
            "relay" => Ok(IceTransportPolicy::Relay),
            other => Err(TypesError::Serialization(format!("unknown ICE transport policy: {}", other))),
        }
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
}

/// Offer/answer options as supplied by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferOptions {
    pub offer_to_receive_audio: Option<bool>,
    pub offer_to_receive_video: Option<bool>,
}

/// Resolved media constraints handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

impl MediaConstraints {
    /// No options means receive everything; given options default missing
    /// flags to false.
    pub fn from_options(options: Option<&OfferOptions>) -> Self {
        match options {
            None => MediaConstraints {
                offer_to_receive_audio: true,
                offer_to_receive_video: true,
            },
            Some(options) => MediaConstraints {
                offer_to_receive_audio: options.offer_to_receive_audio.unwrap_or(false),
                offer_to_receive_video: options.offer_to_receive_video.unwrap_or(false),
            },
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::from_options(None)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// One entry of a `getStats` report array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub report_id: String,
    #[serde(rename = "type")]
    pub report_type: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, String>,
}
