//! Event records delivered to the controller
//!
//! Each record serializes as `{ "type": <name>, ...payload }`.

use serde::{Deserialize, Serialize};

use crate::schemas::*;

/// Records produced on the session's top-level event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "signalingstatechange", rename_all = "camelCase")]
    SignalingStateChange { signaling_state: SignalingState },

    #[serde(rename = "icegatheringstatechange", rename_all = "camelCase")]
    IceGatheringStateChange { ice_gathering_state: IceGatheringState },

    /// A discovered candidate, or `candidate: false` once gathering completes
    #[serde(rename = "icecandidate", rename_all = "camelCase")]
    IceCandidate {
        #[serde(serialize_with = "false_if_none")]
        candidate: Option<IceCandidate>,
        #[serde(serialize_with = "false_if_none")]
        local_description: Option<SessionDescription>,
    },

    #[serde(rename = "iceconnectionstatechange", rename_all = "camelCase")]
    IceConnectionStateChange { ice_connection_state: IceConnectionState },

    #[serde(rename = "addstream")]
    AddStream { stream: StreamInfo },

    #[serde(rename = "removestream", rename_all = "camelCase")]
    RemoveStream { stream_id: String },

    #[serde(rename = "negotiationneeded")]
    NegotiationNeeded,

    /// Remote-initiated channel, keyed by the bridge-minted `dcId`
    #[serde(rename = "datachannel")]
    DataChannel { channel: DataChannelInfo },
}

impl SessionEvent {
    /// Wire name of the record
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SignalingStateChange { .. } => "signalingstatechange",
            SessionEvent::IceGatheringStateChange { .. } => "icegatheringstatechange",
            SessionEvent::IceCandidate { .. } => "icecandidate",
            SessionEvent::IceConnectionStateChange { .. } => "iceconnectionstatechange",
            SessionEvent::AddStream { .. } => "addstream",
            SessionEvent::RemoveStream { .. } => "removestream",
            SessionEvent::NegotiationNeeded => "negotiationneeded",
            SessionEvent::DataChannel { .. } => "datachannel",
        }
    }

    /// True for the synthetic end-of-candidates record
    pub fn is_end_of_candidates(&self) -> bool {
        matches!(self, SessionEvent::IceCandidate { candidate: None, .. })
    }
}

/// Records produced on a data channel's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    /// Definitive parameters right after creation
    #[serde(rename = "new")]
    New { channel: DataChannelInfo },

    #[serde(rename = "statechange", rename_all = "camelCase")]
    StateChange { ready_state: DataChannelState },

    #[serde(rename = "bufferedamount", rename_all = "camelCase")]
    BufferedAmount { buffered_amount: u64 },
}

/// Records produced on a media track's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "statechange", rename_all = "camelCase")]
    StateChange { ready_state: TrackState, enabled: bool },
}

impl TrackEvent {
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            TrackEvent::StateChange {
                ready_state: TrackState::Ended,
                ..
            }
        )
    }
}
