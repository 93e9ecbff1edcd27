//! Error types for the peer-connection bridge
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


use rtc_bridge_types::{AuthorizationStatus, MediaKind};
use std::time::Duration;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to the controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Capture permission denied or restricted
    #[error("{kind} capture not permitted: {status}")]
    Authorization {
        kind: MediaKind,
        status: AuthorizationStatus,
    },

    /// No capture device matched the request
    #[error("No {kind} device found{}", requested_id(.device_id))]
    DeviceNotFound {
        kind: MediaKind,
        device_id: Option<String>,
    },

    /// The capture source could not honour the requested constraints
    #[error("Constraints not satisfied: {0}")]
    ConstraintsNotSatisfied(String),

    /// Invalid options or engine refusal while creating a data channel
    #[error("Data channel creation failed: {0}")]
    ChannelCreation(String),

    /// Caller-supplied data channel id already registered
    #[error("Data channel id {0} already in use")]
    ChannelIdInUse(u32),

    /// Caller-supplied DTMF sender id already registered
    #[error("DTMF sender id {0} already in use")]
    DtmfSenderIdInUse(u32),

    /// Offer/answer failure, including forbidden signaling transitions
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The session has been closed
    #[error("Peer connection is closed")]
    ClosedSession,

    /// Unknown channel, sender, track or stream
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine refused to enqueue a message
    #[error("Send failed: {0}")]
    Send(String),

    /// A negotiation call exceeded the configured timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other engine failure
    #[error("Engine error: {0}")]
    Engine(String),
}

fn requested_id(device_id: &Option<String>) -> String {
    device_id
        .as_ref()
        .map(|id| format!(" for id {}", id))
        .unwrap_or_default()
}

impl From<crate::engine::EngineError> for BridgeError {
    fn from(err: crate::engine::EngineError) -> Self {
        BridgeError::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BridgeError::Authorization {
            kind: MediaKind::Video,
            status: AuthorizationStatus::Denied,
        };
        assert_eq!(err.to_string(), "video capture not permitted: denied");

        let err = BridgeError::DeviceNotFound {
            kind: MediaKind::Video,
            device_id: Some("cam-9".to_string()),
        };
        assert_eq!(err.to_string(), "No video device found for id cam-9");

        let err = BridgeError::DeviceNotFound {
            kind: MediaKind::Video,
            device_id: None,
        };
        assert_eq!(err.to_string(), "No video device found");
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: BridgeError = crate::engine::EngineError::Rejected("busy".to_string()).into();
        assert!(matches!(err, BridgeError::Engine(ref msg) if msg.contains("busy")));
    }

    #[test]
    fn test_engine_result_propagates_into_bridge_result() {
        fn engine_call(fail: bool) -> crate::engine::EngineResult<u32> {
            if fail {
                Err(crate::engine::EngineError::Closed)
            } else {
                Ok(7)
            }
        }
        fn bridge_call(fail: bool) -> BridgeResult<u32> {
            Ok(engine_call(fail)? + 1)
        }

        assert_eq!(bridge_call(false), Ok(8));
        assert_eq!(
            bridge_call(true),
            Err(BridgeError::Engine("native object closed".to_string()))
        );
    }
}
