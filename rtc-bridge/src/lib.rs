//! Peer connection bridge for a callback-driven RTC engine
//!
//! This crate sits between a controller and a native WebRTC-style engine:
//! - Offer/answer signaling and trickle ICE through an actor session
//! - Data channels and DTMF senders addressed by small integer ids
//! - Track monitors that buffer events until a listener is registered
//! - Constraint-driven local media acquisition
//!
//! # Engine seams
//!
//! Everything native lives behind the traits in [`engine`]. With the
//! `loopback` feature enabled, the `loopback` module implements all of
//! them in-process.
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


pub mod acquisition;
pub mod buffered_sink;
pub mod data_channel;
mod dispatch;
pub mod dtmf;
pub mod engine;
pub mod error;
pub mod identifier;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;
mod peer_connection;
pub mod sdp;
pub mod session;
pub mod track;

pub use acquisition::{MediaAcquisition, VideoConstraints};
pub use buffered_sink::{channel_listener, BufferedEventSink, EventListener};
pub use data_channel::{ChannelListener, ChannelMessage, DataChannelRegistry};
pub use dtmf::DtmfSenderRegistry;
pub use error::{BridgeError, BridgeResult};
pub use identifier::IdentifierRegistry;
pub use peer_connection::SessionSnapshot;
pub use session::{PeerConnectionSession, SessionOptions, DEFAULT_CHANNEL_ID_BASE};
pub use track::{MediaStream, MediaStreamTrack, TrackListener};

pub use rtc_bridge_types as types;
