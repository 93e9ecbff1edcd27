//! Observer implementations that marshal native callbacks onto the session task
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


use crate::data_channel::ChannelMessage;
use crate::engine::*;
use crate::session::Envelope;
use rtc_bridge_types::*;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tracing::debug;

/// Routes a data channel notification to the right registry entry.
///
/// The serial distinguishes two channels that held the same id at different
/// times, so a late notification for a closed channel never reaches its
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChannelKey {
    pub dc_id: u32,
    pub serial: u64,
}

#[derive(Debug)]
pub(crate) enum ChannelNotification {
    StateChange(DataChannelState),
    Message(ChannelMessage),
    BufferedAmount(u64),
}

/// A native callback, captured for processing on the session task
pub(crate) enum NativeEvent {
    SignalingChange(SignalingState),
    IceGatheringChange(IceGatheringState),
    IceCandidate(IceCandidate),
    IceConnectionChange(IceConnectionState),
    AddStream(Arc<dyn NativeMediaStream>),
    RemoveStream(String),
    RenegotiationNeeded,
    DataChannel(Arc<dyn NativeDataChannel>),
    Channel {
        key: ChannelKey,
        notification: ChannelNotification,
    },
}

impl NativeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NativeEvent::SignalingChange(_) => "signaling_change",
            NativeEvent::IceGatheringChange(_) => "ice_gathering_change",
            NativeEvent::IceCandidate(_) => "ice_candidate",
            NativeEvent::IceConnectionChange(_) => "ice_connection_change",
            NativeEvent::AddStream(_) => "add_stream",
            NativeEvent::RemoveStream(_) => "remove_stream",
            NativeEvent::RenegotiationNeeded => "renegotiation_needed",
            NativeEvent::DataChannel(_) => "data_channel",
            NativeEvent::Channel { .. } => "channel",
        }
    }
}

/// Enqueues native notifications on the owning session's queue.
///
/// Holds only a weak sender: once every controller handle is gone the
/// session task ends and late notifications are discarded.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: WeakUnboundedSender<Envelope>,
}

impl Dispatcher {
    pub fn new(tx: &UnboundedSender<Envelope>) -> Self {
        Self { tx: tx.downgrade() }
    }

    fn forward(&self, event: NativeEvent) {
        let name = event.name();
        match self.tx.upgrade() {
            Some(tx) => {
                if tx.send(Envelope::Native(event)).is_err() {
                    debug!(notification = name, "Session task stopped, dropping notification");
                }
            }
            None => debug!(notification = name, "Session released, dropping notification"),
        }
    }

    /// Observer to register on a wrapped native data channel
    pub fn channel_observer(&self, key: ChannelKey) -> Arc<dyn DataChannelObserver> {
        Arc::new(ChannelRelay {
            dispatcher: self.clone(),
            key,
        })
    }
}

impl PeerConnectionObserver for Dispatcher {
    fn on_signaling_change(&self, state: SignalingState) {
        self.forward(NativeEvent::SignalingChange(state));
    }

    fn on_ice_gathering_change(&self, state: IceGatheringState) {
        self.forward(NativeEvent::IceGatheringChange(state));
    }

    fn on_ice_candidate(&self, candidate: IceCandidate) {
        self.forward(NativeEvent::IceCandidate(candidate));
    }

    fn on_ice_connection_change(&self, state: IceConnectionState) {
        self.forward(NativeEvent::IceConnectionChange(state));
    }

    fn on_add_stream(&self, stream: Arc<dyn NativeMediaStream>) {
        self.forward(NativeEvent::AddStream(stream));
    }

    fn on_remove_stream(&self, stream_id: String) {
        self.forward(NativeEvent::RemoveStream(stream_id));
    }

    fn on_renegotiation_needed(&self) {
        self.forward(NativeEvent::RenegotiationNeeded);
    }

    fn on_data_channel(&self, channel: Arc<dyn NativeDataChannel>) {
        self.forward(NativeEvent::DataChannel(channel));
    }
}

struct ChannelRelay {
    dispatcher: Dispatcher,
    key: ChannelKey,
}

impl ChannelRelay {
    fn forward(&self, notification: ChannelNotification) {
        self.dispatcher.forward(NativeEvent::Channel {
            key: self.key,
            notification,
        });
    }
}

impl DataChannelObserver for ChannelRelay {
    fn on_state_change(&self, state: DataChannelState) {
        self.forward(ChannelNotification::StateChange(state));
    }

    fn on_message(&self, message: ChannelMessage) {
        self.forward(ChannelNotification::Message(message));
    }

    fn on_buffered_amount_change(&self, amount: u64) {
        self.forward(ChannelNotification::BufferedAmount(amount));
    }
}
