//! Data channel registry
//!
//! Owns every data channel of a session, whether created by the controller
//! or opened by the remote peer. Each channel buffers its lifecycle events
//! and its received messages until the controller attaches a listener.
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


use crate::buffered_sink::{BufferedEventSink, EventListener};
use crate::dispatch::{ChannelKey, ChannelNotification, Dispatcher};
use crate::engine::{NativeDataChannel, NativePeerConnection};
use crate::error::{BridgeError, BridgeResult};
use crate::identifier::IdentifierRegistry;
use bytes::Bytes;
use rtc_bridge_types::{ChannelEvent, DataChannelInfo, DataChannelInit, DataChannelState};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payload carried over a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(text) => text.len(),
            ChannelMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, ChannelMessage::Binary(_))
    }
}

/// Controller-side listener pair for one channel: lifecycle events and
/// received messages arrive on separate streams.
pub struct ChannelListener {
    events: Box<dyn EventListener<ChannelEvent>>,
    messages: Box<dyn EventListener<ChannelMessage>>,
}

impl ChannelListener {
    pub fn new<A, B>(events: A, messages: B) -> Self
    where
        A: EventListener<ChannelEvent> + 'static,
        B: EventListener<ChannelMessage> + 'static,
    {
        Self {
            events: Box::new(events),
            messages: Box::new(messages),
        }
    }
}

pub(crate) struct DataChannel {
    dc_id: u32,
    serial: u64,
    native: Arc<dyn NativeDataChannel>,
    ready_state: DataChannelState,
    events: BufferedEventSink<ChannelEvent>,
    messages: BufferedEventSink<ChannelMessage>,
    /// Latest amount reported while no listener was attached
    pending_buffered_amount: Option<u64>,
}

impl DataChannel {
    fn wrap(dc_id: u32, serial: u64, native: Arc<dyn NativeDataChannel>, dispatcher: &Dispatcher) -> Self {
        let ready_state = native.ready_state();
        native.register_observer(dispatcher.channel_observer(ChannelKey { dc_id, serial }));

        Self {
            dc_id,
            serial,
            native,
            ready_state,
            events: BufferedEventSink::new(),
            messages: BufferedEventSink::new(),
            pending_buffered_amount: None,
        }
    }

    fn info(&self) -> DataChannelInfo {
        let mut parameters = self.native.parameters();
        parameters.ready_state = self.ready_state;
        DataChannelInfo {
            dc_id: self.dc_id,
            parameters,
        }
    }

    /// A channel that moved on before it was wrapped reports where it is now
    fn replay_current_state(&mut self) {
        if self.ready_state != DataChannelState::Connecting {
            self.events.emit(ChannelEvent::StateChange {
                ready_state: self.ready_state,
            });
        }
    }

    fn set_listener(&mut self, listener: ChannelListener) -> usize {
        let mut replayed = self.events.arm(listener.events);
        replayed += self.messages.arm(listener.messages);

        if let Some(buffered_amount) = self.pending_buffered_amount.take() {
            self.events.emit(ChannelEvent::BufferedAmount { buffered_amount });
        }

        debug!(dc_id = self.dc_id, replayed, "Data channel listener attached");
        replayed
    }

    fn handle(&mut self, notification: ChannelNotification) {
        match notification {
            ChannelNotification::StateChange(state) => {
                if state == self.ready_state {
                    debug!(dc_id = self.dc_id, state = ?state, "Ignoring repeated channel state");
                    return;
                }
                self.ready_state = state;
                self.events.emit(ChannelEvent::StateChange { ready_state: state });
            }
            ChannelNotification::Message(message) => self.messages.emit(message),
            ChannelNotification::BufferedAmount(buffered_amount) => {
                if self.events.is_armed() {
                    self.events.emit(ChannelEvent::BufferedAmount { buffered_amount });
                } else {
                    self.pending_buffered_amount = Some(buffered_amount);
                }
            }
        }
    }

    fn send(&self, message: ChannelMessage) -> BridgeResult<()> {
        let len = message.len();
        if self.native.send(message) {
            Ok(())
        } else {
            warn!(dc_id = self.dc_id, len, state = ?self.ready_state, "Engine refused data channel message");
            Err(BridgeError::Send(format!(
                "data channel {} refused {} byte message in state {:?}",
                self.dc_id, len, self.ready_state
            )))
        }
    }

    fn close(&mut self) {
        self.native.unregister_observer();
        self.native.close();

        if self.ready_state != DataChannelState::Closed {
            self.ready_state = DataChannelState::Closed;
            if self.events.is_armed() {
                self.events.emit(ChannelEvent::StateChange {
                    ready_state: DataChannelState::Closed,
                });
            }
        }
    }
}

/// Lifecycle and message I/O for the data channels of one session
pub struct DataChannelRegistry {
    ids: IdentifierRegistry,
    channels: HashMap<u32, DataChannel>,
    next_serial: u64,
}

impl DataChannelRegistry {
    /// `id_base` is the first id minted for remote-initiated channels
    pub fn new(id_base: u32) -> Self {
        Self {
            ids: IdentifierRegistry::new(id_base),
            channels: HashMap::new(),
            next_serial: 0,
        }
    }

    fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Create an outgoing channel under a caller-supplied id.
    ///
    /// A `new` event carrying the engine's view of the parameters is
    /// emitted into the channel's sink, and the same info is returned.
    pub(crate) fn create(
        &mut self,
        native_pc: &dyn NativePeerConnection,
        dispatcher: &Dispatcher,
        dc_id: u32,
        label: &str,
        init: &DataChannelInit,
        listener: Option<ChannelListener>,
    ) -> BridgeResult<DataChannelInfo> {
        if init.has_conflicting_limits() {
            return Err(BridgeError::ChannelCreation(
                "maxPacketLifeTime and maxRetransmits are mutually exclusive".to_string(),
            ));
        }
        if self.ids.contains(dc_id) {
            return Err(BridgeError::ChannelIdInUse(dc_id));
        }

        let native = native_pc
            .create_data_channel(label, init)
            .map_err(|e| BridgeError::ChannelCreation(e.to_string()))?;

        self.ids.reserve(dc_id);
        let serial = self.next_serial();
        let mut channel = DataChannel::wrap(dc_id, serial, native, dispatcher);

        if let Some(listener) = listener {
            channel.set_listener(listener);
        }

        let info = channel.info();
        channel.events.emit(ChannelEvent::New {
            channel: info.clone(),
        });
        channel.replay_current_state();

        info!(
            dc_id,
            label,
            stream_id = info.parameters.stream_id,
            "Data channel created"
        );
        self.channels.insert(dc_id, channel);
        Ok(info)
    }

    /// Take ownership of a channel opened by the remote peer, minting its id.
    ///
    /// When no id is left the native channel is closed and never surfaced.
    pub(crate) fn adopt(
        &mut self,
        native: Arc<dyn NativeDataChannel>,
        dispatcher: &Dispatcher,
    ) -> BridgeResult<DataChannelInfo> {
        let Some(dc_id) = self.ids.allocate() else {
            native.close();
            return Err(BridgeError::ChannelCreation(format!(
                "no free data channel id left ({} in use)",
                self.ids.len()
            )));
        };
        let serial = self.next_serial();
        let mut channel = DataChannel::wrap(dc_id, serial, native, dispatcher);
        channel.replay_current_state();

        let info = channel.info();
        info!(dc_id, label = %info.parameters.label, "Remote data channel opened");
        self.channels.insert(dc_id, channel);
        Ok(info)
    }

    /// Attach the listener and flush buffered events, then buffered messages.
    /// Returns how many records were replayed.
    pub fn set_listener(&mut self, dc_id: u32, listener: ChannelListener) -> BridgeResult<usize> {
        Ok(self.get_mut(dc_id)?.set_listener(listener))
    }

    pub fn send(&self, dc_id: u32, message: ChannelMessage) -> BridgeResult<()> {
        self.get(dc_id)?.send(message)
    }

    pub fn info(&self, dc_id: u32) -> BridgeResult<DataChannelInfo> {
        Ok(self.get(dc_id)?.info())
    }

    /// Close and forget a channel. Unknown ids are not an error.
    pub fn close(&mut self, dc_id: u32) -> BridgeResult<()> {
        if let Some(mut channel) = self.channels.remove(&dc_id) {
            channel.close();
            self.ids.release(dc_id);
            info!(dc_id, "Data channel closed");
        }
        Ok(())
    }

    pub(crate) fn close_all(&mut self) {
        for (dc_id, mut channel) in self.channels.drain() {
            channel.close();
            debug!(dc_id, "Data channel released");
        }
        self.ids.clear();
    }

    pub(crate) fn handle_notification(&mut self, key: ChannelKey, notification: ChannelNotification) {
        match self.channels.get_mut(&key.dc_id) {
            Some(channel) if channel.serial == key.serial => channel.handle(notification),
            _ => debug!(dc_id = key.dc_id, ?notification, "Notification for released data channel"),
        }
    }

    pub fn contains(&self, dc_id: u32) -> bool {
        self.channels.contains_key(&dc_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn get(&self, dc_id: u32) -> BridgeResult<&DataChannel> {
        self.channels
            .get(&dc_id)
            .ok_or_else(|| BridgeError::NotFound(format!("data channel {}", dc_id)))
    }

    fn get_mut(&mut self, dc_id: u32) -> BridgeResult<&mut DataChannel> {
        self.channels
            .get_mut(&dc_id)
            .ok_or_else(|| BridgeError::NotFound(format!("data channel {}", dc_id)))
    }
}
