//! Buffer-until-registered event delivery
//!
//! Channels and tracks start producing events before the controller has had
//! a chance to attach a listener. A [`BufferedEventSink`] queues those events
//! and replays them, in order and exactly once, when a listener is armed.
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


use std::collections::VecDeque;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Receiver of an ordered event stream
pub trait EventListener<E>: Send {
    fn on_event(&mut self, event: E);
}

impl<E, F> EventListener<E> for F
where
    F: FnMut(E) + Send,
{
    fn on_event(&mut self, event: E) {
        self(event)
    }
}

/// Adapt an mpsc sender into a listener. Events sent after the receiver is
/// dropped are discarded.
pub fn channel_listener<E>(tx: UnboundedSender<E>) -> impl EventListener<E>
where
    E: Send + 'static,
{
    move |event: E| {
        if tx.send(event).is_err() {
            debug!("Listener receiver dropped, discarding event");
        }
    }
}

enum SinkState<E> {
    Unarmed(VecDeque<E>),
    Armed(Box<dyn EventListener<E>>),
}

/// Event queue that becomes a pass-through once a listener is armed
pub struct BufferedEventSink<E> {
    state: SinkState<E>,
}

impl<E> BufferedEventSink<E> {
    pub fn new() -> Self {
        Self {
            state: SinkState::Unarmed(VecDeque::new()),
        }
    }

    /// Deliver to the armed listener, or queue until one is armed
    pub fn emit(&mut self, event: E) {
        match &mut self.state {
            SinkState::Armed(listener) => listener.on_event(event),
            SinkState::Unarmed(queue) => queue.push_back(event),
        }
    }

    /// Install `listener` and replay everything queued so far.
    ///
    /// Returns how many events were replayed. Re-arming replaces the
    /// listener and replays nothing, since the queue was already drained.
    pub fn arm(&mut self, mut listener: Box<dyn EventListener<E>>) -> usize {
        let replayed = match std::mem::replace(&mut self.state, SinkState::Unarmed(VecDeque::new())) {
            SinkState::Unarmed(queue) => {
                let count = queue.len();
                for event in queue {
                    listener.on_event(event);
                }
                count
            }
            SinkState::Armed(_) => 0,
        };

        self.state = SinkState::Armed(listener);
        replayed
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SinkState::Armed(_))
    }

    /// Number of events waiting for a listener
    pub fn pending(&self) -> usize {
        match &self.state {
            SinkState::Unarmed(queue) => queue.len(),
            SinkState::Armed(_) => 0,
        }
    }
}

impl<E> Default for BufferedEventSink<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for BufferedEventSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedEventSink")
            .field("armed", &self.is_armed())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Box<dyn EventListener<u32>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Box::new(move |event: u32| sink.lock().unwrap().push(event)))
    }

    #[test]
    fn test_replays_in_order_on_arm() {
        let mut sink = BufferedEventSink::new();
        sink.emit(1);
        sink.emit(2);
        sink.emit(3);
        assert_eq!(sink.pending(), 3);

        let (seen, listener) = recorder();
        assert_eq!(sink.arm(listener), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        sink.emit(4);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_second_arm_replays_nothing() {
        let mut sink = BufferedEventSink::new();
        sink.emit(7);

        let (first, listener) = recorder();
        assert_eq!(sink.arm(listener), 1);

        let (second, listener) = recorder();
        assert_eq!(sink.arm(listener), 0);
        sink.emit(8);

        assert_eq!(*first.lock().unwrap(), vec![7]);
        assert_eq!(*second.lock().unwrap(), vec![8]);
    }

    #[test]
    fn test_arm_on_empty_queue() {
        let mut sink: BufferedEventSink<u32> = BufferedEventSink::default();
        let (seen, listener) = recorder();
        assert_eq!(sink.arm(listener), 0);
        assert!(sink.is_armed());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_listener_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = BufferedEventSink::new();
        sink.emit("queued");
        sink.arm(Box::new(channel_listener(tx)));
        sink.emit("live");

        assert_eq!(rx.recv().await, Some("queued"));
        assert_eq!(rx.recv().await, Some("live"));
    }

    #[test]
    fn test_channel_listener_tolerates_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        drop(rx);
        let mut listener = channel_listener(tx);
        listener.on_event(1);
    }
}
