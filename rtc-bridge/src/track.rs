//! Media track monitors and stream containers
//!
//! A track can be shared between an acquisition result and several
//! sessions, so [`MediaStreamTrack`] is a cloneable handle. Every state
//! change and every flush happens under the handle's lock; listeners must
//! not call back into the same track from inside `on_event`.
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
use crate::engine::{NativeMediaStream, NativeMediaTrack, TrackObserver};
use parking_lot::Mutex;
use rtc_bridge_types::{MediaKind, StreamInfo, TrackEvent, TrackInfo, TrackState};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Listener for one track: the `statechange` stream plus a callback that
/// runs right after an `ended` record has been delivered.
pub struct TrackListener {
    events: Box<dyn EventListener<TrackEvent>>,
    on_ended: Box<dyn FnMut() + Send>,
}

impl TrackListener {
    pub fn new<L, F>(events: L, on_ended: F) -> Self
    where
        L: EventListener<TrackEvent> + 'static,
        F: FnMut() + Send + 'static,
    {
        Self {
            events: Box::new(events),
            on_ended: Box::new(on_ended),
        }
    }
}

impl EventListener<TrackEvent> for TrackListener {
    fn on_event(&mut self, event: TrackEvent) {
        let ended = event.is_ended();
        self.events.on_event(event);
        if ended {
            (self.on_ended)();
        }
    }
}

struct TrackMonitor {
    native: Arc<dyn NativeMediaTrack>,
    label: String,
    ready_state: TrackState,
    enabled: bool,
    sink: BufferedEventSink<TrackEvent>,
}

impl TrackMonitor {
    /// Returns false when the track had already ended
    fn transition(&mut self, state: TrackState) -> bool {
        if self.ready_state == TrackState::Ended || self.ready_state == state {
            return false;
        }

        self.ready_state = state;
        self.sink.emit(TrackEvent::StateChange {
            ready_state: state,
            enabled: self.enabled,
        });
        true
    }
}

/// Shared handle to a monitored media track
#[derive(Clone)]
pub struct MediaStreamTrack {
    id: Arc<str>,
    kind: MediaKind,
    inner: Arc<Mutex<TrackMonitor>>,
}

impl MediaStreamTrack {
    /// Wrap a native track and start observing it
    pub fn new(native: Arc<dyn NativeMediaTrack>) -> Self {
        let id: Arc<str> = Arc::from(native.id());
        let kind = native.kind();
        let ready_state = native.ready_state();

        let mut monitor = TrackMonitor {
            label: native.label(),
            enabled: native.is_enabled(),
            ready_state: TrackState::Live,
            sink: BufferedEventSink::new(),
            native: Arc::clone(&native),
        };
        // A track that ended before it was wrapped still reports it once
        monitor.transition(ready_state);

        let inner = Arc::new(Mutex::new(monitor));
        native.register_observer(Arc::new(TrackRelay {
            monitor: Arc::downgrade(&inner),
            id: Arc::clone(&id),
        }));

        Self { id, kind, inner }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn ready_state(&self) -> TrackState {
        self.inner.lock().ready_state
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn native(&self) -> Arc<dyn NativeMediaTrack> {
        Arc::clone(&self.inner.lock().native)
    }

    pub fn info(&self) -> TrackInfo {
        let monitor = self.inner.lock();
        TrackInfo {
            id: self.id.to_string(),
            kind: self.kind,
            label: monitor.label.clone(),
            enabled: monitor.enabled,
            ready_state: monitor.ready_state,
        }
    }

    /// Attach the listener and replay buffered `statechange` records.
    /// Returns how many were replayed.
    pub fn set_listener(&self, listener: TrackListener) -> usize {
        let replayed = self.inner.lock().sink.arm(Box::new(listener));
        debug!(track_id = %self.id, replayed, "Track listener attached");
        replayed
    }

    /// Toggle the native track and record the flag
    pub fn set_enabled(&self, enabled: bool) {
        let native = {
            let mut monitor = self.inner.lock();
            monitor.enabled = enabled;
            Arc::clone(&monitor.native)
        };
        native.set_enabled(enabled);
    }

    /// End the track. Has no effect on a track that already ended.
    pub fn stop(&self) {
        let native = {
            let mut monitor = self.inner.lock();
            if !monitor.transition(TrackState::Ended) {
                return;
            }
            Arc::clone(&monitor.native)
        };

        // Lock released: the engine may report `ended` synchronously
        if !native.stop() {
            debug!(track_id = %self.id, "Engine has no stop primitive, track ended locally");
        }
    }

    fn handle_state_change(monitor: &Mutex<TrackMonitor>, state: TrackState) {
        monitor.lock().transition(state);
    }
}

impl fmt::Debug for MediaStreamTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

struct TrackRelay {
    monitor: Weak<Mutex<TrackMonitor>>,
    id: Arc<str>,
}

impl TrackObserver for TrackRelay {
    fn on_state_change(&self, state: TrackState) {
        match self.monitor.upgrade() {
            Some(monitor) => MediaStreamTrack::handle_state_change(&monitor, state),
            None => debug!(track_id = %self.id, state = ?state, "Track released, dropping notification"),
        }
    }
}

/// A media stream and its monitored tracks, in insertion order per kind
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    native: Arc<dyn NativeMediaStream>,
    audio_tracks: Vec<MediaStreamTrack>,
    video_tracks: Vec<MediaStreamTrack>,
}

impl MediaStream {
    /// Wrap a native stream, monitoring each of its tracks
    pub fn from_native(native: Arc<dyn NativeMediaStream>) -> Self {
        let mut stream = Self {
            id: native.id(),
            native: Arc::clone(&native),
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
        };
        for track in native.tracks() {
            stream.push(MediaStreamTrack::new(track));
        }
        stream
    }

    /// Build from tracks that are already monitored
    pub(crate) fn from_parts(native: Arc<dyn NativeMediaStream>, tracks: Vec<MediaStreamTrack>) -> Self {
        let mut stream = Self {
            id: native.id(),
            native,
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
        };
        for track in tracks {
            stream.push(track);
        }
        stream
    }

    fn push(&mut self, track: MediaStreamTrack) {
        match track.kind() {
            MediaKind::Audio => self.audio_tracks.push(track),
            MediaKind::Video => self.video_tracks.push(track),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn native(&self) -> &Arc<dyn NativeMediaStream> {
        &self.native
    }

    pub fn audio_tracks(&self) -> &[MediaStreamTrack] {
        &self.audio_tracks
    }

    pub fn video_tracks(&self) -> &[MediaStreamTrack] {
        &self.video_tracks
    }

    /// Earliest inserted track of `kind`
    pub fn first_track(&self, kind: MediaKind) -> Option<&MediaStreamTrack> {
        match kind {
            MediaKind::Audio => self.audio_tracks.first(),
            MediaKind::Video => self.video_tracks.first(),
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.audio_tracks.iter().chain(self.video_tracks.iter())
    }

    pub fn find_track(&self, track_id: &str) -> Option<&MediaStreamTrack> {
        self.tracks().find(|track| track.id() == track_id)
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id.clone(),
            audio_tracks: self.audio_tracks.iter().map(MediaStreamTrack::info).collect(),
            video_tracks: self.video_tracks.iter().map(MediaStreamTrack::info).collect(),
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("audio_tracks", &self.audio_tracks)
            .field("video_tracks", &self.video_tracks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffered_sink::channel_listener;
    use crate::loopback::{LoopbackMediaStream, LoopbackMediaTrack};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn ended_counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        (count, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_ended_before_listener_replays_then_notifies() {
        let native = LoopbackMediaTrack::new("cam", MediaKind::Video);
        let track = MediaStreamTrack::new(native.clone());

        native.simulate_ended();
        assert_eq!(track.ready_state(), TrackState::Ended);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ended, on_ended) = ended_counter();
        assert_eq!(track.set_listener(TrackListener::new(channel_listener(tx), on_ended)), 1);

        let event = rx.try_recv().unwrap();
        assert!(event.is_ended());
        assert_eq!(ended.load(Ordering::SeqCst), 1);

        // Ended is absorbing
        native.simulate_live();
        assert_eq!(track.ready_state(), TrackState::Ended);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_drives_ended_once() {
        let native = LoopbackMediaTrack::new("mic", MediaKind::Audio);
        let track = MediaStreamTrack::new(native.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ended, on_ended) = ended_counter();
        track.set_listener(TrackListener::new(channel_listener(tx), on_ended));

        track.stop();
        track.stop();

        assert!(native.is_stopped());
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackEvent::StateChange {
                ready_state: TrackState::Ended,
                enabled: true
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_enabled_toggles_native() {
        let native = LoopbackMediaTrack::new("mic", MediaKind::Audio);
        let track = MediaStreamTrack::new(native.clone());

        track.set_enabled(false);
        assert!(!native.is_enabled());
        assert!(!track.info().enabled);

        track.set_enabled(true);
        assert!(native.is_enabled());
    }

    #[test]
    fn test_stream_orders_tracks_by_kind() {
        let stream = LoopbackMediaStream::new("s1");
        stream.add_track(LoopbackMediaTrack::new("a1", MediaKind::Audio));
        stream.add_track(LoopbackMediaTrack::new("v1", MediaKind::Video));
        stream.add_track(LoopbackMediaTrack::new("a2", MediaKind::Audio));

        let stream = MediaStream::from_native(stream);
        assert_eq!(stream.first_track(MediaKind::Audio).map(|t| t.id()), Some("a1"));
        assert_eq!(stream.first_track(MediaKind::Video).map(|t| t.id()), Some("v1"));

        let info = stream.info();
        assert_eq!(info.audio_tracks.len(), 2);
        assert_eq!(info.audio_tracks[1].id, "a2");
        assert!(stream.find_track("v1").is_some());
    }
}
