//! DTMF sender registry
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


use crate::engine::{NativeDtmfSender, NativePeerConnection};
use crate::error::{BridgeError, BridgeResult};
use crate::identifier::IdentifierRegistry;
use crate::track::MediaStreamTrack;
use rtc_bridge_types::MediaKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct DtmfSender {
    track_id: String,
    native: Arc<dyn NativeDtmfSender>,
}

/// DTMF senders of one session, keyed by caller-supplied id
pub struct DtmfSenderRegistry {
    ids: IdentifierRegistry,
    senders: HashMap<u32, DtmfSender>,
}

impl DtmfSenderRegistry {
    pub fn new() -> Self {
        Self {
            ids: IdentifierRegistry::default(),
            senders: HashMap::new(),
        }
    }

    /// Bind a new sender to an outgoing audio track
    pub(crate) fn create(
        &mut self,
        native_pc: &dyn NativePeerConnection,
        id: u32,
        track: &MediaStreamTrack,
    ) -> BridgeResult<()> {
        if track.kind() != MediaKind::Audio {
            return Err(BridgeError::NotFound(format!("audio track {}", track.id())));
        }
        if self.ids.contains(id) {
            return Err(BridgeError::DtmfSenderIdInUse(id));
        }

        let native = native_pc.create_dtmf_sender(&track.native())?;
        self.ids.reserve(id);
        self.senders.insert(
            id,
            DtmfSender {
                track_id: track.id().to_string(),
                native,
            },
        );

        info!(dtmf_id = id, track_id = %track.id(), "DTMF sender created");
        Ok(())
    }

    /// Queue tones for playout. Completion is not reported.
    pub fn insert_dtmf(&self, id: u32, tones: &str, duration: Duration, inter_tone_gap: Duration) -> BridgeResult<()> {
        let sender = self
            .senders
            .get(&id)
            .ok_or_else(|| BridgeError::NotFound(format!("DTMF sender {}", id)))?;

        if !sender.native.insert_dtmf(tones, duration, inter_tone_gap) {
            warn!(dtmf_id = id, tones, "Engine did not accept DTMF tones");
        } else {
            debug!(dtmf_id = id, tones, track_id = %sender.track_id, "DTMF tones queued");
        }
        Ok(())
    }

    /// Forget a sender. Unknown ids are not an error.
    pub fn close(&mut self, id: u32) {
        if self.senders.remove(&id).is_some() {
            self.ids.release(id);
            debug!(dtmf_id = id, "DTMF sender closed");
        }
    }

    pub(crate) fn clear(&mut self) {
        self.senders.clear();
        self.ids.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.senders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Default for DtmfSenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
