//! Constraint-driven local media acquisition
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


use crate::engine::{
    CaptureDevice, CapturePipeline, DevicePosition, DeviceProvider, NativeVideoSource, SourceState,
};
use crate::error::{BridgeError, BridgeResult};
use crate::track::{MediaStream, MediaStreamTrack};
use rtc_bridge_types::{MediaKind, UserMediaConstraints};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const MIN_WIDTH: &str = "minWidth";
pub const MAX_WIDTH: &str = "maxWidth";
pub const MIN_HEIGHT: &str = "minHeight";
pub const MAX_HEIGHT: &str = "maxHeight";
pub const MIN_FRAME_RATE: &str = "minFrameRate";
pub const MAX_FRAME_RATE: &str = "maxFrameRate";

/// Mandatory video constraints handed to the capture pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoConstraints {
    mandatory: BTreeMap<&'static str, f64>,
}

impl VideoConstraints {
    /// Keep only strictly positive values; zero and negatives mean
    /// "unconstrained".
    pub fn from_user(constraints: &UserMediaConstraints) -> Self {
        let candidates = [
            (MIN_WIDTH, constraints.min_width as f64),
            (MAX_WIDTH, constraints.max_width as f64),
            (MIN_HEIGHT, constraints.min_height as f64),
            (MAX_HEIGHT, constraints.max_height as f64),
            (MIN_FRAME_RATE, constraints.min_frame_rate),
            (MAX_FRAME_RATE, constraints.max_frame_rate),
        ];

        let mandatory = candidates
            .into_iter()
            .filter(|(_, value)| *value > 0.0)
            .collect();

        Self { mandatory }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.mandatory.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.mandatory.iter().map(|(key, value)| (*key, *value))
    }

    pub fn len(&self) -> usize {
        self.mandatory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty()
    }
}

/// Produces local media streams from capture devices
pub struct MediaAcquisition {
    devices: Arc<dyn DeviceProvider>,
    pipeline: Arc<dyn CapturePipeline>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn DeviceProvider>, pipeline: Arc<dyn CapturePipeline>) -> Self {
        Self { devices, pipeline }
    }

    /// Acquire a stream with at most one video and one audio track.
    /// Asking for neither yields an empty stream.
    ///
    /// Authorization and device selection are settled before the capture
    /// pipeline is touched.
    pub fn acquire(&self, constraints: &UserMediaConstraints) -> BridgeResult<MediaStream> {
        if constraints.video {
            self.check_authorization(MediaKind::Video)?;
        }
        if constraints.audio {
            self.check_authorization(MediaKind::Audio)?;
        }

        let video = if constraints.video {
            let device = self.select_video_device(constraints.device_id.as_deref())?;
            Some((device, VideoConstraints::from_user(constraints)))
        } else {
            None
        };

        let stream_id = Uuid::new_v4().to_string();
        let native_stream = self.pipeline.create_media_stream(&stream_id);
        let mut tracks = Vec::new();

        if let Some((device, video_constraints)) = video {
            debug!(
                device = %device.unique_id,
                constraints = video_constraints.len(),
                "Creating video source"
            );
            let source = self.pipeline.create_video_source(&device, &video_constraints)?;
            if source.state() == SourceState::Ended {
                return Err(BridgeError::ConstraintsNotSatisfied(format!(
                    "video source for {} ended on start",
                    device.label
                )));
            }

            let native = self
                .pipeline
                .create_video_track(&source, &Uuid::new_v4().to_string())?;
            native_stream.add_track(Arc::clone(&native));
            tracks.push(MediaStreamTrack::new(native));
        }

        if constraints.audio {
            let native = self.pipeline.create_audio_track(&Uuid::new_v4().to_string())?;
            native_stream.add_track(Arc::clone(&native));
            tracks.push(MediaStreamTrack::new(native));
        }

        let stream = MediaStream::from_parts(native_stream, tracks);
        info!(
            stream_id = %stream.id(),
            audio = stream.audio_tracks().len(),
            video = stream.video_tracks().len(),
            "Local media acquired"
        );
        Ok(stream)
    }

    fn check_authorization(&self, kind: MediaKind) -> BridgeResult<()> {
        let status = self.devices.authorization_status(kind);
        if status.permits_capture() {
            Ok(())
        } else {
            Err(BridgeError::Authorization { kind, status })
        }
    }

    /// Explicit id must match exactly; otherwise the first front-facing camera
    fn select_video_device(&self, device_id: Option<&str>) -> BridgeResult<CaptureDevice> {
        let devices = self.devices.devices(MediaKind::Video);
        let found = match device_id {
            Some(id) => devices.into_iter().find(|device| device.unique_id == id),
            None => devices
                .into_iter()
                .find(|device| device.position == DevicePosition::Front),
        };

        found.ok_or_else(|| BridgeError::DeviceNotFound {
            kind: MediaKind::Video,
            device_id: device_id.map(str::to_string),
        })
    }
}
