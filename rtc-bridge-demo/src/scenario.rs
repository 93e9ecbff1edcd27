//! Loopback call scenario
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


use anyhow::{anyhow, Context, Result};
use rtc_bridge::loopback::{LoopbackCapture, LoopbackDevices, LoopbackEngine};
use rtc_bridge::types::*;
use rtc_bridge::{
    channel_listener, ChannelListener, ChannelMessage, MediaAcquisition, PeerConnectionSession, SessionOptions,
};
use rtc_bridge_config::BridgeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tracing::{debug, info};

const EVENT_WAIT: Duration = Duration::from_secs(2);
const CHAT_CHANNEL: u32 = 1;
const DTMF_SENDER: u32 = 1;

/// What the call ended up looking like
pub struct CallSummary {
    pub caller_state: IceConnectionState,
    pub callee_state: IceConnectionState,
    pub candidates_exchanged: usize,
    pub messages_sent: usize,
    pub stats: Vec<StatsReport>,
}

struct Endpoint {
    name: &'static str,
    session: PeerConnectionSession,
    events: UnboundedReceiver<SessionEvent>,
}

impl Endpoint {
    fn open(
        engine: &LoopbackEngine,
        config: &RtcConfiguration,
        options: SessionOptions,
        name: &'static str,
    ) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let session = PeerConnectionSession::initialize(engine, config, None, options, channel_listener(tx))
            .with_context(|| format!("failed to start {} session", name))?;

        info!(endpoint = name, session_id = %session.id(), "Endpoint ready");
        Ok(Self { name, session, events })
    }

    /// Collect trickled candidates until the end-of-candidates marker
    async fn gathered_candidates(&mut self) -> Result<Vec<IceCandidate>> {
        let mut candidates = Vec::new();
        loop {
            let event = timeout(EVENT_WAIT, self.events.recv())
                .await
                .map_err(|_| anyhow!("{} never finished gathering", self.name))?
                .ok_or_else(|| anyhow!("{} session ended while gathering", self.name))?;

            match event {
                SessionEvent::IceCandidate {
                    candidate: Some(candidate),
                    ..
                } => candidates.push(candidate),
                SessionEvent::IceCandidate { candidate: None, .. } => return Ok(candidates),
                other => debug!(endpoint = self.name, event = other.event_type(), "Session event"),
            }
        }
    }
}

async fn wait_for_open(events: &mut UnboundedReceiver<ChannelEvent>) -> Result<()> {
    loop {
        let event = timeout(EVENT_WAIT, events.recv())
            .await
            .map_err(|_| anyhow!("data channel never opened"))?
            .ok_or_else(|| anyhow!("data channel listener dropped"))?;

        match event {
            ChannelEvent::StateChange {
                ready_state: DataChannelState::Open,
            } => return Ok(()),
            ChannelEvent::StateChange {
                ready_state: DataChannelState::Closing | DataChannelState::Closed,
            } => return Err(anyhow!("data channel closed before opening")),
            other => debug!(event = ?other, "Channel event"),
        }
    }
}

pub async fn run(config: &BridgeConfig) -> Result<CallSummary> {
    let engine = LoopbackEngine::new();
    let rtc = config.rtc_configuration();
    let options = SessionOptions::from_config(config);

    let mut caller = Endpoint::open(&engine, &rtc, options.clone(), "caller")?;
    let mut callee = Endpoint::open(&engine, &rtc, options, "callee")?;

    // Local media
    let acquisition = MediaAcquisition::new(Arc::new(LoopbackDevices::new()), Arc::new(LoopbackCapture::new()));
    let stream = acquisition.acquire(&UserMediaConstraints {
        audio: true,
        video: true,
        max_width: 1280,
        max_height: 720,
        max_frame_rate: 30.0,
        ..Default::default()
    })?;
    caller.session.add_stream(stream.clone()).await?;

    let (channel_tx, mut channel_events) = mpsc::unbounded_channel();
    let (message_tx, _messages) = mpsc::unbounded_channel();
    let chat = caller
        .session
        .create_data_channel(
            CHAT_CHANNEL,
            "chat",
            DataChannelInit {
                ordered: Some(true),
                ..Default::default()
            },
            Some(ChannelListener::new(
                channel_listener(channel_tx),
                channel_listener(message_tx),
            )),
        )
        .await?;
    info!(dc_id = chat.dc_id, stream_id = chat.parameters.stream_id, "Chat channel created");

    // Offer/answer
    let offer = caller.session.create_offer(None).await?;
    let offer = caller.session.set_local_description(offer).await?;
    let caller_candidates = caller.gathered_candidates().await?;

    callee.session.set_remote_description(offer).await?;
    let answer = callee.session.create_answer(None).await?;
    let answer = callee.session.set_local_description(answer).await?;
    let callee_candidates = callee.gathered_candidates().await?;
    caller.session.set_remote_description(answer).await?;

    // Trickle ICE
    let candidates_exchanged = caller_candidates.len() + callee_candidates.len();
    for candidate in caller_candidates {
        callee.session.add_ice_candidate(candidate).await?;
    }
    for candidate in callee_candidates {
        caller.session.add_ice_candidate(candidate).await?;
    }

    wait_for_open(&mut channel_events).await?;

    let messages = [
        ChannelMessage::Text("hello from caller".to_string()),
        ChannelMessage::Binary(vec![0xcau8, 0xfe].into()),
    ];
    let messages_sent = messages.len();
    for message in messages {
        match message {
            ChannelMessage::Text(text) => caller.session.send_text(CHAT_CHANNEL, text).await?,
            ChannelMessage::Binary(data) => caller.session.send_binary(CHAT_CHANNEL, data).await?,
        }
    }

    // Mute the microphone briefly and send a few tones
    caller
        .session
        .mute(MuteRequest {
            audio: Some(true),
            video: None,
        })
        .await?;
    caller
        .session
        .mute(MuteRequest {
            audio: Some(false),
            video: None,
        })
        .await?;

    if let Some(audio) = stream.audio_tracks().first() {
        caller.session.create_dtmf_sender(DTMF_SENDER, audio.id()).await?;
        caller
            .session
            .insert_dtmf(DTMF_SENDER, "1234#", Duration::from_millis(100), Duration::from_millis(70))
            .await?;
        caller.session.close_dtmf_sender(DTMF_SENDER).await?;
    }

    let stats = caller.session.get_stats(None).await?;
    let caller_state = caller.session.ice_connection_state().await?;
    let callee_state = callee.session.ice_connection_state().await?;

    caller.session.close_data_channel(CHAT_CHANNEL).await?;
    caller.session.close().await?;
    callee.session.close().await?;

    Ok(CallSummary {
        caller_state,
        callee_state,
        candidates_exchanged,
        messages_sent,
        stats,
    })
}
