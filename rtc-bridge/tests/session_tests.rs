//! Peer Connection Session Tests
//!
//! Drives the session actor end to end against the loopback engine.

use rtc_bridge::loopback::{LoopbackCapture, LoopbackDevices, LoopbackEngine, LoopbackPeerConnection};
use rtc_bridge::types::*;
use rtc_bridge::{
    channel_listener, BridgeError, ChannelListener, ChannelMessage, MediaAcquisition, MediaStream,
    PeerConnectionSession, SessionOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_test::{assert_err, assert_ok};

struct Peer {
    session: PeerConnectionSession,
    native: Arc<LoopbackPeerConnection>,
    events: UnboundedReceiver<SessionEvent>,
}

impl Peer {
    fn start(engine: &LoopbackEngine) -> Self {
        Self::start_with(engine, SessionOptions::default())
    }

    fn start_with(engine: &LoopbackEngine, options: SessionOptions) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let session = PeerConnectionSession::initialize(
            engine,
            &RtcConfiguration::default(),
            None,
            options,
            channel_listener(tx),
        )
        .unwrap();
        let native = engine.last_peer_connection().unwrap();

        Self {
            session,
            native,
            events,
        }
    }

    /// Round-trip through the session queue so every notification queued
    /// before this call has been handled.
    async fn settle(&self) {
        self.session.snapshot().await.unwrap();
    }

    async fn drain(&mut self) -> Vec<SessionEvent> {
        self.settle().await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn candidates(events: &[SessionEvent]) -> Vec<IceCandidate> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::IceCandidate {
                candidate: Some(candidate),
                ..
            } => Some(candidate.clone()),
            _ => None,
        })
        .collect()
}

fn local_media() -> (Arc<LoopbackCapture>, MediaAcquisition) {
    let capture = Arc::new(LoopbackCapture::new());
    let acquisition = MediaAcquisition::new(Arc::new(LoopbackDevices::new()), capture.clone());
    (capture, acquisition)
}

fn audio_video(device_id: Option<&str>) -> UserMediaConstraints {
    UserMediaConstraints {
        audio: true,
        video: true,
        device_id: device_id.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_offer_then_set_local_echoes_committed_description() {
    let engine = LoopbackEngine::new();
    let mut peer = Peer::start(&engine);

    let offer = assert_ok!(peer.session.create_offer(None).await);
    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert!(!offer.sdp.is_empty());

    let committed = assert_ok!(peer.session.set_local_description(offer.clone()).await);
    assert_eq!(committed, offer);
    assert_eq!(
        peer.session.signaling_state().await.unwrap(),
        SignalingState::HaveLocalOffer
    );

    let events = peer.drain().await;
    assert_eq!(events[0].event_type(), "signalingstatechange");
    assert!(!candidates(&events).is_empty());
    assert_eq!(events.iter().filter(|e| e.is_end_of_candidates()).count(), 1);
    assert_eq!(
        peer.session.ice_gathering_state().await.unwrap(),
        IceGatheringState::Complete
    );
}

#[tokio::test]
async fn test_invalid_transition_never_reaches_engine() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);

    let stray_answer = SessionDescription::new(SdpType::Answer, "v=0");
    let err = assert_err!(peer.session.set_remote_description(stray_answer).await);
    assert!(matches!(err, BridgeError::Negotiation(_)));

    let err = assert_err!(peer.session.create_answer(None).await);
    assert!(matches!(err, BridgeError::Negotiation(_)));
    assert_eq!(peer.session.remote_description().await.unwrap(), None);
}

#[tokio::test]
async fn test_offer_answer_between_two_sessions() {
    let engine = LoopbackEngine::new();
    let mut caller = Peer::start(&engine);
    let mut callee = Peer::start(&engine);

    let offer = caller.session.create_offer(None).await.unwrap();
    caller.session.set_local_description(offer.clone()).await.unwrap();

    // Nothing to apply candidates against yet
    let early = assert_ok!(callee.session.add_ice_candidate(candidates(&caller.drain().await)[0].clone()).await);
    assert_eq!(early.remote_description, None);
    assert_eq!(
        serde_json::to_value(&early).unwrap(),
        serde_json::json!({ "remoteDescription": false })
    );

    callee.session.set_remote_description(offer.clone()).await.unwrap();
    let answer = callee.session.create_answer(None).await.unwrap();
    assert_eq!(answer.sdp_type, SdpType::Answer);
    callee.session.set_local_description(answer.clone()).await.unwrap();
    caller.session.set_remote_description(answer).await.unwrap();

    for candidate in candidates(&callee.drain().await) {
        let snapshot = caller.session.add_ice_candidate(candidate).await.unwrap();
        assert_eq!(
            snapshot.remote_description.map(|d| d.sdp_type),
            Some(SdpType::Answer)
        );
    }

    caller.settle().await;
    let snapshot = caller.session.snapshot().await.unwrap();
    assert_eq!(snapshot.signaling_state, SignalingState::Stable);
    assert_eq!(snapshot.ice_connection_state, IceConnectionState::Connected);
    assert_eq!(
        callee.session.ice_connection_state().await.unwrap(),
        IceConnectionState::Connected
    );
    assert!(!caller.native.remote_candidates().is_empty());
}

#[tokio::test]
async fn test_data_channel_events_replay_before_messages() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);

    let init = DataChannelInit {
        ordered: Some(true),
        ..Default::default()
    };
    let info = assert_ok!(peer.session.create_data_channel(1, "chat", init, None).await);
    assert_eq!(info.dc_id, 1);
    assert_eq!(info.parameters.label, "chat");
    assert!(info.parameters.ordered);
    assert!(!info.parameters.negotiated);

    let native = peer.native.data_channel(info.parameters.stream_id).unwrap();
    native.simulate_state(DataChannelState::Open);
    native.simulate_message(ChannelMessage::Text("hello".to_string()));
    peer.settle().await;

    let (event_tx, mut channel_events) = mpsc::unbounded_channel();
    let (message_tx, mut messages) = mpsc::unbounded_channel();
    let replayed = peer
        .session
        .set_data_channel_listener(1, ChannelListener::new(channel_listener(event_tx), channel_listener(message_tx)))
        .await
        .unwrap();
    assert_eq!(replayed, 3);

    assert!(matches!(channel_events.try_recv(), Ok(ChannelEvent::New { .. })));
    assert_eq!(
        channel_events.try_recv().unwrap(),
        ChannelEvent::StateChange {
            ready_state: DataChannelState::Open
        }
    );
    assert_eq!(messages.try_recv().unwrap(), ChannelMessage::Text("hello".to_string()));

    // A second registration has nothing left to replay
    let (event_tx, _events) = mpsc::unbounded_channel();
    let (message_tx, _messages) = mpsc::unbounded_channel();
    let replayed = peer
        .session
        .set_data_channel_listener(1, ChannelListener::new(channel_listener(event_tx), channel_listener(message_tx)))
        .await
        .unwrap();
    assert_eq!(replayed, 0);

    assert_ok!(peer.session.send_text(1, "hi").await);
    assert_ok!(peer.session.send_binary(1, vec![1u8, 2, 3]).await);
    assert_eq!(native.sent().len(), 2);
    assert_eq!(
        peer.session.data_channel_info(1).await.unwrap().parameters.ready_state,
        DataChannelState::Open
    );
}

#[tokio::test]
async fn test_duplicate_channel_id_rejected() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);

    assert_ok!(peer.session.create_data_channel(7, "a", DataChannelInit::default(), None).await);
    let err = assert_err!(peer.session.create_data_channel(7, "b", DataChannelInit::default(), None).await);
    assert_eq!(err, BridgeError::ChannelIdInUse(7));

    // Only the first reached the engine
    assert_eq!(peer.native.data_channels().len(), 1);

    // The id is free again once closed
    peer.session.close_data_channel(7).await.unwrap();
    assert_ok!(peer.session.create_data_channel(7, "c", DataChannelInit::default(), None).await);
}

#[tokio::test]
async fn test_send_on_connecting_channel_fails() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);

    peer.session
        .create_data_channel(2, "pending", DataChannelInit::default(), None)
        .await
        .unwrap();
    let err = assert_err!(peer.session.send_text(2, "too early").await);
    assert!(matches!(err, BridgeError::Send(_)));

    let err = assert_err!(peer.session.send_text(99, "nobody").await);
    assert!(matches!(err, BridgeError::NotFound(_)));
}

#[tokio::test]
async fn test_remote_data_channel_gets_minted_id() {
    let engine = LoopbackEngine::new();
    let options = SessionOptions {
        channel_id_base: 500,
        ..Default::default()
    };
    let mut peer = Peer::start_with(&engine, options);

    peer.native
        .simulate_remote_data_channel("remote", &DataChannelInit::default())
        .unwrap();
    let events = peer.drain().await;

    let channel = events
        .iter()
        .find_map(|event| match event {
            SessionEvent::DataChannel { channel } => Some(channel.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(channel.dc_id, 500);
    assert_eq!(channel.parameters.label, "remote");
    assert_ok!(peer.session.data_channel_info(500).await);
}

#[tokio::test]
async fn test_remote_data_channel_rejected_when_ids_exhausted() {
    let engine = LoopbackEngine::new();
    let options = SessionOptions {
        channel_id_base: u32::MAX,
        ..Default::default()
    };
    let mut peer = Peer::start_with(&engine, options);

    peer.native
        .simulate_remote_data_channel("first", &DataChannelInit::default())
        .unwrap();
    let overflow = peer
        .native
        .simulate_remote_data_channel("second", &DataChannelInit::default())
        .unwrap();

    // The session keeps answering and only the first channel surfaces
    let events = tokio::time::timeout(Duration::from_secs(1), peer.drain())
        .await
        .unwrap();
    let minted: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::DataChannel { channel } => Some(channel.dc_id),
            _ => None,
        })
        .collect();
    assert_eq!(minted, vec![u32::MAX]);
    assert!(!overflow.has_observer());

    peer.session.close_data_channel(u32::MAX).await.unwrap();
    peer.native
        .simulate_remote_data_channel("third", &DataChannelInit::default())
        .unwrap();
    let events = peer.drain().await;
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::DataChannel { channel } if channel.dc_id == u32::MAX)));
}

#[tokio::test]
async fn test_remote_streams_tracked() {
    let engine = LoopbackEngine::new();
    let mut peer = Peer::start(&engine);

    peer.native.simulate_remote_stream("remote", true, true);
    let events = peer.drain().await;
    match &events[..] {
        [SessionEvent::AddStream { stream }] => {
            assert_eq!(stream.id, "remote");
            assert_eq!(stream.audio_tracks[0].id, "remote-audio");
            assert_eq!(stream.video_tracks[0].id, "remote-video");
        }
        other => panic!("unexpected events {:?}", other),
    }

    let stream = peer.session.remote_stream("remote").await.unwrap().unwrap();
    assert_eq!(stream.tracks().count(), 2);

    let reports = peer.session.get_stats(Some("remote-video".to_string())).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].report_type, "track");

    peer.native.simulate_remove_stream("remote");
    assert_eq!(
        peer.drain().await,
        vec![SessionEvent::RemoveStream {
            stream_id: "remote".to_string()
        }]
    );
    assert!(peer.session.remote_stream("remote").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mute_toggles_outgoing_tracks() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let (_capture, acquisition) = local_media();

    let stream = acquisition.acquire(&audio_video(None)).unwrap();
    assert!(peer.session.add_stream(stream.clone()).await.unwrap());
    let audio = stream.audio_tracks()[0].clone();
    let video = stream.video_tracks()[0].clone();

    peer.session
        .mute(MuteRequest {
            audio: None,
            video: Some(true),
        })
        .await
        .unwrap();
    assert!(!video.is_enabled());
    assert!(audio.is_enabled());

    // Idempotent
    peer.session
        .mute(MuteRequest {
            audio: None,
            video: Some(true),
        })
        .await
        .unwrap();
    assert!(!video.is_enabled());

    peer.session
        .mute(MuteRequest {
            audio: Some(true),
            video: Some(false),
        })
        .await
        .unwrap();
    assert!(video.is_enabled());
    assert!(!audio.is_enabled());
}

#[tokio::test]
async fn test_switch_camera_replaces_senders() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let (capture, acquisition) = local_media();

    let front = acquisition.acquire(&audio_video(None)).unwrap();
    peer.session.add_stream(front.clone()).await.unwrap();

    let back = acquisition.acquire(&audio_video(Some("back-camera"))).unwrap();
    assert_eq!(capture.last_device().as_deref(), Some("back-camera"));
    assert_ok!(peer.session.switch_camera(back.clone()).await);

    let mut sending: Vec<String> = peer
        .native
        .loopback_senders()
        .iter()
        .filter_map(|sender| sender.track_id())
        .collect();
    sending.sort();
    let mut expected: Vec<String> = back.tracks().map(|track| track.id().to_string()).collect();
    expected.sort();
    assert_eq!(sending, expected);
}

#[tokio::test]
async fn test_switch_camera_validates_before_replacing() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let (_capture, acquisition) = local_media();

    let front = acquisition.acquire(&audio_video(None)).unwrap();
    peer.session.add_stream(front.clone()).await.unwrap();
    let before: Vec<_> = peer
        .native
        .loopback_senders()
        .iter()
        .filter_map(|sender| sender.track_id())
        .collect();

    // Audio sender has a replacement, video sender does not
    let audio_only = acquisition
        .acquire(&UserMediaConstraints {
            audio: true,
            ..Default::default()
        })
        .unwrap();
    let err = assert_err!(peer.session.switch_camera(audio_only).await);
    assert!(matches!(err, BridgeError::NotFound(_)));

    let after: Vec<_> = peer
        .native
        .loopback_senders()
        .iter()
        .filter_map(|sender| sender.track_id())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_switch_camera_without_senders() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let (_capture, acquisition) = local_media();

    let stream = acquisition.acquire(&audio_video(None)).unwrap();
    let err = assert_err!(peer.session.switch_camera(stream).await);
    assert!(matches!(err, BridgeError::NotFound(_)));
}

#[tokio::test]
async fn test_dtmf_on_outgoing_audio() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let (_capture, acquisition) = local_media();

    let stream = acquisition.acquire(&audio_video(None)).unwrap();
    peer.session.add_stream(stream.clone()).await.unwrap();
    let audio_id = stream.audio_tracks()[0].id().to_string();
    let video_id = stream.video_tracks()[0].id().to_string();

    assert_ok!(peer.session.create_dtmf_sender(1, audio_id.clone()).await);
    assert_eq!(
        assert_err!(peer.session.create_dtmf_sender(1, audio_id.clone()).await),
        BridgeError::DtmfSenderIdInUse(1)
    );
    assert!(matches!(
        peer.session.create_dtmf_sender(2, video_id).await,
        Err(BridgeError::NotFound(_))
    ));
    assert!(matches!(
        peer.session.create_dtmf_sender(3, "missing").await,
        Err(BridgeError::NotFound(_))
    ));

    assert_ok!(
        peer.session
            .insert_dtmf(1, "123#", Duration::from_millis(100), Duration::from_millis(70))
            .await
    );
    assert_eq!(
        peer.native.dtmf_sender(&audio_id).unwrap().tones(),
        vec!["123#".to_string()]
    );

    peer.session.close_dtmf_sender(1).await.unwrap();
    assert!(peer
        .session
        .insert_dtmf(1, "4", Duration::from_millis(100), Duration::from_millis(70))
        .await
        .is_err());
}

#[tokio::test]
async fn test_connection_stats() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);

    let reports = assert_ok!(peer.session.get_stats(None).await);
    assert_eq!(reports[0].report_type, "peer-connection");

    let err = assert_err!(peer.session.get_stats(Some("ghost".to_string())).await);
    assert!(matches!(err, BridgeError::NotFound(_)));
}

#[tokio::test]
async fn test_every_operation_rejected_after_close() {
    let engine = LoopbackEngine::new();
    let mut peer = Peer::start(&engine);
    let (_capture, acquisition) = local_media();
    let stream: MediaStream = acquisition.acquire(&audio_video(None)).unwrap();
    peer.session
        .create_data_channel(1, "chat", DataChannelInit::default(), None)
        .await
        .unwrap();
    peer.drain().await;

    assert_ok!(peer.session.close().await);
    assert_ok!(peer.session.close().await);
    assert!(peer.native.is_closed());

    let closed = vec![SessionEvent::SignalingStateChange {
        signaling_state: SignalingState::Closed,
    }];
    assert_eq!(peer.drain().await, closed);

    let session = &peer.session;
    let description = SessionDescription::new(SdpType::Offer, "v=0");
    let candidate = IceCandidate {
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
        candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".to_string(),
    };
    let listener = || {
        let (events, _) = mpsc::unbounded_channel();
        let (messages, _) = mpsc::unbounded_channel();
        ChannelListener::new(channel_listener(events), channel_listener(messages))
    };
    let gap = Duration::from_millis(70);

    assert_eq!(session.create_offer(None).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.create_answer(None).await, Err(BridgeError::ClosedSession));
    assert_eq!(
        session.set_local_description(description.clone()).await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(
        session.set_remote_description(description).await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(session.add_ice_candidate(candidate).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.add_stream(stream.clone()).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.remove_stream(stream.clone()).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.mute(MuteRequest::default()).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.switch_camera(stream.clone()).await, Err(BridgeError::ClosedSession));
    assert_eq!(
        session
            .create_data_channel(2, "late", DataChannelInit::default(), None)
            .await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(
        session.set_data_channel_listener(1, listener()).await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(session.send_text(1, "x").await, Err(BridgeError::ClosedSession));
    assert_eq!(session.send_binary(1, vec![0u8]).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.close_data_channel(1).await, Err(BridgeError::ClosedSession));
    assert_eq!(session.data_channel_info(1).await, Err(BridgeError::ClosedSession));
    assert_eq!(
        session.create_dtmf_sender(1, stream.audio_tracks()[0].id()).await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(
        session.insert_dtmf(1, "1", gap, gap).await,
        Err(BridgeError::ClosedSession)
    );
    assert_eq!(session.close_dtmf_sender(1).await, Err(BridgeError::ClosedSession));
    assert!(matches!(session.get_stats(None).await, Err(BridgeError::ClosedSession)));

    // Accessors keep answering
    assert_eq!(session.signaling_state().await.unwrap(), SignalingState::Closed);

    // Late engine notifications are dropped
    peer.native.simulate_renegotiation_needed();
    assert!(peer.drain().await.is_empty());
}

#[tokio::test]
async fn test_negotiation_needed_forwarded() {
    let engine = LoopbackEngine::new();
    let mut peer = Peer::start(&engine);

    peer.session
        .create_data_channel(1, "first", DataChannelInit::default(), None)
        .await
        .unwrap();
    let events = peer.drain().await;
    assert_eq!(events, vec![SessionEvent::NegotiationNeeded]);
}

#[tokio::test]
async fn test_dropping_every_handle_closes_engine() {
    let engine = LoopbackEngine::new();
    let peer = Peer::start(&engine);
    let native = Arc::clone(&peer.native);
    let clone = peer.session.clone();

    drop(peer);
    assert!(!native.is_closed());
    drop(clone);

    for _ in 0..100 {
        if native.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(native.is_closed());
}
