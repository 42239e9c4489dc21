//! End-to-end engine scenarios driven through the fake collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use roomlink::engine::{ConnectionEngine, SessionEvent, SessionEvents};
use roomlink::fakes::{
    AutoConnect, CleanupCall, FakeCleanup, FakeSignalClient, FakeTransportFactory, SignalCall,
};
use roomlink::protocol::{
    DataChannelInfo, IceCandidateInit, JoinDetails, RequestResponse, ResponseReason,
    SessionDescription, SignalTarget, TrackPublishedInfo,
};
use roomlink::{ConnectionState, EngineOptions, ReconnectMode, TransportState};

struct Harness {
    engine: ConnectionEngine,
    events: SessionEvents,
    signal: Arc<FakeSignalClient>,
    factory: Arc<FakeTransportFactory>,
    cleanup: Arc<FakeCleanup>,
}

fn test_options() -> EngineOptions {
    EngineOptions {
        connect_timeout: Duration::from_millis(500),
        reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(10),
        default_wait_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn harness(options: EngineOptions) -> Harness {
    let signal = FakeSignalClient::new();
    let factory = FakeTransportFactory::new();
    let cleanup = FakeCleanup::new();
    let (engine, events) = ConnectionEngine::new(
        signal.clone(),
        factory.clone(),
        cleanup.clone(),
        options,
    );
    Harness { engine, events, signal, factory, cleanup }
}

/// Connects with auto-connecting transports and returns a connected harness.
async fn connected_harness() -> Harness {
    let h = harness(test_options());
    h.factory.set_auto_connect(AutoConnect::OnCreate);
    h.engine.connect("wss://media.test", "token").await.expect("connect");
    // quick reconnect attempts rely on configuration-driven connectivity
    h.factory.set_auto_connect(AutoConnect::OnConfigure);
    h
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn connect_reaches_connected_with_subscriber_primary() {
    let mut h = harness(test_options());
    h.factory.set_auto_connect(AutoConnect::OnCreate);

    h.engine.connect("wss://media.test", "token").await.expect("connect");
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(h.factory.create_count(), 2);

    // both publisher data channels were opened
    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    let labels: Vec<String> =
        publisher.channels().into_iter().map(|channel| channel.label).collect();
    assert_eq!(labels, vec!["_reliable".to_string(), "_lossy".to_string()]);

    // subscriber-primary: the server opens negotiation, not us
    assert_eq!(publisher.negotiate_count(), 0);

    let mut states = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let SessionEvent::StateChanged { new, .. } = event {
            states.push(new);
        }
    }
    assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Connected]);
}

#[tokio::test]
async fn connect_with_publisher_primary_triggers_negotiation() {
    let h = harness(test_options());
    h.factory.set_auto_connect(AutoConnect::OnCreate);
    h.signal.set_default_join(JoinDetails {
        session_id: "RM_pub".to_string(),
        subscriber_primary: false,
        ..Default::default()
    });

    h.engine.connect("wss://media.test", "token").await.expect("connect");

    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    assert_eq!(publisher.negotiate_count(), 1);
}

#[tokio::test]
async fn connect_times_out_without_primary_connectivity() {
    let options = EngineOptions {
        connect_timeout: Duration::from_millis(50),
        ..test_options()
    };
    let h = harness(options);
    // AutoConnect::Never: nothing ever reports connected

    let err = h.engine.connect("wss://media.test", "token").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);

    // the failed attempt released its transports
    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    assert!(publisher.is_closed());
}

#[tokio::test]
async fn connect_twice_is_invalid() {
    let h = connected_harness().await;
    let err = h.engine.connect("wss://media.test", "token").await.unwrap_err();
    assert!(err.is_invalid_state());
}

#[tokio::test]
async fn reconnect_succeeds_on_third_quick_attempt() {
    let h = connected_harness().await;
    h.signal.script_error("attempt one rejected");
    h.signal.script_error("attempt two rejected");
    // third connect falls through to the default reconnect response

    h.engine.reconnect().expect("reconnect starts");
    assert_eq!(h.engine.connection_state(), ConnectionState::Reconnecting);

    wait_until(|| h.engine.connection_state() == ConnectionState::Connected).await;
    assert_eq!(h.engine.reconnect_mode(), None);

    // initial join plus three quick attempts
    assert_eq!(
        h.signal.connect_modes(),
        vec![
            None,
            Some(ReconnectMode::Quick),
            Some(ReconnectMode::Quick),
            Some(ReconnectMode::Quick),
        ]
    );
    assert!(h
        .signal
        .calls()
        .iter()
        .any(|call| matches!(call, SignalCall::ResumeQueues)));
    // intermediate failures never reached the clean-up collaborator
    assert!(h.cleanup.error_calls().is_empty());
}

#[tokio::test]
async fn quick_reconnect_reconfigures_and_syncs_before_ice_restart() {
    let h = connected_harness().await;
    h.engine.publish_started(TrackPublishedInfo {
        cid: "cid-1".to_string(),
        track_sid: "TR_pub".to_string(),
    });

    h.engine.reconnect().expect("reconnect starts");
    wait_until(|| h.engine.connection_state() == ConnectionState::Connected).await;

    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    let subscriber = h.factory.transport(SignalTarget::Subscriber).unwrap();
    // reconfigured in place: same handles, a second configuration applied
    assert_eq!(h.factory.create_count(), 2);
    assert_eq!(publisher.configurations().len(), 2);
    assert_eq!(subscriber.configurations().len(), 2);

    // sync state flowed through signaling before the ICE restart
    let calls = h.signal.calls();
    let sync_position = calls
        .iter()
        .position(|call| matches!(call, SignalCall::SyncState(_)))
        .expect("sync state sent");
    let reconnect_position = calls
        .iter()
        .position(|call| {
            matches!(call, SignalCall::Connect { reconnect: Some(ReconnectMode::Quick) })
        })
        .expect("reconnect connect sent");
    assert!(sync_position > reconnect_position);

    if let SignalCall::SyncState(sync) = &calls[sync_position] {
        assert_eq!(sync.publish_tracks.len(), 1);
        assert_eq!(sync.data_channels.len(), 2);
    }

    // published session: the publisher was asked for an ICE-restart offer
    assert_eq!(publisher.offers(), vec![true]);
}

#[tokio::test]
async fn full_reconnect_failure_is_terminal() {
    let h = connected_harness().await;
    h.signal.script_error("join rejected");

    h.engine.request_reconnect(ReconnectMode::Full).expect("reconnect starts");
    wait_until(|| h.engine.connection_state() == ConnectionState::Disconnected).await;

    // one initial join, one failed full attempt, nothing after
    assert_eq!(h.signal.connect_count(), 2);
    assert_eq!(h.signal.connect_modes()[1], None);

    let cleanups = h.cleanup.calls();
    assert!(cleanups
        .iter()
        .any(|call| matches!(call, CleanupCall::CleanUp { is_full_reconnect: true })));
    assert_eq!(h.cleanup.error_calls().len(), 1);
    assert_eq!(h.engine.reconnect_mode(), None);
}

#[tokio::test]
async fn terminal_failure_surfaces_one_disconnect_event() {
    let mut h = connected_harness().await;
    h.signal.script_error("join rejected");
    h.engine.request_reconnect(ReconnectMode::Full).expect("reconnect starts");
    wait_until(|| h.engine.connection_state() == ConnectionState::Disconnected).await;

    let mut disconnects = 0;
    while let Ok(event) = h.events.try_recv() {
        if let SessionEvent::Disconnected { error, .. } = event {
            disconnects += 1;
            assert!(error.is_some());
        }
    }
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn second_reconnect_while_running_is_invalid_state() {
    let h = connected_harness().await;
    h.signal.script_pending();

    h.engine.reconnect().expect("first reconnect starts");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = h.engine.reconnect().unwrap_err();
    assert!(err.is_invalid_state());
    // still exactly one reconnect sequence on the wire
    assert_eq!(h.signal.connect_count(), 2);
}

#[tokio::test]
async fn reconnect_from_disconnected_is_invalid_state() {
    let h = harness(test_options());
    let err = h.engine.reconnect().unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(h.signal.connect_count(), 0);
}

#[tokio::test]
async fn primary_transport_failure_triggers_quick_reconnect() {
    let h = connected_harness().await;

    let subscriber = h.factory.transport(SignalTarget::Subscriber).unwrap();
    subscriber.emit_state(TransportState::Failed);

    wait_until(|| h.signal.connect_modes().len() >= 2).await;
    assert_eq!(h.signal.connect_modes()[1], Some(ReconnectMode::Quick));
    wait_until(|| h.engine.connection_state() == ConnectionState::Connected).await;
}

#[tokio::test]
async fn publisher_failure_matters_only_after_publishing() {
    let h = connected_harness().await;

    // nothing published: publisher loss is not a reconnect trigger
    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    publisher.emit_state(TransportState::Failed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(h.signal.connect_count(), 1);

    h.engine.publish_started(TrackPublishedInfo {
        cid: "cid-1".to_string(),
        track_sid: "TR_pub".to_string(),
    });
    publisher.emit_state(TransportState::Failed);
    wait_until(|| h.signal.connect_count() >= 2).await;
}

#[tokio::test]
async fn network_path_change_is_noop_unless_connected() {
    let h = harness(test_options());
    h.engine.on_network_path_changed();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.signal.connect_count(), 0);

    let h = connected_harness().await;
    h.engine.on_network_path_changed();
    wait_until(|| h.engine.connection_state() == ConnectionState::Connected
        && h.signal.connect_count() >= 2)
    .await;
}

#[tokio::test]
async fn close_during_reconnect_exits_silently() {
    let mut h = connected_harness().await;
    h.signal.script_pending();
    h.engine.reconnect().expect("reconnect starts");
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.engine.close().await;
    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);

    // cancelled sequence: no clean-up-with-error, error-free disconnect event
    assert!(h.cleanup.error_calls().is_empty());
    let mut saw_clean_disconnect = false;
    while let Ok(event) = h.events.try_recv() {
        if let SessionEvent::Disconnected { error, .. } = event {
            assert!(error.is_none());
            saw_clean_disconnect = true;
        }
    }
    assert!(saw_clean_disconnect);
}

#[tokio::test]
async fn close_releases_transports_and_notifies_server() {
    let h = connected_harness().await;
    h.engine.close().await;

    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    let subscriber = h.factory.transport(SignalTarget::Subscriber).unwrap();
    assert!(publisher.is_closed());
    assert!(subscriber.is_closed());

    let calls = h.signal.calls();
    assert!(calls.iter().any(|call| matches!(call, SignalCall::Leave(_))));
    assert!(calls.iter().any(|call| matches!(call, SignalCall::Close)));
}

#[tokio::test]
async fn deferred_action_runs_once_connected() {
    let h = harness(test_options());
    h.factory.set_auto_connect(AutoConnect::OnCreate);

    let ran = Arc::new(AtomicBool::new(false));
    {
        let ran = Arc::clone(&ran);
        h.engine.when_connected(move || {
            ran.store(true, Ordering::SeqCst);
        });
    }
    assert!(!ran.load(Ordering::SeqCst));

    h.engine.connect("wss://media.test", "token").await.expect("connect");
    wait_until(|| ran.load(Ordering::SeqCst)).await;

    // an action deferred while connected runs synchronously
    let inline = Arc::new(AtomicBool::new(false));
    {
        let inline = Arc::clone(&inline);
        h.engine.when_connected(move || {
            inline.store(true, Ordering::SeqCst);
        });
    }
    assert!(inline.load(Ordering::SeqCst));
}

#[tokio::test]
async fn generated_offers_and_candidates_flow_to_signaling() -> anyhow::Result<()> {
    let h = connected_harness().await;
    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();

    publisher.emit_offer(SessionDescription::offer("v=0\r\n"));
    publisher.emit_candidate(IceCandidateInit {
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
        candidate: "candidate:1 1 udp 1 10.0.0.1 3478 typ host".to_string(),
    });

    wait_until(|| {
        let calls = h.signal.calls();
        calls.iter().any(|call| matches!(call, SignalCall::Offer))
            && calls.iter().any(|call| {
                matches!(call, SignalCall::Candidate { target: SignalTarget::Publisher })
            })
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn transport_events_surface_as_session_events() {
    let mut h = connected_harness().await;
    let subscriber = h.factory.transport(SignalTarget::Subscriber).unwrap();

    subscriber.emit_track_added("TR_remote");
    wait_until(|| {
        matches!(h.events.try_recv(), Ok(SessionEvent::TrackAdded { ref track_sid }) if track_sid == "TR_remote")
    })
    .await;

    subscriber.emit_data_channel_opened(DataChannelInfo {
        label: "_reliable".to_string(),
        id: 4,
    });
    wait_until(|| {
        matches!(
            h.events.try_recv(),
            Ok(SessionEvent::DataChannelOpened { target: SignalTarget::Subscriber, ref info })
                if info.label == "_reliable"
        )
    })
    .await;
}

#[tokio::test]
async fn publish_stopped_downgrades_publisher_relevance() {
    let h = connected_harness().await;
    h.engine.publish_started(TrackPublishedInfo {
        cid: "cid-1".to_string(),
        track_sid: "TR_pub".to_string(),
    });
    h.engine.publish_stopped("cid-1");

    let publisher = h.factory.transport(SignalTarget::Publisher).unwrap();
    publisher.emit_state(TransportState::Failed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // nothing published any more: publisher loss no longer triggers recovery
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(h.signal.connect_count(), 1);
}

#[tokio::test]
async fn wait_until_connected_tracks_primary_connectivity() {
    let h = harness(test_options());
    h.factory.set_auto_connect(AutoConnect::OnCreate);

    let err = h
        .engine
        .wait_until_connected(Some(Duration::from_millis(30)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    h.engine.connect("wss://media.test", "token").await.expect("connect");
    h.engine.wait_until_connected(None).await.expect("already connected");
}

#[tokio::test]
async fn request_acknowledgements_resolve_keyed_waiters() {
    let h = connected_harness().await;

    let waiter = {
        let engine = &h.engine;
        let pending = engine.request_response(7);
        tokio::pin!(pending);
        h.engine.handle_request_response(RequestResponse {
            request_id: 7,
            reason: ResponseReason::Ok,
            message: String::new(),
        });
        pending.await
    };
    let response = waiter.expect("acknowledgement");
    assert_eq!(response.request_id, 7);
    assert_eq!(response.reason, ResponseReason::Ok);
}
