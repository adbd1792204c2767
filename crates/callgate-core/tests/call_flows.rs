//! End-to-end call flows over the loopback transport
//!
//! Covers offer, accept, streaming, termination and timeout paths with the
//! tokio clock paused so pacing and deadlines are deterministic.

mod common;

use std::time::Duration;

use callgate_core::transport::loopback::LoopbackOptions;
use callgate_core::{
    ActionStatus, AnswerRequest, ConnectivityState, GatewayConfig, GatewayError, OfferRequest,
    SdpType, SessionDescription, SessionState, StaticMediaSource,
};
use common::{Harness, RECORDING_FRAMES, accept, action, settle};
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn test_offer_without_call_id_registers_session() {
    let h = Harness::new();
    let call_id = h.offer(None).await;

    assert!(!call_id.as_str().is_empty());
    let session = h.gateway.registry().get(&call_id).unwrap();
    assert_eq!(session.state(), SessionState::Negotiating);
    assert!(session.decision().is_pending());
    assert_eq!(h.transport(&call_id).senders_attached(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_offer_event_carries_gathered_sdp() {
    let h = Harness::new();
    let event = h
        .gateway
        .create_offer(OfferRequest {
            to: "15550002".to_string(),
            from: "15550001".to_string(),
            callback_url: None,
            call_id: Some("evt-1".to_string()),
        })
        .await
        .unwrap();

    let call = event.calls().next().unwrap();
    assert_eq!(call.id, "evt-1");
    assert_eq!(call.from, "15550001");
    assert_eq!(call.session.sdp_type, "offer");
    assert!(call.session.sdp.contains("a=end-of-candidates"));
}

#[tokio::test(start_paused = true)]
async fn test_accept_streams_recording_then_closes() {
    let h = Harness::new();
    let call_id = h.offer(Some("stream-1")).await;

    let status = h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    assert_eq!(status, ActionStatus::Processed);
    settle().await;

    let transport = h.transport(&call_id);
    assert_eq!(transport.remote_applied_count(), 1);
    assert_eq!(
        transport.remote_description().unwrap().sdp,
        "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"
    );
    let session = h.gateway.registry().get(&call_id).unwrap();
    assert_eq!(session.state(), SessionState::Connecting);

    transport.set_connectivity(ConnectivityState::Connected);
    settle().await;
    assert_eq!(session.state(), SessionState::Streaming);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let frames = transport.written_frames();
    assert_eq!(frames.len(), RECORDING_FRAMES);
    assert!(frames.iter().all(|f| f.duration == Duration::from_millis(20)));
    assert!(!h.gateway.registry().contains(&call_id));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_double_accept_applies_once() {
    let h = Harness::new();
    let call_id = h.offer(Some("double")).await;
    let request = accept(&call_id);

    let (first, second) = tokio::join!(
        h.gateway.dispatch_action(&request),
        h.gateway.dispatch_action(&request)
    );
    let mut statuses = vec![first.unwrap(), second.unwrap()];
    statuses.sort_by_key(|s| *s != ActionStatus::Processed);
    assert_eq!(
        statuses,
        vec![ActionStatus::Processed, ActionStatus::AlreadyDecided]
    );

    settle().await;
    let transport = h.transport(&call_id);
    assert_eq!(transport.remote_applied_count(), 1);

    transport.set_connectivity(ConnectivityState::Connected);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.written_frames().len(), RECORDING_FRAMES);
}

#[tokio::test(start_paused = true)]
async fn test_second_accept_after_first_is_soft() {
    let h = Harness::new();
    let call_id = h.offer(Some("again")).await;

    assert_eq!(
        h.gateway.dispatch_action(&accept(&call_id)).await.unwrap(),
        ActionStatus::Processed
    );
    settle().await;
    assert_eq!(
        h.gateway.dispatch_action(&accept(&call_id)).await.unwrap(),
        ActionStatus::AlreadyDecided
    );
    assert_eq!(h.transport(&call_id).remote_applied_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_then_second_terminate() {
    let h = Harness::new();
    let call_id = h.offer(Some("term")).await;

    let first = h.gateway.dispatch_action(&action("term", "terminate")).await.unwrap();
    let second = h.gateway.dispatch_action(&action("term", "terminate")).await.unwrap();

    assert_eq!(first, ActionStatus::Processed);
    assert_eq!(second, ActionStatus::NoSession);
    assert!(!h.gateway.registry().contains(&call_id));
    assert_eq!(h.transport(&call_id).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_closing_actions_close_once() {
    let h = Harness::new();
    let call_id = h.offer(Some("race")).await;

    let reject = action("race", "reject");
    let hangup = action("race", "hangup");
    let (a, b) = tokio::join!(
        h.gateway.dispatch_action(&reject),
        h.gateway.dispatch_action(&hangup)
    );
    let processed = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|s| **s == ActionStatus::Processed)
        .count();

    assert_eq!(processed, 1);
    assert!(h.gateway.registry().is_empty());
    assert_eq!(h.transport(&call_id).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_decision() {
    let h = Harness::new();
    let call_id = h.offer(Some("late")).await;

    tokio::time::sleep(Duration::from_secs(44)).await;
    assert!(h.gateway.registry().contains(&call_id));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.gateway.registry().contains(&call_id));
    assert_eq!(h.transport(&call_id).close_count(), 1);

    let status = h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    assert_eq!(status, ActionStatus::NoSession);
    assert_eq!(h.transport(&call_id).remote_applied_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_but_never_connected_is_reaped() {
    let h = Harness::new();
    let call_id = h.offer(Some("stuck")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(46)).await;
    assert!(!h.gateway.registry().contains(&call_id));
    assert!(h.transport(&call_id).written_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_streaming_outlives_deadline() {
    let config = GatewayConfig::from_toml_str("[session]\nsession_timeout_secs = 1\n").unwrap();
    // 100 frames of 20 ms play for two seconds, well past the deadline
    let h = Harness::build_with_recording(LoopbackOptions::default(), config, 100);
    let call_id = h.offer(Some("long")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    h.transport(&call_id).set_connectivity(ConnectivityState::Connected);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let session = h.gateway.registry().get(&call_id).unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.transport(&call_id).written_frames().len(), 100);
    assert!(!h.gateway.registry().contains(&call_id));
}

#[tokio::test(start_paused = true)]
async fn test_terminate_while_streaming() {
    let h = Harness::new();
    let call_id = h.offer(Some("cut")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    let transport = h.transport(&call_id);
    transport.set_connectivity(ConnectivityState::Connected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.gateway.dispatch_action(&action("cut", "hangup")).await.unwrap();
    assert_eq!(status, ActionStatus::Processed);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let sent = transport.written_frames().len();
    assert!(sent > 0 && sent < RECORDING_FRAMES, "sent {} frames", sent);
    assert!(transport.is_closed());
    assert!(h.gateway.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_feedback_drain_lives_only_while_streaming() {
    let h = Harness::build_with_recording(LoopbackOptions::default(), GatewayConfig::default(), 100);
    let call_id = h.offer(Some("rtcp")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    let transport = h.transport(&call_id);
    assert_eq!(transport.feedback_reads(), 0);

    transport.set_connectivity(ConnectivityState::Connected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let session = h.gateway.registry().get(&call_id).unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(transport.feedback_reads(), 1);
    assert_eq!(transport.active_feedback_readers(), 1);

    let status = h.gateway.dispatch_action(&action("rtcp", "terminate")).await.unwrap();
    assert_eq!(status, ActionStatus::Processed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(transport.is_closed());
    assert_eq!(transport.active_feedback_readers(), 0);
    assert_eq!(transport.feedback_reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_recording_closes_call() {
    let h = Harness::build_with_media(
        LoopbackOptions::default(),
        GatewayConfig::default(),
        StaticMediaSource::new(),
    );
    let call_id = h.offer(Some("silent")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    let transport = h.transport(&call_id);
    transport.set_connectivity(ConnectivityState::Connected);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(transport.written_frames().is_empty());
    assert_eq!(transport.feedback_reads(), 0);
    assert!(transport.is_closed());
    assert!(!h.gateway.registry().contains(&call_id));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_pacer() {
    let h = Harness::new();
    let call_id = h.offer(Some("drop")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    let transport = h.transport(&call_id);
    transport.set_connectivity(ConnectivityState::Connected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.set_connectivity(ConnectivityState::Disconnected);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(transport.written_frames().len() < RECORDING_FRAMES);
    assert!(!h.gateway.registry().contains(&call_id));
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_before_connect_closes_session() {
    let h = Harness::new();
    let call_id = h.offer(Some("fail")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;

    h.transport(&call_id).set_connectivity(ConnectivityState::Failed);
    settle().await;

    assert!(!h.gateway.registry().contains(&call_id));
    assert!(h.transport(&call_id).written_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_ends_stream() {
    let h = Harness::with_options(LoopbackOptions {
        fail_writes_after: Some(3),
        ..Default::default()
    });
    let call_id = h.offer(Some("wfail")).await;
    h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    settle().await;
    h.transport(&call_id).set_connectivity(ConnectivityState::Connected);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport(&call_id).written_frames().len(), 3);
    assert!(h.gateway.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_remote_description_terminates() {
    let h = Harness::with_options(LoopbackOptions {
        fail_remote_description: true,
        ..Default::default()
    });
    let call_id = h.offer(Some("badsdp")).await;

    let status = h.gateway.dispatch_action(&accept(&call_id)).await.unwrap();
    assert_eq!(status, ActionStatus::Processed);
    settle().await;

    assert!(!h.gateway.registry().contains(&call_id));
    assert!(h.transport(&call_id).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_action_validation_order() {
    let h = Harness::new();
    h.offer(Some("known")).await;

    let err = h.gateway.dispatch_action(&action("  ", "accept")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));

    let status = h.gateway.dispatch_action(&action("unknown", "transfer")).await.unwrap();
    assert_eq!(status, ActionStatus::NoSession);

    let err = h.gateway.dispatch_action(&action("known", "transfer")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));

    let err = h.gateway.dispatch_action(&action("known", "accept")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));
    assert!(h.gateway.registry().get(&"known".into()).unwrap().decision().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_live_call_id_rejected() {
    let h = Harness::new();
    h.offer(Some("dup")).await;

    let err = h
        .gateway
        .create_offer(OfferRequest {
            call_id: Some("dup".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DuplicateCall { .. }));
    assert_eq!(h.transports.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_id_reusable_after_close() {
    let h = Harness::new();
    h.offer(Some("reuse")).await;
    h.gateway.dispatch_action(&action("reuse", "reject")).await.unwrap();

    let call_id = h.offer(Some("reuse")).await;
    assert_eq!(
        h.gateway.registry().get(&call_id).unwrap().state(),
        SessionState::Negotiating
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_surface_and_clean_up() {
    let h = Harness::with_options(LoopbackOptions {
        fail_create: true,
        ..Default::default()
    });
    let err = h.gateway.create_offer(OfferRequest::default()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));
    assert!(h.gateway.registry().is_empty());

    let h = Harness::with_options(LoopbackOptions {
        fail_add_media: true,
        ..Default::default()
    });
    let err = h
        .gateway
        .create_offer(OfferRequest {
            call_id: Some("nomedia".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));
    assert!(h.gateway.registry().is_empty());
    assert!(h.transport(&"nomedia".into()).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_gather_timeout_uses_partial_description() {
    let h = Harness::with_options(LoopbackOptions {
        stall_gathering: true,
        ..Default::default()
    });
    let started = tokio::time::Instant::now();
    let call_id = h.offer(Some("slow")).await;

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(h.gateway.registry().contains(&call_id));
}

fn answer_request(call_id: &str) -> AnswerRequest {
    AnswerRequest {
        call_id: Some(call_id.to_string()),
        to: "15550002".to_string(),
        action: "connect".to_string(),
        session: SessionDescription::offer("v=0\r\no=- 7 2 IN IP4 10.0.0.1\r\n"),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_answer_flow_streams_without_decision() {
    let h = Harness::new();
    let response = h.gateway.create_answer(answer_request("inbound")).await.unwrap();

    assert_eq!(response.call_id.as_str(), "inbound");
    assert_eq!(response.answer.sdp_type, SdpType::Answer);
    let session = h.gateway.registry().get(&response.call_id).unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(!session.decision().is_pending());

    let status = h.gateway.dispatch_action(&accept(&response.call_id)).await.unwrap();
    assert_eq!(status, ActionStatus::AlreadyDecided);

    let transport = h.transport(&response.call_id);
    transport.set_connectivity(ConnectivityState::Connected);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.written_frames().len(), RECORDING_FRAMES);
    assert!(h.gateway.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_answer_flow_validation() {
    let h = Harness::new();

    let mut wrong_action = answer_request("a1");
    wrong_action.action = "accept".to_string();
    let err = h.gateway.create_answer(wrong_action).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));

    let mut empty_sdp = answer_request("a2");
    empty_sdp.session.sdp = "  ".to_string();
    let err = h.gateway.create_answer(empty_sdp).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation { .. }));

    assert_eq!(h.transports.created_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_registry() {
    let h = Harness::new();
    let a = h.offer(Some("a")).await;
    let b = h.offer(Some("b")).await;

    assert_eq!(h.gateway.shutdown().await, 2);
    assert!(h.gateway.registry().is_empty());
    assert!(h.transport(&a).is_closed());
    assert!(h.transport(&b).is_closed());
}
