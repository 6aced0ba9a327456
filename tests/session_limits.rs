//! Deadlines, frame limits, ordering and teardown over a real socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use spoa_agent::application::Application;
use spoa_agent::engine::{arg_str, Arguments, EvaluationError, Evaluator, Phase, Verdict, VerdictAction};
use spoa_agent::protocol::{Frame, FrameFlags, FrameType, KvList, Payload, TypedValue};

mod common;
use common::*;

/// Sleeps for `delay_ms`, then allows with `data = seq`.
struct Sleepy;

#[async_trait]
impl Evaluator for Sleepy {
    async fn evaluate(&self, _: Phase, args: &Arguments) -> Result<Verdict, EvaluationError> {
        let delay = args.get("delay_ms").and_then(TypedValue::as_i64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        Ok(Verdict {
            action: VerdictAction::Allow,
            data: arg_str(args, "seq").unwrap_or_default().into_owned(),
            ..Verdict::default()
        })
    }
}

fn sleepy() -> HashMap<String, Arc<Application>> {
    HashMap::from([(
        "default".to_string(),
        Arc::new(Application::new("default", Arc::new(Sleepy))),
    )])
}

fn delayed(delay_ms: i64, seq: &str) -> KvList {
    KvList::new()
        .with("delay_ms", TypedValue::Int64(delay_ms))
        .with("seq", seq)
}

#[tokio::test]
async fn slow_evaluation_is_cut_off_at_the_deadline() {
    let mut config = test_config();
    config.timeouts.processing_ms = 200;
    let agent = start_agent_with(config, sleepy()).await;
    let mut proxy = ProxyClient::establish(agent.addr).await;

    let started = Instant::now();
    proxy
        .send(&Frame::notify(1, 1, vec![request(delayed(5_000, "slow"))]))
        .await;
    proxy
        .send(&Frame::notify(2, 1, vec![request(delayed(0, "fast"))]))
        .await;

    let fast = proxy.recv().await.unwrap();
    assert_eq!(fast.stream_id, 2);
    assert_eq!(action(&fast).as_deref(), Some("allow"));

    let slow = proxy.recv().await.unwrap();
    assert_eq!(slow.stream_id, 1);
    assert_eq!(error(&slow), Some(2));
    assert_eq!(action(&slow), None);
    assert!(unsets(&slow, "action"));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The connection keeps serving.
    let ack = proxy.notify(3, request(delayed(0, "after"))).await;
    assert_eq!(action(&ack).as_deref(), Some("allow"));

    agent.stop().await;
}

#[tokio::test]
async fn response_timeout_clears_the_request_action() {
    let mut config = test_config();
    config.timeouts.processing_ms = 300;
    let agent = start_agent_with(config, sleepy()).await;
    let mut proxy = ProxyClient::establish(agent.addr).await;

    let ack = proxy.notify(1, request(delayed(0, "req"))).await;
    assert_eq!(action(&ack).as_deref(), Some("allow"));
    assert_eq!(var(&ack, "data").and_then(|v| v.as_str().map(str::to_string)).as_deref(), Some("req"));

    let ack = proxy.notify(1, response(&id(&ack), delayed(5_000, "late"))).await;
    assert_eq!(error(&ack), Some(2));
    assert_eq!(status(&ack), Some(0));
    assert_eq!(action(&ack), None);
    assert!(unsets(&ack, "action"));
    assert!(unsets(&ack, "data"));

    agent.stop().await;
}

#[tokio::test]
async fn frames_of_one_stream_are_acked_in_arrival_order() {
    let mut config = test_config();
    config.timeouts.processing_ms = 2_000;
    let agent = start_agent_with(config, sleepy()).await;
    let mut proxy = ProxyClient::establish(agent.addr).await;

    for (frame_id, delay) in [(1u64, 50i64), (2, 40), (3, 30), (4, 20), (5, 10)] {
        let message = request(delayed(delay, &frame_id.to_string()));
        proxy.send(&Frame::notify(9, frame_id, vec![message])).await;
    }

    let mut order = Vec::new();
    for _ in 0..5 {
        let ack = proxy.recv().await.unwrap();
        assert_eq!(ack.stream_id, 9);
        let seq = var(&ack, "data").and_then(|v| v.as_str().map(str::to_string));
        assert_eq!(seq, Some(ack.frame_id.to_string()));
        order.push(ack.frame_id);
    }
    assert_eq!(order, vec![1, 2, 3, 4, 5]);

    agent.stop().await;
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let agent = start_agent_with(test_config(), sleepy()).await;
    let mut proxy = ProxyClient::connect(agent.addr).await;

    let reply = proxy.hello(1_024).await;
    assert_eq!(
        reply.kv_list().unwrap().get("max-frame-size"),
        Some(&TypedValue::Uint32(1_024))
    );

    // Only the length prefix: the agent must refuse before reading a body.
    proxy.send_raw(&4_096u32.to_be_bytes()).await;

    let frame = proxy.recv().await.unwrap();
    assert_eq!(frame.kind, FrameType::AgentDisconnect);
    assert_eq!(disconnect_status(&frame), Some(3));
    assert!(proxy.recv().await.is_none());

    agent.stop().await;
}

#[tokio::test]
async fn protocol_error_cancels_pending_acks() {
    let mut config = test_config();
    config.timeouts.processing_ms = 2_000;
    let agent = start_agent_with(config, sleepy()).await;
    let mut proxy = ProxyClient::establish(agent.addr).await;

    proxy
        .send(&Frame::notify(1, 1, vec![request(delayed(300, "pending"))]))
        .await;
    let mut fragment = Frame::notify(2, 1, vec![request(delayed(0, "fragment"))]);
    fragment.flags = FrameFlags::from_bits(0);
    proxy.send(&fragment).await;

    let frame = proxy.recv().await.unwrap();
    assert_eq!(frame.kind, FrameType::AgentDisconnect);
    assert_eq!(disconnect_status(&frame), Some(10));
    assert!(proxy.recv().await.is_none());

    agent.stop().await;
}

#[tokio::test]
async fn unsupported_version_is_refused() {
    let agent = start_agent_with(test_config(), sleepy()).await;
    let mut proxy = ProxyClient::connect(agent.addr).await;

    let hello = Frame {
        kind: FrameType::Hello,
        flags: FrameFlags::FIN,
        stream_id: 0,
        frame_id: 0,
        payload: Payload::KvList(
            KvList::new()
                .with("supported-versions", "1.0")
                .with("max-frame-size", TypedValue::Uint32(16_384))
                .with("capabilities", ""),
        ),
    };
    proxy.send(&hello).await;

    let frame = proxy.recv().await.unwrap();
    assert_eq!(frame.kind, FrameType::AgentDisconnect);
    assert_eq!(disconnect_status(&frame), Some(8));

    agent.stop().await;
}

#[tokio::test]
async fn shutdown_disconnects_established_sessions() {
    let agent = start_agent_with(test_config(), sleepy()).await;
    let mut proxy = ProxyClient::establish(agent.addr).await;

    let in_flight = Frame::notify(1, 1, vec![request(delayed(100, "drain"))]);
    proxy.send(&in_flight).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let tracker = agent.agent.tracker().clone();
    agent.shutdown.trigger();

    // In-flight work finishes before the disconnect.
    let ack = proxy.recv().await.unwrap();
    assert_eq!(ack.kind, FrameType::Ack);
    let frame = proxy.recv().await.unwrap();
    assert_eq!(frame.kind, FrameType::AgentDisconnect);
    assert_eq!(disconnect_status(&frame), Some(0));
    assert!(proxy.recv().await.is_none());

    assert!(tracker.wait_idle(Duration::from_secs(2)).await);
    agent.stop().await;
}
