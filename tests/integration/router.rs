//! Session router integration tests
//!
//! Drives a [`SessionRouter`] against loopback mock redirect targets.
//!
//! # Test Categories
//!
//! 1. **Session Reuse**: one actor per key under concurrent input
//! 2. **Capacity**: packets for new keys beyond the limit are dropped
//! 3. **Ordering**: payloads of one session arrive in submission order
//! 4. **Failure Handling**: unreachable redirect targets
//! 5. **Eviction**: sessions closed by the redirect peer
//! 6. **Replies**: bytes read back from the redirect target
//! 7. **Lifecycle**: stop, backpressure and cancellation

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use tun_relay::connection::ConnectionState;
use tun_relay::session::{DropReason, PacketTemplate, RouterEvent, SessionRouter};

use super::sink::{
    unreachable_addr, wait_for_event, wait_until, Blackhole, MockSink, SinkBehavior,
};

// ============================================================================
// Session Reuse
// ============================================================================

#[tokio::test]
async fn test_concurrent_burst_same_key_creates_one_session() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = Arc::new(SessionRouter::new(sink.router_config()));
    router.start();

    let template = PacketTemplate::default();
    let mut tasks = Vec::new();
    for i in 0..50 {
        let router = Arc::clone(&router);
        tasks.push(tokio::spawn(async move {
            router.input_packet(template.build(format!("{i};"))).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(router.session_count().await, 1);
    assert_eq!(router.stats().sessions_created(), 1);
    assert_eq!(router.stats().packets_received(), 50);

    // Give a second actor the chance to show up if one had been created
    sink.wait_for_connections(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.connections(), 1);
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_sessions() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config());

    let template = PacketTemplate::default();
    for port in 40000..40004 {
        router.input_packet(template.with_src_port(port).build("x")).await;
    }

    assert_eq!(router.session_count().await, 4);
    sink.wait_for_connections(4).await;

    let mut ids: Vec<_> = router.sessions().await.iter().map(|s| s.session_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_capacity_limit_drops_extra_key() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config().with_max_connections(3));
    let mut events = router.subscribe();

    let template = PacketTemplate::default();
    for port in 1..=4 {
        router.input_packet(template.with_src_port(port).build("x")).await;
    }

    assert_eq!(router.session_count().await, 3);
    assert!(!router.contains(template.with_src_port(4).key()).await);
    assert_eq!(router.stats().packets_dropped_capacity(), 1);

    let event = wait_for_event(&mut events, |e| matches!(e, RouterEvent::PacketDropped { .. })).await;
    assert_eq!(
        event,
        RouterEvent::PacketDropped {
            key: template.with_src_port(4).key(),
            reason: DropReason::Capacity,
        }
    );

    // Existing sessions keep working at the limit
    router.input_packet(template.with_src_port(1).build("y")).await;
    assert_eq!(router.session_count().await, 3);
    assert_eq!(router.stats().packets_dropped_capacity(), 1);
}

#[tokio::test]
async fn test_single_slot_router_never_forwards_second_key() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config().with_max_connections(1));

    let k1 = PacketTemplate::default();
    let k2 = k1.with_src_port(23456);
    router.input_packet(k1.build("A")).await;
    router.input_packet(k2.build("B")).await;

    assert_eq!(router.session_count().await, 1);
    assert!(router.contains(k1.key()).await);
    assert!(!router.contains(k2.key()).await);

    assert_eq!(sink.wait_for_bytes(0, 1).await, b"A");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.connections(), 1);
    assert_eq!(sink.received(0), b"A");
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_ping_then_pong_share_one_socket() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config());

    let template = PacketTemplate::default();
    router.input_packet(template.build("ping")).await;
    router.input_packet(template.build("pong")).await;

    assert_eq!(sink.wait_for_bytes(0, 8).await, b"pingpong");
    assert_eq!(sink.connections(), 1);
}

#[tokio::test]
async fn test_many_payloads_keep_submission_order() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config());

    let template = PacketTemplate::default();
    let mut expected = Vec::new();
    for i in 0..200 {
        let payload = format!("msg-{i:03};");
        expected.extend_from_slice(payload.as_bytes());
        router.input_packet(template.build(payload)).await;
    }

    let received = sink.wait_for_bytes(0, expected.len()).await;
    assert_eq!(received, expected);
    assert_eq!(router.stats().packets_forwarded(), 200);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_unreachable_redirect_retries_without_second_actor() {
    let addr = unreachable_addr().await;
    let config = tun_relay::config::RouterConfig::new(addr.ip().to_string(), addr.port())
        .with_connect_timeout(Duration::from_secs(2));
    let router = SessionRouter::new(config);

    let template = PacketTemplate::default();
    router.input_packet(template.build("first")).await;
    router.input_packet(template.build("second")).await;

    assert_eq!(router.session_count().await, 1);
    assert_eq!(router.stats().sessions_created(), 1);

    // One attempt from the initial start, one retry per payload
    let stats = Arc::clone(router.stats());
    wait_until(|| stats.connect_failures() >= 3).await;
    assert_eq!(stats.packets_dropped_unconnected(), 2);
    assert_eq!(stats.packets_forwarded(), 0);

    let sessions = router.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, ConnectionState::Failed);
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test]
async fn test_peer_close_evicts_session() {
    let sink = MockSink::start(SinkBehavior::CloseAfterRead).await;
    let router = SessionRouter::new(sink.router_config());
    let mut events = router.subscribe();

    let template = PacketTemplate::default();
    router.input_packet(template.build("hello")).await;

    let event = wait_for_event(&mut events, |e| matches!(e, RouterEvent::SessionEvicted { .. })).await;
    assert_eq!(
        event,
        RouterEvent::SessionEvicted {
            session_id: 1,
            key: template.key(),
        }
    );
    assert_eq!(router.session_count().await, 0);
    assert_eq!(router.stats().sessions_evicted(), 1);

    // Next packet for the same key gets a fresh actor
    router.input_packet(template.build("again")).await;
    let event = wait_for_event(&mut events, |e| matches!(e, RouterEvent::SessionCreated { .. })).await;
    assert_eq!(
        event,
        RouterEvent::SessionCreated {
            session_id: 2,
            key: template.key(),
        }
    );
    sink.wait_for_connections(2).await;
    assert_eq!(sink.wait_for_bytes(1, 5).await, b"again");
}

#[tokio::test]
async fn test_closed_session_kept_without_eviction() {
    let sink = MockSink::start(SinkBehavior::CloseAfterRead).await;
    let mut config = sink.router_config();
    config.evict_on_close = false;
    let router = SessionRouter::new(config);

    let template = PacketTemplate::default();
    router.input_packet(template.build("hello")).await;
    sink.wait_for_bytes(0, 5).await;

    let mut state = ConnectionState::Idle;
    for _ in 0..500 {
        state = router.sessions().await[0].state;
        if state == ConnectionState::Closed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, ConnectionState::Closed);
    assert_eq!(router.session_count().await, 1);
    assert_eq!(router.stats().sessions_evicted(), 0);
}

// ============================================================================
// Replies
// ============================================================================

#[tokio::test]
async fn test_replies_are_published() {
    let sink = MockSink::start(SinkBehavior::Echo).await;
    let router = SessionRouter::new(sink.router_config());
    let mut replies = router.take_reply_rx().expect("reply receiver");

    let template = PacketTemplate::default();
    router.input_packet(template.build("echo me")).await;

    let mut data = Vec::new();
    while data.len() < 7 {
        let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("reply channel closed");
        assert_eq!(reply.key, template.key());
        data.extend_from_slice(&reply.data);
    }
    assert_eq!(data, b"echo me");
    assert_eq!(router.stats().bytes_received(), 7);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_closes_connections() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let router = SessionRouter::new(sink.router_config());
    router.start();
    router.start();

    let template = PacketTemplate::default();
    router.input_packet(template.build("a")).await;
    router.input_packet(template.with_src_port(1).build("b")).await;
    sink.wait_for_connections(2).await;

    router.stop().await;
    router.stop().await;

    assert_eq!(router.session_count().await, 0);
    let snapshot = router.stats().snapshot();
    assert_eq!(snapshot.sessions_created, 2);
    assert_eq!(snapshot.active_sessions(), 0);

    router.input_packet(template.build("late")).await;
    assert_eq!(router.session_count().await, 0);
}

#[tokio::test]
async fn test_stalled_peer_drops_excess_payloads() {
    const PACKETS: u64 = 1000;
    const QUEUE: u64 = 4;

    let sink = MockSink::start(SinkBehavior::Stall).await;
    let router = SessionRouter::new(sink.router_config().with_session_queue_size(4));
    let mut events = router.subscribe();

    // Far more than loopback socket buffers absorb
    let template = PacketTemplate::default();
    let payload = Bytes::from(vec![0u8; 64 * 1024]);
    for _ in 0..PACKETS {
        router.input_packet(template.build(payload.clone())).await;
    }
    assert_eq!(router.session_count().await, 1);

    let stats = Arc::clone(router.stats());
    assert_eq!(stats.packets_received(), PACKETS);
    assert!(stats.packets_dropped_busy() > 0);
    // Only the session queue is held back; everything else was written or dropped
    assert!(stats.packets_dropped_busy() + stats.packets_forwarded() >= PACKETS - QUEUE);
    assert_eq!(stats.packets_dropped_unconnected(), 0);

    let event = wait_for_event(&mut events, |e| {
        matches!(e, RouterEvent::PacketDropped { reason: DropReason::SessionBusy, .. })
    })
    .await;
    assert_eq!(event.key(), template.key());

    // Stop does not wait for the blocked write
    tokio::time::timeout(Duration::from_secs(2), router.stop())
        .await
        .expect("stop blocked on a stalled write");
    assert_eq!(router.session_count().await, 0);
}

#[tokio::test]
async fn test_stop_cancels_pending_connect() {
    let target = Blackhole::start().await;
    let router = SessionRouter::new(target.router_config());

    let template = PacketTemplate::default();
    for i in 0..5 {
        router.input_packet(template.build(format!("queued {i}"))).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while router.sessions().await[0].state != ConnectionState::Connecting {
        assert!(tokio::time::Instant::now() < deadline, "actor never started connecting");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), router.stop())
        .await
        .expect("stop waited for the connect timeout");

    let stats = router.stats();
    assert_eq!(router.session_count().await, 0);
    assert_eq!(stats.sessions_evicted(), 1);
    // Queued payloads were discarded rather than retrying the connect
    assert_eq!(stats.connect_failures(), 0);
    assert_eq!(stats.packets_forwarded(), 0);
}
