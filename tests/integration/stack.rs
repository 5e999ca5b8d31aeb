//! Stack facade integration tests
//!
//! Exercises [`TunStack`] end to end: packets in, redirect traffic out,
//! delegate fan-out and the packet-out hook.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use tun_relay::config::{load_config_str, Ipv4Settings};
use tun_relay::error::StackError;
use tun_relay::session::PacketTemplate;
use tun_relay::stack::{
    AddressFamily, OutboundPacket, PacketEngine, SocketEvent, StackDelegate, TcpSocketDelegate,
    TcpSocketInfo, TunStack,
};

use super::sink::{MockSink, SinkBehavior};

fn socket(id: u64) -> TcpSocketInfo {
    TcpSocketInfo::new(
        id,
        "10.0.0.2:12345".parse().unwrap(),
        "1.1.1.1:80".parse().unwrap(),
    )
}

/// Delegate that only cares about accepts and closes
#[derive(Default)]
struct CountingDelegate {
    accepted: AtomicUsize,
    closed: AtomicUsize,
}

impl StackDelegate for CountingDelegate {
    fn did_accept_tcp_socket(&self, _socket: &TcpSocketInfo) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }
}

impl TcpSocketDelegate for CountingDelegate {
    fn did_close(&self, _socket: &TcpSocketInfo) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine that counts accepted packets per family
#[derive(Default)]
struct CountingEngine {
    v4: AtomicUsize,
    v6: AtomicUsize,
}

impl PacketEngine for CountingEngine {
    fn input(&self, _packet: &[u8], family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4 => self.v4.fetch_add(1, Ordering::SeqCst),
            AddressFamily::Ipv6 => self.v6.fetch_add(1, Ordering::SeqCst),
        };
        true
    }
}

#[tokio::test]
async fn test_stack_relays_to_redirect() {
    let sink = MockSink::start(SinkBehavior::Echo).await;
    let stack = TunStack::new(sink.router_config());
    stack.start();

    let template = PacketTemplate::default();
    stack.input_packet(template.build("Hello Fake TCP\n")).await;
    stack.input_packet(template.build("Hello Fake TCP\n")).await;

    let received = sink.wait_for_bytes(0, 30).await;
    assert_eq!(received, b"Hello Fake TCP\nHello Fake TCP\n");
    assert_eq!(stack.router().session_count().await, 1);

    stack.stop().await;
    assert!(!stack.is_running());
    assert_eq!(stack.router().session_count().await, 0);
}

#[tokio::test]
async fn test_stack_try_input_packet() {
    let sink = MockSink::start(SinkBehavior::Collect).await;
    let stack = TunStack::new(sink.router_config());
    stack.start();

    assert!(stack.try_input_packet(PacketTemplate::default().build("x")));
    assert_eq!(sink.wait_for_bytes(0, 1).await, b"x");

    stack.stop().await;
    assert!(!stack.try_input_packet(PacketTemplate::default().build("y")));
}

#[tokio::test]
async fn test_partial_delegates_receive_events() {
    let stack = TunStack::new(tun_relay::config::RouterConfig::default());

    // No delegates registered: events are ignored
    stack.accept_tcp_socket(&socket(1));
    stack.handle_socket_event(&socket(1), &SocketEvent::Closed);

    let delegate = Arc::new(CountingDelegate::default());
    stack.set_delegate(delegate.clone());
    stack.set_socket_delegate(delegate.clone());

    stack.accept_tcp_socket(&socket(2));
    for event in [
        SocketEvent::Read(Bytes::from_static(b"data")),
        SocketEvent::Wrote(4),
        SocketEvent::ReadShutdown,
        SocketEvent::Reset,
        SocketEvent::Aborted,
        SocketEvent::Closed,
    ] {
        stack.handle_socket_event(&socket(2), &event);
    }

    assert_eq!(delegate.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_outbound_hook_delivers_batch_unchanged() {
    let stack = TunStack::new(tun_relay::config::RouterConfig::default());
    let batches = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&batches);
    stack
        .set_outbound_handler(move |batch: Vec<OutboundPacket>| sink.lock().push(batch))
        .unwrap();
    assert!(matches!(
        stack.set_outbound_handler(|_| {}),
        Err(StackError::OutboundHandlerAlreadySet)
    ));

    let batch = vec![
        OutboundPacket::new(Bytes::from_static(&[0x45, 0, 0, 20]), AddressFamily::Ipv4),
        OutboundPacket::new(Bytes::from_static(&[0x60, 0, 0, 0]), AddressFamily::Ipv6),
        OutboundPacket::new(Bytes::new(), AddressFamily::Ipv4),
    ];

    // The hook may be called from any runtime thread
    let stack = Arc::new(stack);
    let writer = Arc::clone(&stack);
    let sent = batch.clone();
    let delivered = tokio::spawn(async move { writer.write_packets(sent) })
        .await
        .unwrap();

    assert!(delivered);
    let batches = batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], batch);
}

#[tokio::test]
async fn test_engine_receives_raw_packets() {
    let engine = Arc::new(CountingEngine::default());
    let stack = TunStack::with_engine(tun_relay::config::RouterConfig::default(), engine.clone());

    assert!(stack.inbound(&[0x45, 0, 0, 20], 4));
    assert!(stack.inbound(&[0x60, 0, 0, 0], 6));
    assert!(stack.inbound(&[0x45, 0, 0, 20], 4));
    assert!(!stack.inbound(&[0x00], 0));

    assert_eq!(engine.v4.load(Ordering::SeqCst), 2);
    assert_eq!(engine.v6.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stack_from_config_file_settings() {
    let config = load_config_str(
        r#"{
            "router": { "redirect_port": 1209, "max_connections": 4 },
            "stack": { "ipv4": { "address": "240.0.0.2", "netmask": "255.0.0.0", "gateway": "240.0.0.1" } }
        }"#,
    )
    .unwrap();

    let stack = TunStack::from_config(&config, None).unwrap();
    assert_eq!(stack.router().config().redirect_port, 1209);
    assert_eq!(stack.router().config().max_connections, 4);
    assert_eq!(
        stack.ipv4_settings(),
        Some(Ipv4Settings::new(
            Ipv4Addr::new(240, 0, 0, 2),
            Ipv4Addr::new(255, 0, 0, 0),
            Ipv4Addr::new(240, 0, 0, 1),
        ))
    );
}
