mod support;

use std::net::Ipv4Addr;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use peerlink::net::{FramingKind, LengthPrefixedFraming};
use peerlink::stream::{self, Role};
use peerlink::{InboundMessage, NetError, PeerAddress, StreamSessions};

use support::{Recorder, loopback, loopback_any, options, settle, wait_until, within};

async fn server() -> StreamSessions {
    support::init_tracing();
    StreamSessions::listen_on(loopback_any(), options())
        .await
        .unwrap()
}

/// Echo every message back to whoever sent it.
fn echo(sessions: &StreamSessions) {
    let sender = sessions.sender();
    sessions.received().subscribe(move |message: &InboundMessage| {
        let sender = sender.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Some(peer) = message.sender {
                let _ = sender.send_to(&message.payload, peer).await;
            }
        });
    });
}

#[tokio::test]
async fn every_peer_is_reachable_through_a_fresh_address() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());

    let port = server.local_addr().port();
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(StreamSessions::connect(loopback(port)).await.unwrap());
    }

    wait_until("three accepts", || accepted.len() == 3).await;
    assert_eq!(server.peer_count(), 3);

    for client in &clients {
        let inbox = Recorder::<InboundMessage>::new();
        client.received().subscribe(inbox.observer());

        // Built from parts, not taken from the accepted notification.
        let fresh = PeerAddress::new("127.0.0.1".parse().unwrap(), client.local_addr().port());
        assert!(server.contains(fresh));
        server.send_to(b"hello", fresh).await.unwrap();

        wait_until("client inbox", || inbox.len() == 1).await;
        assert_eq!(inbox.payloads(), vec![b"hello".to_vec()]);
    }
}

#[tokio::test]
async fn large_single_write_arrives_as_one_message() {
    let server = server().await;
    let inbox = Recorder::<InboundMessage>::new();
    server.received().subscribe(inbox.observer());

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    raw.write_all(&payload).await.unwrap();

    wait_until("3000 bytes", || inbox.total_bytes() == 3000).await;
    settle().await;

    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox.payloads()[0], payload);
    assert_eq!(
        inbox.events()[0].sender,
        Some(PeerAddress::from(raw.local_addr().unwrap()))
    );
}

#[tokio::test]
async fn throttled_second_burst_is_a_separate_message() {
    let server = server().await;
    let inbox = Recorder::<InboundMessage>::new();
    server.received().subscribe(inbox.observer());

    // Larger than one 2048-byte scratch read.
    let first: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let second = vec![0x5a; 500];

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    raw.write_all(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    raw.write_all(&second).await.unwrap();

    wait_until("both bursts", || inbox.total_bytes() == 3500).await;
    settle().await;

    // The queue is empty during the pause, so the first burst is already
    // delivered when the second starts arriving.
    assert_eq!(inbox.payloads(), vec![first, second]);
}

#[tokio::test]
async fn orderly_close_reports_one_disconnect_and_no_data() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    let inbox = Recorder::<InboundMessage>::new();
    let gone = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());
    server.received().subscribe(inbox.observer());
    server.disconnected().subscribe(gone.observer());

    let raw = TcpStream::connect(server.local_addr()).await.unwrap();
    let peer = PeerAddress::from(raw.local_addr().unwrap());
    wait_until("accept", || accepted.len() == 1).await;

    drop(raw);

    wait_until("disconnect", || gone.len() == 1).await;
    settle().await;

    assert_eq!(gone.count_of(peer), 1);
    assert_eq!(gone.len(), 1);
    assert_eq!(inbox.len(), 0);
    assert!(!server.contains(peer));
}

#[tokio::test]
async fn reset_reports_exactly_one_disconnect() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    let gone = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());
    server.disconnected().subscribe(gone.observer());

    let raw = std::net::TcpStream::connect(server.local_addr()).unwrap();
    let peer = PeerAddress::from(raw.local_addr().unwrap());
    wait_until("accept", || accepted.len() == 1).await;

    // Zero linger turns close into RST.
    SockRef::from(&raw).set_linger(Some(Duration::ZERO)).unwrap();
    drop(raw);

    wait_until("disconnect", || gone.len() == 1).await;
    settle().await;

    assert_eq!(gone.count_of(peer), 1);
    assert_eq!(server.peer_count(), 0);
}

#[tokio::test]
async fn send_to_unknown_peer_is_not_found() {
    let server = server().await;
    let stranger = PeerAddress::v4(Ipv4Addr::LOCALHOST, 1);

    let err = server.send_to(b"x", stranger).await.unwrap_err();
    assert!(err.is_not_found());

    let err = server.disconnect_from(stranger).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn local_disconnect_fires_once_on_each_side() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    let server_gone = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());
    server.disconnected().subscribe(server_gone.observer());

    let client = StreamSessions::connect(server.local_addr()).await.unwrap();
    let client_gone = Recorder::<PeerAddress>::new();
    client.disconnected().subscribe(client_gone.observer());

    wait_until("accept", || accepted.len() == 1).await;
    let peer = accepted.events()[0];

    server.disconnect_from(peer).await.unwrap();

    wait_until("client notices", || client_gone.len() == 1).await;
    settle().await;

    assert_eq!(server_gone.events(), vec![peer]);
    assert_eq!(client_gone.len(), 1);
    assert_eq!(client.peer_count(), 0);
    assert!(server.disconnect_from(peer).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn broadcast_send_reaches_every_peer() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());

    let a = StreamSessions::connect(server.local_addr()).await.unwrap();
    let b = StreamSessions::connect(server.local_addr()).await.unwrap();
    let inbox_a = Recorder::<InboundMessage>::new();
    let inbox_b = Recorder::<InboundMessage>::new();
    a.received().subscribe(inbox_a.observer());
    b.received().subscribe(inbox_b.observer());

    wait_until("two accepts", || accepted.len() == 2).await;
    assert_eq!(server.send(b"all").await, 2);

    wait_until("both inboxes", || inbox_a.len() == 1 && inbox_b.len() == 1).await;
    assert_eq!(inbox_a.payloads(), vec![b"all".to_vec()]);
    assert_eq!(inbox_b.payloads(), vec![b"all".to_vec()]);
}

#[tokio::test]
async fn paired_request_echoes_through_the_client() {
    let server = server().await;
    echo(&server);

    let client = StreamSessions::connect_from(server.local_addr(), 0, options())
        .await
        .unwrap();
    assert_eq!(client.role(), Role::Client);
    assert_eq!(
        client.remote_addr(),
        Some(PeerAddress::from(server.local_addr()))
    );

    let reply = within(
        "paired request",
        client.send_and_receive_paired(b"ping", Some(Duration::from_secs(2))),
    )
    .await
    .unwrap()
    .expect("echo reply");

    assert_eq!(&reply.payload[..], b"ping");
    assert_eq!(reply.sender, Some(PeerAddress::from(server.local_addr())));
    assert_eq!(client.received().observer_count(), 0);
}

#[tokio::test]
async fn paired_request_is_not_supported_on_a_server() {
    let server = server().await;
    assert_eq!(server.role(), Role::Server);

    let err = server
        .send_and_receive_paired(b"ping", None)
        .await
        .unwrap_err();
    assert!(err.is_not_supported());
}

#[tokio::test]
async fn close_is_idempotent_and_drops_every_peer() {
    let server = server().await;
    let accepted = Recorder::<PeerAddress>::new();
    let gone = Recorder::<PeerAddress>::new();
    server.accepted().subscribe(accepted.observer());
    server.disconnected().subscribe(gone.observer());

    let a = StreamSessions::connect(server.local_addr()).await.unwrap();
    let b = StreamSessions::connect(server.local_addr()).await.unwrap();
    let (a_gone, b_gone) = (Recorder::<PeerAddress>::new(), Recorder::<PeerAddress>::new());
    a.disconnected().subscribe(a_gone.observer());
    b.disconnected().subscribe(b_gone.observer());

    wait_until("two accepts", || accepted.len() == 2).await;
    assert!(server.is_accepting());

    server.close().await;
    server.close().await;

    assert_eq!(gone.len(), 2);
    assert_eq!(server.peer_count(), 0);
    assert!(server.is_closed());
    assert!(!server.is_accepting());
    assert!(within("accept loop exit", server.stopped()).await.is_ok());
    assert!(matches!(
        server.send_to(b"x", accepted.events()[0]).await,
        Err(NetError::Closed)
    ));

    wait_until("clients notice", || a_gone.len() == 1 && b_gone.len() == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_during_connects_leaves_no_live_peer() {
    let server = server().await;
    let addr = server.local_addr();

    let dialer = tokio::spawn(async move {
        let mut streams = Vec::new();
        for _ in 0..200 {
            match TcpStream::connect(addr).await {
                Ok(stream) => streams.push(stream),
                Err(_) => break,
            }
        }
        streams
    });

    wait_until("some peers", || server.peer_count() >= 5).await;
    server.close().await;
    let _streams = dialer.await.unwrap();
    settle().await;

    assert_eq!(server.peer_count(), 0);
    assert!(server.peers().is_empty());
    assert!(!server.is_accepting());
}

#[tokio::test]
async fn connect_to_a_closed_port_fails() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let err = StreamSessions::connect(addr).await.unwrap_err();
    assert!(matches!(err, NetError::Connect { .. }));
}

#[tokio::test]
async fn one_shot_send_is_received_and_closed() {
    let server = server().await;
    let inbox = Recorder::<InboundMessage>::new();
    let gone = Recorder::<PeerAddress>::new();
    server.received().subscribe(inbox.observer());
    server.disconnected().subscribe(gone.observer());

    assert!(stream::send_once_quiet(b"once", server.local_addr(), 0).await);

    wait_until("payload", || inbox.total_bytes() == 4).await;
    wait_until("disconnect", || gone.len() == 1).await;
    assert_eq!(inbox.payloads(), vec![b"once".to_vec()]);
}

#[tokio::test]
async fn length_prefixed_framing_splits_a_combined_write() {
    support::init_tracing();
    let opts = options().with_framing(FramingKind::LengthPrefixed);
    let server = StreamSessions::listen_on(loopback_any(), opts).await.unwrap();
    let inbox = Recorder::<InboundMessage>::new();
    server.received().subscribe(inbox.observer());

    let framing = LengthPrefixedFraming::default();
    let mut wire = framing.encode(b"ab").unwrap().to_vec();
    wire.extend_from_slice(&framing.encode(b"cde").unwrap());
    wire.extend_from_slice(&framing.encode(b"").unwrap()[..2]);

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    raw.write_all(&wire).await.unwrap();

    wait_until("two frames", || inbox.len() == 2).await;
    settle().await;
    assert_eq!(inbox.payloads(), vec![b"ab".to_vec(), b"cde".to_vec()]);
}

#[tokio::test]
async fn oversized_frame_drops_the_peer() {
    support::init_tracing();
    let mut opts = options().with_framing(FramingKind::LengthPrefixed);
    opts.max_frame_len = 8;

    let server = StreamSessions::listen_on(loopback_any(), opts).await.unwrap();
    let inbox = Recorder::<InboundMessage>::new();
    let gone = Recorder::<PeerAddress>::new();
    server.received().subscribe(inbox.observer());
    server.disconnected().subscribe(gone.observer());

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    raw.write_all(&100u32.to_be_bytes()).await.unwrap();

    wait_until("protocol disconnect", || gone.len() == 1).await;
    assert_eq!(inbox.len(), 0);
    assert_eq!(server.peer_count(), 0);
}
