//! Stop-and-wait transport behavior over real sockets.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{net::UdpSocket, time::timeout};

use sixsched::{
    channel::{SendConfig, UdpAckChannel},
    error::Error,
    stats::RunStats,
    wire::{self, Header, PacketClass},
    NodeAddr,
};

mod common;
#[allow(unused_imports)]
use crate::common::enable_tracing;

/// A channel bound on loopback with the supplied tuning.
async fn channel(config: SendConfig) -> (Arc<UdpAckChannel>, SocketAddr, Arc<RunStats>) {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();
    let stats = Arc::new(RunStats::new(1, config.ack_timeout));

    (
        Arc::new(UdpAckChannel::new(socket, config, Arc::clone(&stats))),
        addr,
        stats,
    )
}

/// A raw peer socket standing in for a mote.
async fn raw_peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    (socket, addr)
}

async fn recv_frame(socket: &UdpSocket) -> (Header, Vec<u8>, SocketAddr) {
    let mut buffer = [0u8; 2048];
    let (len, from) = socket.recv_from(&mut buffer).await.unwrap();
    let (header, payload) = wire::strip(&buffer[..len]).unwrap();

    (header, payload.to_vec(), from)
}

async fn send_ack(socket: &UdpSocket, to: SocketAddr, sequence: u8) {
    let ack = wire::ack_packet(sequence).unwrap();
    socket.send_to(&ack, to).await.unwrap();
}

#[tokio::test]
async fn send_completes_on_matching_ack() {
    let (channel, channel_addr, _) = channel(common::fast_send_config()).await;
    let (peer, peer_addr) = raw_peer().await;

    let sender = Arc::clone(&channel);
    let send = tokio::spawn(async move { sender.send(peer_addr, b"report").await });

    let (header, payload, from) = recv_frame(&peer).await;
    assert_eq!(header.class, PacketClass::Data);
    assert_eq!(header.sequence, 1);
    assert_eq!(payload, b"report");
    assert_eq!(from, channel_addr);

    send_ack(&peer, from, 1).await;
    send.await.unwrap().unwrap();

    // The next send to the same peer carries the next sequence number.
    let sender = Arc::clone(&channel);
    let send = tokio::spawn(async move { sender.send(peer_addr, b"more").await });

    let (header, _, from) = recv_frame(&peer).await;
    assert_eq!(header.sequence, 2);
    send_ack(&peer, from, 2).await;
    send.await.unwrap().unwrap();
}

#[tokio::test]
async fn stale_ack_does_not_end_the_wait() {
    let config = SendConfig {
        max_retries: 4,
        retry_interval: Duration::from_millis(50),
        ack_timeout: Duration::from_secs(10),
    };
    let (channel, _, _) = channel(config).await;
    let (peer, peer_addr) = raw_peer().await;

    let send = tokio::spawn(async move { channel.send(peer_addr, b"report").await });

    let (_, _, from) = recv_frame(&peer).await;

    // An ack below the expected sequence number is a stale duplicate.
    send_ack(&peer, from, 0).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!send.is_finished());

    send_ack(&peer, from, 1).await;
    timeout(Duration::from_secs(2), send)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn future_ack_triggers_one_immediate_retransmission() {
    // The ack timeout is far out, so any retransmission observed here was
    // triggered by the unexpected ack, not by a timer.
    let config = SendConfig {
        max_retries: 4,
        retry_interval: Duration::from_millis(50),
        ack_timeout: Duration::from_secs(10),
    };
    let (channel, _, _) = channel(config).await;
    let (peer, peer_addr) = raw_peer().await;

    let send = tokio::spawn(async move { channel.send(peer_addr, b"report").await });

    let (first_header, first_payload, from) = recv_frame(&peer).await;
    send_ack(&peer, from, 2).await;

    // Exactly one identical retransmission follows.
    let (header, payload, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
        .await
        .unwrap();
    assert_eq!(header, first_header);
    assert_eq!(payload, first_payload);

    assert!(timeout(Duration::from_millis(400), recv_frame(&peer))
        .await
        .is_err());

    send_ack(&peer, from, 1).await;
    timeout(Duration::from_secs(2), send)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn retries_exhaust_when_the_peer_stays_silent() {
    let config = SendConfig {
        max_retries: 3,
        retry_interval: Duration::from_millis(20),
        ack_timeout: Duration::from_millis(100),
    };
    let (channel, _, stats) = channel(config).await;
    let (peer, peer_addr) = raw_peer().await;

    let send = tokio::spawn(async move { channel.send(peer_addr, b"report").await });

    // The initial transmission plus one retransmission per timeout, except
    // the last, which ends the send instead.
    let (first_header, first_payload, _) = recv_frame(&peer).await;
    for _ in 0..2 {
        let (header, payload, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
            .await
            .unwrap();
        assert_eq!(header, first_header);
        assert_eq!(payload, first_payload);
    }

    let result = timeout(Duration::from_secs(2), send).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(Error::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(stats.timeouts_for(NodeAddr::new(peer_addr.ip())), 3);

    // Nothing further hits the wire.
    assert!(timeout(Duration::from_millis(300), recv_frame(&peer))
        .await
        .is_err());
}

#[tokio::test]
async fn at_most_one_packet_in_flight_per_peer() {
    let config = SendConfig {
        max_retries: 40,
        retry_interval: Duration::from_millis(50),
        ack_timeout: Duration::from_millis(200),
    };
    let (channel, _, _) = channel(config).await;
    let (peer, peer_addr) = raw_peer().await;

    let sender = Arc::clone(&channel);
    let send_a = tokio::spawn(async move { sender.send(peer_addr, b"first").await });
    let sender = Arc::clone(&channel);
    let send_b = tokio::spawn(async move { sender.send(peer_addr, b"second").await });

    // Whichever send won the race, nothing but (possibly retransmitted)
    // copies of it may appear until it is acked.
    let (first_header, first_payload, from) = recv_frame(&peer).await;
    assert_eq!(first_header.sequence, 1);

    let window = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        match timeout(Duration::from_millis(100), recv_frame(&peer)).await {
            Ok((header, payload, _)) => {
                assert_eq!(header, first_header);
                assert_eq!(payload, first_payload);
            }
            Err(_) => {}
        }

        if tokio::time::Instant::now() >= window {
            break;
        }
    }

    send_ack(&peer, from, 1).await;

    // Now the queued send goes out with the next sequence number.
    let (header, payload, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
        .await
        .unwrap();
    assert_eq!(header.sequence, 2);
    assert_ne!(payload, first_payload);

    send_ack(&peer, from, 2).await;
    send_a.await.unwrap().unwrap();
    send_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn inbound_data_is_acked_and_dispatched_once() {
    let (channel, channel_addr, _) = channel(common::fast_send_config()).await;
    let (peer, _) = raw_peer().await;

    let store: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let handler_store = Arc::clone(&store);
    tokio::spawn(async move {
        let _ = channel
            .serve(move |_, payload| {
                handler_store.lock().push(payload);
                Ok(())
            })
            .await;
    });

    let frame = wire::frame(PacketClass::Data, 1, b"hello").unwrap();
    peer.send_to(&frame, channel_addr).await.unwrap();

    let (header, _, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
        .await
        .unwrap();
    assert_eq!(header.class, PacketClass::Ack);
    assert_eq!(header.sequence, 1);
    assert_eq!(store.lock().len(), 1);

    // A duplicate is re-acked but not dispatched again.
    peer.send_to(&frame, channel_addr).await.unwrap();
    let (header, _, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
        .await
        .unwrap();
    assert_eq!(header.class, PacketClass::Ack);
    assert_eq!(header.sequence, 1);
    assert_eq!(store.lock().len(), 1);

    // A future sequence number is silently ignored while one is missing.
    let future = wire::frame(PacketClass::Data, 3, b"early").unwrap();
    peer.send_to(&future, channel_addr).await.unwrap();
    assert!(timeout(Duration::from_millis(300), recv_frame(&peer))
        .await
        .is_err());
    assert_eq!(store.lock().len(), 1);

    // The missing packet is processed normally when it arrives.
    let expected = wire::frame(PacketClass::Data, 2, b"world").unwrap();
    peer.send_to(&expected, channel_addr).await.unwrap();
    let (header, _, _) = timeout(Duration::from_secs(2), recv_frame(&peer))
        .await
        .unwrap();
    assert_eq!(header.sequence, 2);
    assert_eq!(store.lock().len(), 2);
}

#[tokio::test]
async fn data_without_ack_skips_transport_bookkeeping() {
    let (channel, channel_addr, _) = channel(common::fast_send_config()).await;
    let (peer, _) = raw_peer().await;

    let store: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let handler_store = Arc::clone(&store);
    tokio::spawn(async move {
        let _ = channel
            .serve(move |_, payload| {
                handler_store.lock().push(payload);
                Ok(())
            })
            .await;
    });

    let frame = wire::frame(PacketClass::DataNoAck, 0, b"fire-and-forget").unwrap();
    peer.send_to(&frame, channel_addr).await.unwrap();

    // No ack comes back, but the payload is dispatched.
    assert!(timeout(Duration::from_millis(300), recv_frame(&peer))
        .await
        .is_err());
    assert_eq!(store.lock().len(), 1);
    assert_eq!(&store.lock()[0][..], b"fire-and-forget");
}

#[tokio::test]
async fn malformed_datagrams_end_the_serve_loop() {
    let (channel, channel_addr, _) = channel(common::fast_send_config()).await;
    let (peer, _) = raw_peer().await;

    let serve = tokio::spawn(async move { channel.serve(|_, _| Ok(())).await });

    // A datagram without even a header byte is a fatal decode error.
    peer.send_to(&[], channel_addr).await.unwrap();

    let result = timeout(Duration::from_secs(2), serve).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::EmptyDatagram)));
}

#[tokio::test]
async fn unassigned_packet_class_ends_the_serve_loop() {
    let (channel, channel_addr, _) = channel(common::fast_send_config()).await;
    let (peer, _) = raw_peer().await;

    let serve = tokio::spawn(async move { channel.serve(|_, _| Ok(())).await });

    // Class bits 0b11 are unassigned.
    peer.send_to(&[0b1100_0000], channel_addr).await.unwrap();

    let result = timeout(Duration::from_secs(2), serve).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::InvalidPacketClass(_))));
}
