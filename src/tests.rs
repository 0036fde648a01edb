//! End-to-end tests against an in-process mock push server.

use std::io::Write as _;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::client::PushClient;
use crate::codec::{FrameType, HEADER_SIZE, STATUS_OK, STATUS_UNAUTHORIZED};
use crate::config::PushConfig;
use crate::monitor::MonitorDescriptor;

async fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn test_config(port: u16) -> PushConfig {
    PushConfig::builder("user", "pass").hostname("127.0.0.1").secure(false).port(port).build()
}

/// Reads the 6-byte header and body of a `ConnectionRequest`, without
/// interpreting it, and returns the raw bytes read.
async fn read_connection_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.expect("read handshake header");
    let body_len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await.expect("read handshake body");
    let mut full = header.to_vec();
    full.extend(body);
    full
}

fn encode_connection_response(status: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u16(FrameType::ConnectionResponse as u16);
    buf.put_u32(4);
    buf.put_u16(0); // reserved
    buf.put_u16(status);
    buf
}

fn encode_publish_message(block_id: u16, compression: u8, payload: &[u8]) -> BytesMut {
    let body_len = 10 + payload.len();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
    buf.put_u16(FrameType::PublishMessage as u16);
    buf.put_u32(body_len as u32);
    buf.put_u16(block_id);
    buf.put_u16(0); // reserved
    buf.put_u8(compression);
    buf.put_slice(&[0u8; 5]); // reserved
    buf.put_slice(payload);
    buf
}

async fn read_ack(stream: &mut TcpStream) -> (u16, u16) {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.expect("read ack header");
    assert_eq!(&header[0..2], &(FrameType::PublishMessageReceived as u16).to_be_bytes());
    let mut body = [0u8; 4];
    stream.read_exact(&mut body).await.expect("read ack body");
    let block_id = u16::from_be_bytes([body[0], body[1]]);
    let status = u16::from_be_bytes([body[2], body[3]]);
    (block_id, status)
}

#[tokio::test]
async fn successful_handshake_establishes_a_session() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();
        stream
    });

    let client = PushClient::new(test_config(port));
    let session = client.create_session(9001, |_payload| true).await;
    assert!(session.is_ok());

    let _stream = server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn rejected_handshake_surfaces_auth_error() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_UNAUTHORIZED)).await.unwrap();
        stream.flush().await.unwrap();
    });

    let client = PushClient::new(test_config(port));
    let err = client.create_session(9001, |_payload| true).await.unwrap_err();
    assert!(matches!(err, crate::error::PushError::Auth(STATUS_UNAUTHORIZED)));

    server.await.unwrap();
}

#[tokio::test]
async fn uncompressed_publish_is_delivered_and_acked() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();

        stream.write_all(&encode_publish_message(42, 0, b"hello")).await.unwrap();
        stream.flush().await.unwrap();

        let ack = read_ack(&mut stream).await;
        assert_eq!(ack, (42, STATUS_OK));
        stream
    });

    let (tx, rx) = std_mpsc::channel();
    let client = PushClient::new(test_config(port));
    client
        .create_session(9001, move |payload| {
            tx.send(payload.to_vec()).unwrap();
            true
        })
        .await
        .unwrap();

    let received = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    assert_eq!(received, b"hello");

    server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn gzip_compressed_publish_is_decompressed_before_dispatch() {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"compressed payload").unwrap();
    let compressed = encoder.finish().unwrap();

    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();

        stream.write_all(&encode_publish_message(7, 1, &compressed)).await.unwrap();
        stream.flush().await.unwrap();

        let ack = read_ack(&mut stream).await;
        assert_eq!(ack.0, 7);
        stream
    });

    let (tx, rx) = std_mpsc::channel();
    let client = PushClient::new(test_config(port));
    client
        .create_session(9001, move |payload| {
            tx.send(payload.to_vec()).unwrap();
            true
        })
        .await
        .unwrap();

    let received = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    assert_eq!(received, b"compressed payload");

    server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn publish_frame_split_across_several_writes_still_dispatches_once() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();

        let frame = encode_publish_message(99, 0, b"fragmented-body");
        for chunk in frame.chunks(3) {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let ack = read_ack(&mut stream).await;
        assert_eq!(ack.0, 99);
        stream
    });

    let (tx, rx) = std_mpsc::channel();
    let client = PushClient::new(test_config(port));
    client
        .create_session(9001, move |payload| {
            tx.send(payload.to_vec()).unwrap();
            true
        })
        .await
        .unwrap();

    let received = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    assert_eq!(received, b"fragmented-body");
    assert_eq!(rx.try_recv().is_err(), true);

    server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn session_restarts_after_server_closes_connection() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut first).await;
        first.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        first.flush().await.unwrap();
        drop(first); // force the reader to observe EOF and restart

        let (mut second, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut second).await;
        second.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        second.flush().await.unwrap();

        second.write_all(&encode_publish_message(1, 0, b"after-restart")).await.unwrap();
        second.flush().await.unwrap();
        let ack = read_ack(&mut second).await;
        assert_eq!(ack.0, 1);
    });

    let (tx, rx) = std_mpsc::channel();
    let client = PushClient::new(test_config(port));
    let session = client
        .create_session(9001, move |payload| {
            tx.send(payload.to_vec()).unwrap();
            true
        })
        .await
        .unwrap();

    let received = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    assert_eq!(received, b"after-restart");
    assert_eq!(client.session_state(session), Some(crate::session::SessionState::Active));

    server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn stop_session_transitions_state_to_stopped() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();
        stream
    });

    let client = PushClient::new(test_config(port));
    let session = client.create_session(9001, |_payload| true).await.unwrap();
    assert_eq!(client.session_state(session), Some(crate::session::SessionState::Active));

    client.stop_session(session).await.unwrap();
    assert_eq!(client.session_state(session), None);

    let _stream = server.await.unwrap();
    client.stop_all().await;
}

#[tokio::test]
async fn stop_all_returns_even_with_multiple_callback_workers() {
    let (listener, port) = bind_loopback().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_connection_request(&mut stream).await;
        stream.write_all(&encode_connection_response(STATUS_OK)).await.unwrap();
        stream.flush().await.unwrap();
        stream
    });

    let config = PushConfig::builder("user", "pass")
        .hostname("127.0.0.1")
        .secure(false)
        .port(port)
        .workers(4)
        .build();
    let client = PushClient::new(config);
    client.create_session(9001, |_payload| true).await.unwrap();

    let _stream = server.await.unwrap();
    // Regression test: this must return rather than hang forever waiting on
    // callback workers that never see their queue close.
    tokio::time::timeout(Duration::from_secs(5), client.stop_all())
        .await
        .expect("stop_all must not hang");
}

#[tokio::test]
async fn monitor_lifecycle_round_trips_through_http() {
    // MonitorDescriptor is exercised directly; the HTTP collaborator's own
    // request/response parsing logic is covered by monitor.rs's unit tests.
    // The live HTTP round trip itself requires a real web services endpoint
    // and is out of scope here.
    let descriptor = MonitorDescriptor::new(["DeviceCore[U]", "FileDataCore"]).batch_size(5);
    assert_eq!(descriptor.topics, vec!["DeviceCore[U]", "FileDataCore"]);
    assert_eq!(descriptor.batch_size, 5);
}
