//! Black-box protocol tests: a real loopback socket driven through the
//! handshake, control loop, and image-stream loop.

use std::sync::Arc;

use riv_core::binding::{ColorType, ElementType, RawImageBinding, RowOrientation};
use riv_core::config::ServerConfig;
use riv_core::provider::{SUBTYPE_RGB_RAW, CHANNEL_TYPE_IMAGE};
use riv_core::wire::{self, ImageStreamOp, Message};
use riv_core::{session, Core, Provider};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_test_provider() -> (Arc<Core>, std::net::SocketAddr, Arc<RawImageBinding>) {
    let core = Core::new(ServerConfig::default());
    let provider = Arc::new(Provider::new(core.graph().clone(), "cam"));
    let binding = Arc::new(RawImageBinding::new(
        2,
        1,
        ColorType::Rgb,
        ElementType::Byte,
        RowOrientation::TopDown,
        0,
    ));
    provider.attach_binding("frame", binding.clone());
    core.register_provider(provider).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let core_for_accept = core.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let core = core_for_accept.clone();
            tokio::spawn(session::run(socket, core));
        }
    });

    (core, addr, binding)
}

#[tokio::test]
async fn handshake_then_control_round_trip() {
    let (_core, addr, _binding) = spawn_test_provider().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    wire::read_and_check_handshake(&mut stream).await.unwrap();
    wire::write_request(&mut stream, "cam").await.unwrap();
    let status = wire::read_status(&mut stream).await.unwrap();
    assert_eq!(status, 200);

    wire::write_message(&mut stream, &Message::new(wire::MSG_QUERY_DATA_CHANNELS, vec![]))
        .await
        .unwrap();
    let reply = wire::read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, wire::MSG_DATA_CHANNELS);
    let channels = wire::decode_data_channels(&reply.body).unwrap();
    assert_eq!(channels.len(), 2);
    assert!(channels.iter().any(|c| c.name == "frame" && c.subtype == SUBTYPE_RGB_RAW));
}

#[tokio::test]
async fn unknown_provider_gets_404() {
    let (_core, addr, _binding) = spawn_test_provider().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    wire::read_and_check_handshake(&mut stream).await.unwrap();
    wire::write_request(&mut stream, "nope").await.unwrap();
    let status = wire::read_status(&mut stream).await.unwrap();
    assert_eq!(status, 404);
}

#[tokio::test]
async fn unsupported_subtype_gets_415() {
    let (core, addr, _binding) = spawn_test_provider().await;
    let provider = core.find_provider("cam").unwrap();
    let identity = provider.binding_identity_hex("frame").unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    wire::read_and_check_handshake(&mut stream).await.unwrap();
    wire::write_request(
        &mut stream,
        &format!("cam?n={identity}&t={CHANNEL_TYPE_IMAGE}&s=99"),
    )
    .await
    .unwrap();
    let status = wire::read_status(&mut stream).await.unwrap();
    assert_eq!(status, 415);
}

#[tokio::test]
async fn frame_pull_delivers_requested_time_code() {
    let (core, addr, binding) = spawn_test_provider().await;
    let provider = core.find_provider("cam").unwrap();
    let identity = provider.binding_identity_hex("frame").unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    wire::read_and_check_handshake(&mut stream).await.unwrap();
    wire::write_request(
        &mut stream,
        &format!("cam?n={identity}&t={CHANNEL_TYPE_IMAGE}&s={SUBTYPE_RGB_RAW}"),
    )
    .await
    .unwrap();
    let status = wire::read_status(&mut stream).await.unwrap();
    assert_eq!(status, 200);

    binding.write_frame(&[1, 2, 3, 4, 5, 6]);

    let request = wire::encode_image_stream_request(ImageStreamOp::NextFrame(42));
    tokio::io::AsyncWriteExt::write_all(&mut stream, &request)
        .await
        .unwrap();

    let reply = wire::read_message(&mut stream).await.unwrap();
    assert_eq!(reply.id, wire::MSG_IMAGE_DATA_BLOB);
    let time_code = u32::from_le_bytes(reply.body[4..8].try_into().unwrap());
    assert_eq!(time_code, 42);
}

#[tokio::test]
async fn restart_with_byte_swapped_arg_closes_the_connection() {
    let (core, addr, _binding) = spawn_test_provider().await;
    let provider = core.find_provider("cam").unwrap();
    let identity = provider.binding_identity_hex("frame").unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    wire::read_and_check_handshake(&mut stream).await.unwrap();
    wire::write_request(
        &mut stream,
        &format!("cam?n={identity}&t={CHANNEL_TYPE_IMAGE}&s={SUBTYPE_RGB_RAW}"),
    )
    .await
    .unwrap();
    assert_eq!(wire::read_status(&mut stream).await.unwrap(), 200);

    let request = wire::encode_image_stream_request(ImageStreamOp::Restart(wire::TEST_DWORD_SWAPPED));
    tokio::io::AsyncWriteExt::write_all(&mut stream, &request)
        .await
        .unwrap();

    // The server treats this as a protocol violation and closes; any
    // further read from the client side observes EOF rather than a
    // well-formed reply.
    let mut buf = [0u8; 1];
    let n = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await.unwrap();
    assert_eq!(n, 0);
}
