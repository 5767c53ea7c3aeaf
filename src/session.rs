//! The per-connection session state machine: handshake, then either a
//! control loop or an image-stream loop, until the peer goes away or a
//! protocol error ends things.
//!
//! One task per accepted socket, driven through explicit states:
//! Handshaking -> ReadingRequest -> (Control | StreamInit -> Stream) ->
//! Closing. The request line decides which of the two loop shapes a
//! session runs for the rest of its life.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::core::Core;
use crate::encoder::buffer::Buffer;
use crate::encoder::codec;
use crate::encoder::StreamEncoder;
use crate::error::{Result, RivError};
use crate::graph::{Capability, Hooks, NodeId};
use crate::provider::MessageSink;
use crate::uri;
use crate::wire::{self, ImageStreamOp, Message};

/// Unknown reserved ids are tolerated up to this count; the one that
/// reaches it is fatal.
const UNKNOWN_MESSAGE_ID_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    ReadingRequest,
    Control,
    StreamInit,
    Stream,
    Closing,
    Terminated,
}

/// Forwards provider broadcasts to this session's outbound channel. A
/// session never writes to its socket from two tasks at once: broadcast
/// traffic and direct replies both funnel through the one loop that owns
/// `OwnedWriteHalf`.
struct SessionSink {
    out_tx: mpsc::UnboundedSender<Message>,
}

impl MessageSink for SessionSink {
    fn send_message(&self, msg: Message) {
        let _ = self.out_tx.send(msg);
    }
}

struct SessionHooks;
impl Hooks for SessionHooks {}

/// Runs one accepted connection to completion. Always leaves the graph
/// node it registered fully disconnected before returning, whatever the
/// exit reason.
pub async fn run(stream: TcpStream, core: Arc<Core>) {
    let id = core
        .graph()
        .register(Arc::new(SessionHooks), &[Capability::Session]);

    let outcome = drive(stream, core.clone(), id).await;
    match outcome {
        Ok(()) => tracing::info!(?id, "session closed"),
        Err(err) if err.is_benign_close() => tracing::info!(?id, "session closed by peer"),
        Err(err) => tracing::warn!(?id, %err, "session ended with error"),
    }

    core.graph().disconnect_all_recursive(id);
    core.graph().remove(id);
    transition(SessionState::Closing, SessionState::Terminated);
}

async fn drive(stream: TcpStream, core: Arc<Core>, id: NodeId) -> Result<()> {
    let mut state = SessionState::Handshaking;
    let (mut read_half, mut write_half) = stream.into_split();

    wire::write_handshake(&mut write_half).await?;
    state = transition(state, SessionState::ReadingRequest);

    let request = wire::read_request(&mut read_half).await?;
    if request.is_empty() {
        // Silently dropped per the session edge cases: an empty request
        // string is not an error, just an immediate close.
        let _ = transition(state, SessionState::Closing);
        return Ok(());
    }

    let uri = match uri::parse_request(&request) {
        Ok(uri) => uri,
        Err(err) => {
            if let Some(status) = err.status_code() {
                let _ = wire::write_status(&mut write_half, status).await;
            }
            return Err(err);
        }
    };

    match uri.query {
        None => {
            state = transition(state, SessionState::Control);
            let _ = state;
            run_control(read_half, write_half, core, id, &uri.path).await
        }
        Some(query) => {
            state = transition(state, SessionState::StreamInit);
            let _ = state;
            run_stream_init(read_half, write_half, core, &uri.path, query).await
        }
    }
}

fn transition(from: SessionState, to: SessionState) -> SessionState {
    tracing::debug!(?from, ?to, "session state transition");
    to
}

async fn run_control(
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    core: Arc<Core>,
    id: NodeId,
    provider_name: &str,
) -> Result<()> {
    let provider = match core.find_provider(provider_name) {
        Some(p) => p,
        None => {
            wire::write_status(&mut write_half, 404).await?;
            return Err(RivError::ResourceNotFound(format!(
                "no such provider: {provider_name}"
            )));
        }
    };

    wire::write_status(&mut write_half, 200).await?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    provider.attach_session(id, Arc::new(SessionSink { out_tx }))?;

    let mut unknown_count = 0u32;
    let result: Result<()> = loop {
        tokio::select! {
            incoming = wire::read_message(&mut read_half) => {
                let msg = match incoming {
                    Ok(msg) => msg,
                    Err(err) if err.is_benign_close() => break Ok(()),
                    Err(err) => break Err(err),
                };
                if msg.is_control() {
                    if msg.id == wire::MSG_QUERY_DATA_CHANNELS {
                        let channels = provider.query_data_channels();
                        let body = wire::encode_data_channels(&channels);
                        if let Err(err) = wire::write_message(
                            &mut write_half,
                            &Message::new(wire::MSG_DATA_CHANNELS, body),
                        ).await {
                            break Err(err);
                        }
                    } else {
                        unknown_count += 1;
                        tracing::warn!(id = msg.id, count = unknown_count, "unknown reserved message id");
                        if unknown_count >= UNKNOWN_MESSAGE_ID_LIMIT {
                            break Err(RivError::ProtocolViolation(format!(
                                "unknown reserved message id {} repeated past the tolerance threshold",
                                msg.id
                            )));
                        }
                    }
                } else {
                    provider.deliver_user_message(msg.id, &msg.body);
                }
            }
            Some(out_msg) = out_rx.recv() => {
                if let Err(err) = wire::write_message(&mut write_half, &out_msg).await {
                    break Err(err);
                }
            }
        }
    };

    // Disconnecting from the provider here (rather than waiting for the
    // caller's final `disconnect_all_recursive`) ensures a dropped
    // broadcast sink never outlives the provider's view of who is
    // listening, even if later session cleanup is delayed.
    let _ = core.graph().disconnect(provider.id(), id);
    result
}

async fn run_stream_init(
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    core: Arc<Core>,
    provider_name: &str,
    query: uri::DataChannelQuery,
) -> Result<()> {
    let provider = core
        .find_provider(provider_name)
        .ok_or_else(|| RivError::ResourceNotFound(format!("no such provider: {provider_name}")))?;

    let resolved = provider.resolve_binding_by_identity_hex(
        &query.binding_id,
        query.channel_type,
        query.subtype,
    );
    let (_name, binding) = match resolved {
        Ok(pair) => pair,
        Err(err) => {
            if let Some(status) = err.status_code() {
                wire::write_status(&mut write_half, status).await?;
            }
            return Err(err);
        }
    };

    let encoder = match codec::for_subtype(query.subtype) {
        Ok(enc) => enc,
        Err(err) => {
            wire::write_status(&mut write_half, err.status_code().unwrap_or(500)).await?;
            return Err(err);
        }
    };

    wire::write_status(&mut write_half, 200).await?;
    let stream_encoder = StreamEncoder::start(binding, encoder);
    transition(SessionState::StreamInit, SessionState::Stream);

    let result = run_stream(&mut read_half, &mut write_half, stream_encoder.clone()).await;
    stream_encoder.shutdown().await;
    result
}

async fn run_stream(
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    stream_encoder: Arc<StreamEncoder>,
) -> Result<()> {
    let (deliver_tx, mut deliver_rx) = mpsc::unbounded_channel::<(Arc<Buffer>, u32)>();
    let echo_time_code = AtomicU32::new(0);

    loop {
        tokio::select! {
            op = wire::read_image_stream_request(read_half) => {
                let op = match op {
                    Ok(op) => op,
                    Err(err) if err.is_benign_close() => return Ok(()),
                    Err(err) => return Err(err),
                };
                match op {
                    ImageStreamOp::Close => return Ok(()),
                    ImageStreamOp::Restart(arg) => {
                        if arg == wire::TEST_DWORD_SWAPPED {
                            tracing::error!("image stream restart rejected: byte order mismatch");
                            return Err(RivError::ProtocolViolation(
                                "byte order mismatch in restart request".into(),
                            ));
                        }
                        if arg != wire::TEST_DWORD {
                            tracing::error!(arg, "image stream restart rejected: invalid time-code");
                            return Err(RivError::ProtocolViolation(
                                "invalid time-code in restart request".into(),
                            ));
                        }
                        echo_time_code.store(0, Ordering::SeqCst);
                    }
                    ImageStreamOp::NextFrame(time_code) => {
                        let tx = deliver_tx.clone();
                        stream_encoder.push_request(
                            time_code,
                            Arc::new(move |buf, tc| {
                                let _ = tx.send((buf, tc));
                            }),
                        );
                    }
                }
            }
            Some((buf, time_code)) = deliver_rx.recv() => {
                let body = wire::encode_image_data_blob(
                    buf.subtype as u32,
                    time_code,
                    &buf.metadata,
                    &buf.payload,
                );
                wire::write_message(write_half, &Message::new(wire::MSG_IMAGE_DATA_BLOB, body)).await?;
            }
        }
    }
}
