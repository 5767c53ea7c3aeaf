//! Providers: named logical services grouping data bindings and a
//! control surface.
//!
//! A provider owns a name, a set of named data bindings, and the
//! sessions currently attached to its control channel, all behind a
//! `Mutex`-guarded registry shared via a cheap `Arc` handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::binding::DataBinding;
use crate::error::{Result, RivError};
use crate::graph::{Capability, Graph, Hooks, NoopHooks, NodeId};
use crate::wire::{DataChannelRecord, Message};

/// The one channel type this build implements: an image stream.
pub const CHANNEL_TYPE_IMAGE: u16 = 1;
pub const SUBTYPE_RGB_RAW: u16 = 1;
pub const SUBTYPE_RGB_ZIP: u16 = 2;

/// Where a provider sends a broadcast or reply message. Implemented by
/// each connected control/session handle so the provider never needs to
/// know the session's internals.
pub trait MessageSink: Send + Sync {
    fn send_message(&self, msg: Message);
}

struct BindingEntry {
    node_id: NodeId,
    binding: Arc<dyn DataBinding>,
}

struct Inner {
    name: String,
    bindings: Mutex<HashMap<String, BindingEntry>>,
    sessions: Mutex<HashMap<NodeId, Arc<dyn MessageSink>>>,
    on_user_message: Mutex<Option<Arc<dyn Fn(u32, &[u8]) + Send + Sync>>>,
}

struct ProviderHooks(Arc<Inner>);

impl Hooks for ProviderHooks {
    fn on_disconnected(&self, _self_id: NodeId, peer: NodeId) {
        self.0.sessions.lock().unwrap().remove(&peer);
    }
}

/// A named provider: one or more data bindings plus a control channel
/// that relays application messages to and from connected sessions.
pub struct Provider {
    id: NodeId,
    graph: Graph,
    inner: Arc<Inner>,
}

impl Provider {
    /// Registers a new provider node in `graph` and returns a handle to
    /// it. Does not connect it to the core; callers do that once the
    /// provider is fully configured.
    pub fn new(graph: Graph, name: impl Into<String>) -> Provider {
        let inner = Arc::new(Inner {
            name: name.into(),
            bindings: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            on_user_message: Mutex::new(None),
        });
        let id = graph.register(Arc::new(ProviderHooks(inner.clone())), &[Capability::Provider]);
        Provider { id, graph, inner }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers `cb` to receive every application message (id >= 1000)
    /// delivered to this provider by any connected session.
    pub fn set_user_message_callback<F>(&self, cb: F)
    where
        F: Fn(u32, &[u8]) + Send + Sync + 'static,
    {
        *self.inner.on_user_message.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Dispatches an inbound application message to the registered
    /// callback, if any. A callback that panics never escapes here: a
    /// misbehaving application must not take the session down with it.
    pub fn deliver_user_message(&self, id: u32, body: &[u8]) {
        let cb = self.inner.on_user_message.lock().unwrap().clone();
        if let Some(cb) = cb {
            let body = body.to_vec();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(id, &body);
            }));
            if result.is_err() {
                tracing::error!(message_id = id, "user message callback panicked");
            }
        }
    }

    /// Attaches a session to this provider's neighbour set and registers
    /// its outgoing-message sink, so `broadcast_message` can reach it.
    pub fn attach_session(&self, session_id: NodeId, sink: Arc<dyn MessageSink>) -> Result<()> {
        self.graph.connect(self.id, session_id)?;
        self.inner.sessions.lock().unwrap().insert(session_id, sink);
        Ok(())
    }

    /// Sends `bytes` under `id` to every currently attached session.
    /// Per-session delivery is serial; there is no cross-session atomicity.
    pub fn broadcast_message(&self, id: u32, bytes: &[u8]) {
        let sinks: Vec<Arc<dyn MessageSink>> =
            self.inner.sessions.lock().unwrap().values().cloned().collect();
        for sink in sinks {
            sink.send_message(Message::new(id, bytes.to_vec()));
        }
    }

    /// Registers a named data binding, connecting it to this provider in
    /// the graph and assigning it a wire-visible identity.
    pub fn attach_binding(&self, name: impl Into<String>, binding: Arc<dyn DataBinding>) -> NodeId {
        let name = name.into();
        let node_id = self
            .graph
            .register(Arc::new(NoopHooks), &[Capability::DataBinding]);
        let _ = self.graph.connect(self.id, node_id);
        self.inner
            .bindings
            .lock()
            .unwrap()
            .insert(name, BindingEntry { node_id, binding });
        node_id
    }

    /// Detaches a named binding: aborts any in-flight asynchronous read
    /// first, then removes it from the graph.
    pub fn detach_binding(&self, name: &str) {
        let entry = self.inner.bindings.lock().unwrap().remove(name);
        if let Some(entry) = entry {
            entry.binding.abort();
            let _ = self.graph.disconnect(self.id, entry.node_id);
            self.graph.remove(entry.node_id);
        }
    }

    /// The `data_channels` reply body for this provider: two records
    /// (`rgb_raw`, `rgb_zip`) per attached binding.
    pub fn query_data_channels(&self) -> Vec<DataChannelRecord> {
        let bindings = self.inner.bindings.lock().unwrap();
        let mut out = Vec::with_capacity(bindings.len() * 2);
        for (name, _entry) in bindings.iter() {
            out.push(DataChannelRecord {
                name: name.clone(),
                channel_type: CHANNEL_TYPE_IMAGE,
                subtype: SUBTYPE_RGB_RAW,
                quality: 100,
            });
            out.push(DataChannelRecord {
                name: name.clone(),
                channel_type: CHANNEL_TYPE_IMAGE,
                subtype: SUBTYPE_RGB_ZIP,
                quality: 80,
            });
        }
        out
    }

    /// Resolves a data-channel request's `t=`/`s=` pair against a named
    /// binding.
    pub fn resolve_binding(
        &self,
        binding_name: &str,
        channel_type: u16,
        subtype: u16,
    ) -> Result<Arc<dyn DataBinding>> {
        if channel_type != CHANNEL_TYPE_IMAGE {
            return Err(RivError::UnsupportedMedia(format!(
                "unsupported channel type {channel_type}"
            )));
        }
        if subtype != SUBTYPE_RGB_RAW && subtype != SUBTYPE_RGB_ZIP {
            return Err(RivError::UnsupportedMedia(format!(
                "unsupported channel subtype {subtype}"
            )));
        }
        let bindings = self.inner.bindings.lock().unwrap();
        bindings
            .get(binding_name)
            .map(|e| e.binding.clone())
            .ok_or_else(|| RivError::ResourceNotFound(format!("no such data binding: {binding_name}")))
    }

    /// Resolves a data-channel request's `n=` parameter, which carries
    /// the binding's name hex-encoded byte for byte (the "native-width
    /// hex representation of the binding identity" the wire format
    /// calls for, reimagined without exposing an actual pointer), plus
    /// its `t=`/`s=` pair.
    pub fn resolve_binding_by_identity_hex(
        &self,
        identity_hex: &str,
        channel_type: u16,
        subtype: u16,
    ) -> Result<(String, Arc<dyn DataBinding>)> {
        let name = decode_hex_name(identity_hex)?;
        let binding = self.resolve_binding(&name, channel_type, subtype)?;
        Ok((name, binding))
    }

    /// The wire identity (hex-encoded name) for a named binding, if
    /// attached. This is what a control-channel reply would need to
    /// hand a client as its `n=` value for a subsequent data-channel
    /// request, were that round trip part of this build's demo client.
    pub fn binding_identity_hex(&self, binding_name: &str) -> Option<String> {
        self.inner
            .bindings
            .lock()
            .unwrap()
            .get(binding_name)
            .map(|_| encode_hex_name(binding_name))
    }
}

fn encode_hex_name(name: &str) -> String {
    name.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex_name(hex: &str) -> Result<String> {
    if hex.len() % 2 != 0 {
        return Err(RivError::BadRequest("odd-length n= hex string".into()));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let chars: Vec<char> = hex.chars().collect();
    for pair in chars.chunks(2) {
        let byte_str: String = pair.iter().collect();
        let byte = u8::from_str_radix(&byte_str, 16)
            .map_err(|_| RivError::BadRequest("invalid n= hex string".into()))?;
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|_| RivError::BadRequest("n= does not decode to utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{ColorType, ElementType, RawImageBinding, RowOrientation};
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink(Arc<Mutex<Vec<Message>>>);
    impl MessageSink for RecordingSink {
        fn send_message(&self, msg: Message) {
            self.0.lock().unwrap().push(msg);
        }
    }

    #[test]
    fn query_data_channels_lists_both_subtypes_per_binding() {
        let graph = Graph::new();
        let provider = Provider::new(graph, "cam");
        let binding = Arc::new(RawImageBinding::new(
            2,
            2,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        provider.attach_binding("frame", binding);

        let channels = provider.query_data_channels();
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().any(|c| c.subtype == SUBTYPE_RGB_RAW));
        assert!(channels.iter().any(|c| c.subtype == SUBTYPE_RGB_ZIP));
    }

    #[test]
    fn identity_hex_round_trips_through_resolve_by_identity() {
        let graph = Graph::new();
        let provider = Provider::new(graph, "cam");
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        provider.attach_binding("frame", binding);

        let hex = provider.binding_identity_hex("frame").unwrap();
        let (name, _binding) = provider
            .resolve_binding_by_identity_hex(&hex, CHANNEL_TYPE_IMAGE, SUBTYPE_RGB_RAW)
            .unwrap();
        assert_eq!(name, "frame");
    }

    #[test]
    fn resolve_binding_rejects_unknown_subtype() {
        let graph = Graph::new();
        let provider = Provider::new(graph, "cam");
        let binding = Arc::new(RawImageBinding::new(
            1,
            1,
            ColorType::Rgb,
            ElementType::Byte,
            RowOrientation::TopDown,
            0,
        ));
        provider.attach_binding("frame", binding);

        let err = provider.resolve_binding("frame", CHANNEL_TYPE_IMAGE, 9999).unwrap_err();
        assert!(matches!(err, RivError::UnsupportedMedia(_)));
    }

    #[test]
    fn resolve_binding_rejects_unknown_name() {
        let graph = Graph::new();
        let provider = Provider::new(graph, "cam");
        let err = provider
            .resolve_binding("nope", CHANNEL_TYPE_IMAGE, SUBTYPE_RGB_RAW)
            .unwrap_err();
        assert!(matches!(err, RivError::ResourceNotFound(_)));
    }

    #[test]
    fn broadcast_reaches_every_attached_session() {
        let graph = Graph::new();
        let provider = Provider::new(graph.clone(), "cam");
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));
        let sink_a: Arc<dyn MessageSink> = Arc::new(RecordingSink(received_a.clone()));
        let sink_b: Arc<dyn MessageSink> = Arc::new(RecordingSink(received_b.clone()));

        let session_a = graph.register(Arc::new(NoopHooks), &[Capability::Session]);
        let session_b = graph.register(Arc::new(NoopHooks), &[Capability::Session]);
        provider.attach_session(session_a, sink_a).unwrap();
        provider.attach_session(session_b, sink_b).unwrap();

        provider.broadcast_message(1234, b"hello");

        assert_eq!(received_a.lock().unwrap().len(), 1);
        assert_eq!(received_b.lock().unwrap().len(), 1);
        assert_eq!(received_a.lock().unwrap()[0].id, 1234);
    }

    #[test]
    fn user_message_callback_panic_does_not_escape() {
        let graph = Graph::new();
        let provider = Provider::new(graph, "cam");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        provider.set_user_message_callback(move |_id, _body| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        });
        provider.deliver_user_message(5000, b"payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnecting_a_session_removes_it_from_broadcast() {
        let graph = Graph::new();
        let provider = Provider::new(graph.clone(), "cam");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink(received.clone()));
        let session = graph.register(Arc::new(NoopHooks), &[Capability::Session]);
        provider.attach_session(session, sink).unwrap();
        graph.disconnect(provider.id(), session).unwrap();

        provider.broadcast_message(1234, b"hello");
        assert!(received.lock().unwrap().is_empty());
    }
}
