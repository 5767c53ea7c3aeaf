//! An embeddable runtime that turns an in-process RGB framebuffer
//! producer into a remotely consumable `riv://` service.
//!
//! # Layout
//!
//! The crate is organised the way the original rivlib split its header
//! set, one module per concern rather than one per class:
//!
//! - [`graph`]: the undirected object graph every long-lived value
//!   registers into (core, providers, bindings, sessions, encoders).
//! - [`core`]: the graph root and provider registry.
//! - [`provider`]: named producers; owns a provider's data bindings and
//!   attached sessions.
//! - [`binding`]: the `DataBinding` trait and the raw in-memory
//!   implementation a producer writes frames into.
//! - [`encoder`]: the three-task pipeline (collect, encode, dispatch)
//!   that turns binding snapshots into delivered, subtype-encoded
//!   buffers.
//! - [`wire`]: the handshake and framed-message codec.
//! - [`uri`]: `riv://` URI parsing and construction.
//! - [`session`]: the per-connection state machine tying the above
//!   together.
//! - [`server`]: the TCP listener.
//! - [`public_uri`]: public-URI enumeration for a provider.
//! - [`config`]: the typed configuration embedders and the demo binary
//!   both construct.
//! - [`error`]: the `RivError` taxonomy and its wire status mapping.
//! - [`slot`]: a single-cell, `Notify`-backed mailbox used throughout
//!   the encoder pipeline.

pub mod binding;
pub mod config;
pub mod core;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod provider;
pub mod public_uri;
pub mod server;
pub mod session;
pub mod slot;
pub mod uri;
pub mod wire;

pub use core::Core;
pub use error::{Result, RivError};
pub use provider::Provider;
