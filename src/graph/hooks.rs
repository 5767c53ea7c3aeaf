//! The event hooks every graph node implements.

use super::NodeId;

/// Connect/disconnect/core-discovery lifecycle hooks for a graph node.
///
/// All methods take the node's own id as `self_id`, since the same
/// `Hooks` impl may back more than one registration in tests; production
/// nodes close over a single id and ignore the parameter.
pub trait Hooks: Send + Sync {
    /// Called before a connection to `peer` is established. Return
    /// `false` to veto it.
    fn on_connecting(&self, self_id: NodeId, peer: NodeId) -> bool {
        let _ = (self_id, peer);
        true
    }

    /// Called after a connection to `peer` has been established.
    fn on_connected(&self, self_id: NodeId, peer: NodeId) {
        let _ = (self_id, peer);
    }

    /// Called before a connection to `peer` is broken. Return `false` to
    /// veto it (ignored by recursive teardown paths).
    fn on_disconnecting(&self, self_id: NodeId, peer: NodeId) -> bool {
        let _ = (self_id, peer);
        true
    }

    /// Called after a connection to `peer` has been broken.
    fn on_disconnected(&self, self_id: NodeId, peer: NodeId) {
        let _ = (self_id, peer);
    }

    /// Called when this node gains a path to the graph's core.
    fn on_core_discovered(&self, self_id: NodeId) {
        let _ = self_id;
    }

    /// Called when this node loses its path to the graph's core.
    fn on_core_lost(&self, self_id: NodeId) {
        let _ = self_id;
    }
}

/// A `Hooks` impl that does nothing; useful for nodes with no teardown
/// behaviour of their own (e.g. plain data bindings).
pub struct NoopHooks;

impl Hooks for NoopHooks {}
