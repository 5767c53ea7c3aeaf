//! The object graph: an undirected graph of core, providers, communicators,
//! brokers, data bindings, sessions, and encoders.
//!
//! Every long-lived object in this crate is a node in one `Graph`. Edges
//! are symmetric and created atomically under the graph's lock; a node
//! may veto a (dis)connection via its hooks. This is the hardest part of
//! the crate to get right, so it gets its own module and its own tests
//! rather than being folded into whichever type happens to use it first.
//!
//! Modeled as a stable-id arena rather than as `Rc`/`Arc` cycles: Rust has
//! no safe cyclic ownership, and the graph here is genuinely cyclic
//! (session <-> encoder <-> binding <-> provider <-> session). Each node
//! registers the capabilities it satisfies at construction, so `select`
//! can filter neighbours without runtime type identification.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

mod hooks;
pub use hooks::{Hooks, NoopHooks};

/// A stable identifier for a node in the graph. Ids are never reused
/// within the lifetime of a `Graph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// A capability a node can declare at registration; `select::<T>()`-style
/// queries become `neighbours_with(capability)` lookups against this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Provider,
    DataBinding,
    Session,
    Encoder,
    Communicator,
    Broker,
}

struct NodeEntry {
    hooks: Arc<dyn Hooks>,
    capabilities: HashSet<Capability>,
}

struct Inner {
    nodes: HashMap<NodeId, NodeEntry>,
    edges: HashMap<NodeId, HashSet<NodeId>>,
    core: Option<NodeId>,
    /// Nodes that currently have a path to `core`, used to fire
    /// `on_core_discovered`/`on_core_lost` only on actual transitions.
    reachable: HashSet<NodeId>,
    next_id: u64,
}

/// The shared object graph. Cheaply cloneable; clones share the same
/// underlying lock and storage.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph {
            inner: Arc::new(Mutex::new(Inner {
                nodes: HashMap::new(),
                edges: HashMap::new(),
                core: None,
                reachable: HashSet::new(),
                next_id: 0,
            })),
        }
    }
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Registers a new node with the given capabilities and returns its
    /// id. The node starts with no edges.
    pub fn register(&self, hooks: Arc<dyn Hooks>, capabilities: &[Capability]) -> NodeId {
        let mut inner = self.inner.lock().unwrap();
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        inner.nodes.insert(
            id,
            NodeEntry {
                hooks,
                capabilities: capabilities.iter().copied().collect(),
            },
        );
        inner.edges.entry(id).or_default();
        id
    }

    /// Designates `id` as the unique graph root. Must be called at most
    /// once per graph.
    pub fn set_core(&self, id: NodeId) {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.core.is_none(), "core already set");
        inner.core = Some(id);
        inner.reachable.insert(id);
        drop(inner);
        self.fire_discovered(&[id]);
    }

    /// Removes a node's bookkeeping entirely. Callers must have already
    /// disconnected the node from all of its neighbours.
    pub fn remove(&self, id: NodeId) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.remove(&id);
        inner.edges.remove(&id);
        inner.reachable.remove(&id);
    }

    /// Connects `a` and `b`. Fails with `AbortedByHook` if either side's
    /// `on_connecting` hook vetoes, and is a no-op returning `Ok(())` if
    /// the pair is already connected.
    pub fn connect(&self, a: NodeId, b: NodeId) -> Result<(), super::error::RivError> {
        use super::error::RivError;

        let (hooks_a, hooks_b) = {
            let inner = self.inner.lock().unwrap();
            if inner.edges.get(&a).map(|s| s.contains(&b)).unwrap_or(false) {
                return Ok(());
            }
            let hooks_a = inner
                .nodes
                .get(&a)
                .map(|n| n.hooks.clone())
                .ok_or(RivError::NullArgument)?;
            let hooks_b = inner
                .nodes
                .get(&b)
                .map(|n| n.hooks.clone())
                .ok_or(RivError::NullArgument)?;
            (hooks_a, hooks_b)
        };

        // Hooks run without holding the graph lock: they are arbitrary
        // application code and must not be able to deadlock the graph.
        if !hooks_a.on_connecting(a, b) || !hooks_b.on_connecting(b, a) {
            return Err(RivError::AbortedByHook);
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.edges.entry(a).or_default().insert(b);
            inner.edges.entry(b).or_default().insert(a);
        }

        hooks_a.on_connected(a, b);
        hooks_b.on_connected(b, a);

        self.recompute_core_reachability();
        Ok(())
    }

    /// Disconnects `a` and `b`. A no-op if they were not connected.
    pub fn disconnect(&self, a: NodeId, b: NodeId) -> Result<(), super::error::RivError> {
        use super::error::RivError;

        let (hooks_a, hooks_b) = {
            let inner = self.inner.lock().unwrap();
            if !inner.edges.get(&a).map(|s| s.contains(&b)).unwrap_or(false) {
                return Ok(());
            }
            let hooks_a = inner
                .nodes
                .get(&a)
                .map(|n| n.hooks.clone())
                .ok_or(RivError::NullArgument)?;
            let hooks_b = inner
                .nodes
                .get(&b)
                .map(|n| n.hooks.clone())
                .ok_or(RivError::NullArgument)?;
            (hooks_a, hooks_b)
        };

        if !hooks_a.on_disconnecting(a, b) || !hooks_b.on_disconnecting(b, a) {
            return Err(RivError::AbortedByHook);
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(set) = inner.edges.get_mut(&a) {
                set.remove(&b);
            }
            if let Some(set) = inner.edges.get_mut(&b) {
                set.remove(&a);
            }
        }

        hooks_a.on_disconnected(a, b);
        hooks_b.on_disconnected(b, a);

        self.recompute_core_reachability();
        Ok(())
    }

    /// Disconnects `id` from every current neighbour, then recurses into
    /// those (now former) neighbours' own former-neighbour sets. Hook
    /// vetoes are ignored here: a recursive teardown always completes.
    pub fn disconnect_all_recursive(&self, id: NodeId) {
        let mut frontier = vec![id];
        let mut visited = HashSet::new();
        while let Some(current) = frontier.pop() {
            if !visited.insert(current) {
                continue;
            }
            let neighbours: Vec<NodeId> = {
                let inner = self.inner.lock().unwrap();
                inner
                    .edges
                    .get(&current)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default()
            };
            for n in &neighbours {
                let _ = self.force_disconnect(current, *n);
                frontier.push(*n);
            }
        }
    }

    /// Disconnects `a` and `b` unconditionally, ignoring hook vetoes.
    /// Used by teardown paths that must not be blocked by application
    /// code refusing to let go.
    fn force_disconnect(&self, a: NodeId, b: NodeId) -> bool {
        let (hooks_a, hooks_b) = {
            let mut inner = self.inner.lock().unwrap();
            let was_connected = inner.edges.get(&a).map(|s| s.contains(&b)).unwrap_or(false);
            if !was_connected {
                return false;
            }
            if let Some(set) = inner.edges.get_mut(&a) {
                set.remove(&b);
            }
            if let Some(set) = inner.edges.get_mut(&b) {
                set.remove(&a);
            }
            let hooks_a = inner.nodes.get(&a).map(|n| n.hooks.clone());
            let hooks_b = inner.nodes.get(&b).map(|n| n.hooks.clone());
            (hooks_a, hooks_b)
        };
        if let Some(h) = hooks_a {
            h.on_disconnected(a, b);
        }
        if let Some(h) = hooks_b {
            h.on_disconnected(b, a);
        }
        self.recompute_core_reachability();
        true
    }

    /// True iff `a` and `b` are currently connected. Symmetric by
    /// construction: the underlying edge set is maintained in both
    /// directions on every connect/disconnect.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.edges.get(&a).map(|s| s.contains(&b)).unwrap_or(false)
    }

    /// Returns the neighbours of `id` that declared `capability`.
    pub fn neighbours_with(&self, id: NodeId, capability: Capability) -> Vec<NodeId> {
        let inner = self.inner.lock().unwrap();
        let Some(neigh) = inner.edges.get(&id) else {
            return Vec::new();
        };
        neigh
            .iter()
            .filter(|n| {
                inner
                    .nodes
                    .get(n)
                    .map(|e| e.capabilities.contains(&capability))
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// True iff `id` currently has a path to the registered core.
    pub fn reaches_core(&self, id: NodeId) -> bool {
        self.inner.lock().unwrap().reachable.contains(&id)
    }

    fn recompute_core_reachability(&self) {
        let (newly_reachable, newly_unreachable) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(core) = inner.core else {
                return;
            };

            let mut visited = HashSet::new();
            let mut stack = vec![core];
            while let Some(n) = stack.pop() {
                if !visited.insert(n) {
                    continue;
                }
                if let Some(neigh) = inner.edges.get(&n) {
                    for m in neigh {
                        stack.push(*m);
                    }
                }
            }

            let newly_reachable: Vec<NodeId> =
                visited.difference(&inner.reachable).copied().collect();
            let newly_unreachable: Vec<NodeId> =
                inner.reachable.difference(&visited).copied().collect();
            inner.reachable = visited;
            (newly_reachable, newly_unreachable)
        };

        self.fire_discovered(&newly_reachable);
        self.fire_lost(&newly_unreachable);
    }

    fn fire_discovered(&self, ids: &[NodeId]) {
        for id in ids {
            let hooks = {
                let inner = self.inner.lock().unwrap();
                inner.nodes.get(id).map(|n| n.hooks.clone())
            };
            if let Some(h) = hooks {
                h.on_core_discovered(*id);
            }
        }
    }

    fn fire_lost(&self, ids: &[NodeId]) {
        for id in ids {
            let hooks = {
                let inner = self.inner.lock().unwrap();
                inner.nodes.get(id).map(|n| n.hooks.clone())
            };
            if let Some(h) = hooks {
                h.on_core_lost(*id);
            }
        }
    }
}
