//! The service root: owns the object graph and the provider registry.
//!
//! `Core` is the unique graph root; every provider registers under it by
//! name and becomes reachable for incoming sessions. One type rather
//! than a database-plus-handle split, since the graph itself already is
//! the shared, lockable backing store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::graph::{Graph, NoopHooks, NodeId};
use crate::provider::Provider;

pub struct Core {
    graph: Graph,
    id: NodeId,
    providers: Mutex<HashMap<String, Arc<Provider>>>,
    config: ServerConfig,
}

impl Core {
    pub fn new(config: ServerConfig) -> Arc<Core> {
        let graph = Graph::new();
        let id = graph.register(Arc::new(NoopHooks), &[]);
        graph.set_core(id);
        Arc::new(Core {
            graph,
            id,
            providers: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Attaches a provider to the core and makes it discoverable by
    /// name for incoming sessions.
    pub fn register_provider(&self, provider: Arc<Provider>) -> Result<()> {
        self.graph.connect(self.id, provider.id())?;
        self.providers
            .lock()
            .unwrap()
            .insert(provider.name().to_string(), provider);
        Ok(())
    }

    pub fn find_provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers.lock().unwrap().get(name).cloned()
    }

    /// Detaches and forgets a provider, tearing down its whole subtree
    /// (bindings, attached sessions' graph edges) in the process.
    pub fn remove_provider(&self, name: &str) {
        if let Some(provider) = self.providers.lock().unwrap().remove(name) {
            self.graph.disconnect_all_recursive(provider.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_provider_is_findable_by_name() {
        let core = Core::new(ServerConfig::default());
        let provider = Arc::new(Provider::new(core.graph().clone(), "cam"));
        core.register_provider(provider).unwrap();
        assert!(core.find_provider("cam").is_some());
        assert!(core.find_provider("missing").is_none());
    }

    #[test]
    fn removed_provider_is_no_longer_findable() {
        let core = Core::new(ServerConfig::default());
        let provider = Arc::new(Provider::new(core.graph().clone(), "cam"));
        core.register_provider(provider).unwrap();
        core.remove_provider("cam");
        assert!(core.find_provider("cam").is_none());
    }
}
