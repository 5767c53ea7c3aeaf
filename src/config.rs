//! Server configuration shared by the listener and its providers.

/// The TCP port the ip-communicator binds by default.
pub const DEFAULT_PORT: u16 = 52000;

/// Configuration for one embedded server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port for the ip-communicator. Ignored if
    /// `enable_ip_communicator` is false.
    pub port: u16,
    /// Whether to start the TCP listener at all.
    pub enable_ip_communicator: bool,
    /// The name under which the demo provider registers itself.
    pub provider_name: String,
    /// Upper bound on concurrently accepted sessions.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            enable_ip_communicator: true,
            provider_name: "default".to_string(),
            max_connections: 250,
        }
    }
}
