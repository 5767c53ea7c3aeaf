//! Demo entry point for the `riv-core` ip-communicator.
//!
//! Mirrors how the original rivlib shipped alongside a GLUT demo
//! (`rivprovtest`): a thin binary that wires up one provider with one
//! synthetic raw-image binding and starts the listener, giving the
//! session runtime a real producer to serve. Argument parsing lives
//! here; the library itself only ever consumes a typed `ServerConfig`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use riv_core::binding::{ColorType, ElementType, RawImageBinding, RowOrientation};
use riv_core::config::ServerConfig;
use riv_core::{server, Core, Provider};

/// riv-core demo ip-communicator.
#[derive(Parser, Debug)]
#[command(name = "riv-server", version, about = "A riv:// demo provider")]
struct Cli {
    /// Disables the TCP ip-communicator entirely.
    #[arg(long = "noipcomm")]
    no_ip_comm: bool,

    /// Listen port for the ip-communicator.
    #[arg(long = "ipcommport", default_value_t = riv_core::config::DEFAULT_PORT)]
    ip_comm_port: u16,

    /// Name the demo provider registers under.
    #[arg(short = 'n', long = "name", default_value = "default")]
    name: String,
}

#[tokio::main]
async fn main() -> riv_core::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ServerConfig {
        port: cli.ip_comm_port,
        enable_ip_communicator: !cli.no_ip_comm,
        provider_name: cli.name.clone(),
        max_connections: ServerConfig::default().max_connections,
    };

    let core = Core::new(config.clone());

    let provider = Arc::new(Provider::new(core.graph().clone(), config.provider_name.clone()));
    let binding = Arc::new(RawImageBinding::new(
        320,
        240,
        ColorType::Rgb,
        ElementType::Byte,
        RowOrientation::TopDown,
        0,
    ));
    provider.attach_binding("frame", binding.clone());
    core.register_provider(provider)?;

    tokio::spawn(drive_synthetic_producer(binding));

    if !config.enable_ip_communicator {
        tracing::info!("ip-communicator disabled; exiting");
        return Ok(());
    }

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "failed to listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    };

    server::run(core, shutdown).await
}

/// Writes a new solid-colour frame into `binding` once per second,
/// standing in for whatever in-process renderer an embedder would have
/// wired here instead.
async fn drive_synthetic_producer(binding: Arc<RawImageBinding>) {
    let mut tick: u8 = 0;
    loop {
        let frame = vec![tick; 320 * 240 * 3];
        binding.write_frame(&frame);
        tick = tick.wrapping_add(1);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
