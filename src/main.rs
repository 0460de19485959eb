//! vbmc: a virtual BMC serving IPMI v1.5 power control over RMCP/UDP.
//!
//! Usage:
//!   vbmc --listen 0.0.0.0:623 --target node-a --target node-b
//!
//! Each target gets its own UDP endpoint, starting at the listen port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vbmc::server::{BmcServer, ServerConfig};
use vbmc::target::InstanceRegistry;

#[derive(Debug, Parser)]
#[command(name = "vbmc", about = "Virtual BMC: IPMI power control for managed instances")]
struct Args {
    /// Address of the first IPMI endpoint; each additional target gets
    /// the next port.
    #[arg(long, default_value = "0.0.0.0:623")]
    listen: SocketAddr,

    /// Managed target name (repeatable).
    #[arg(long = "target", required = true)]
    targets: Vec<String>,

    /// Backend call timeout in seconds.
    #[arg(long, default_value_t = 5)]
    backend_timeout: u64,
}

#[tokio::main]
async fn main() -> vbmc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let registry = Arc::new(InstanceRegistry::new());
    for name in &args.targets {
        registry.add(name);
    }

    let server = BmcServer::new(
        registry,
        ServerConfig {
            listen: args.listen,
            targets: args.targets,
            backend_timeout: Duration::from_secs(args.backend_timeout),
        },
    );
    server.run().await
}
