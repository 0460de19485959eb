//! UDP server: one socket per managed target, one task per datagram.
//!
//! IPMI chassis commands carry no target selector, so each registered
//! target gets its own endpoint; target `k` in registration order
//! listens on the configured port plus `k` (each endpoint binds an
//! ephemeral port when the configured port is zero).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::commands::{AppHandler, ChassisHandler};
use crate::error::{Error, Result};
use crate::protocol::{self, netfn};
use crate::router::Router;
use crate::target::ManagedTargets;

/// Maximum UDP payload we accept.
///
/// IPMI packets are small; 4 KiB is a conservative upper bound.
const MAX_PACKET_SIZE: usize = 4096;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the first endpoint; target `k` listens on `port + k`.
    pub listen: SocketAddr,
    /// Managed target names, one UDP endpoint each.
    pub targets: Vec<String>,
    /// Upper bound for a single backend call.
    pub backend_timeout: Duration,
}

/// An IPMI-over-RMCP server fronting a set of managed targets.
pub struct BmcServer {
    targets: Arc<dyn ManagedTargets>,
    config: ServerConfig,
}

struct Endpoint {
    name: String,
    socket: UdpSocket,
    router: Router,
}

/// A server whose endpoints are bound but not yet serving.
pub struct BoundServer {
    endpoints: Vec<Endpoint>,
}

impl BmcServer {
    /// Create a server driving `targets` per `config`.
    pub fn new(targets: Arc<dyn ManagedTargets>, config: ServerConfig) -> Self {
        Self { targets, config }
    }

    /// Bind one UDP endpoint per configured target.
    pub async fn bind(self) -> Result<BoundServer> {
        if self.config.targets.is_empty() {
            return Err(Error::InvalidArgument("no targets to serve"));
        }

        let base = self.config.listen;
        let mut endpoints = Vec::with_capacity(self.config.targets.len());
        for (index, name) in self.config.targets.iter().enumerate() {
            let mut addr = base;
            if base.port() != 0 {
                let port = base
                    .port()
                    .checked_add(index as u16)
                    .ok_or(Error::InvalidArgument("listen port range overflows"))?;
                addr.set_port(port);
            }

            let socket = UdpSocket::bind(addr).await?;
            info!(instance = %name, addr = %socket.local_addr()?, "serving IPMI endpoint");

            let router = build_router(
                Arc::clone(&self.targets),
                name,
                self.config.backend_timeout,
            );
            endpoints.push(Endpoint {
                name: name.clone(),
                socket,
                router,
            });
        }

        Ok(BoundServer { endpoints })
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve().await
    }
}

impl BoundServer {
    /// Local address of each endpoint, in target registration order.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.endpoints
            .iter()
            .map(|endpoint| endpoint.socket.local_addr().map_err(Error::Io))
            .collect()
    }

    /// Serve all endpoints. Returns only on a socket error.
    pub async fn serve(self) -> Result<()> {
        let mut tasks = Vec::with_capacity(self.endpoints.len());
        for endpoint in self.endpoints {
            tasks.push(tokio::spawn(serve_endpoint(endpoint)));
        }
        for task in tasks {
            task.await
                .map_err(|_| Error::Protocol("endpoint task panicked"))??;
        }
        Ok(())
    }
}

/// Routing table for one endpoint: App session establishment plus
/// Chassis control bound to the endpoint's target.
pub(crate) fn build_router(
    targets: Arc<dyn ManagedTargets>,
    name: &str,
    backend_timeout: Duration,
) -> Router {
    let mut router = Router::new();
    router.register(netfn::APP, Box::new(AppHandler));
    router.register(
        netfn::CHASSIS,
        Box::new(ChassisHandler::new(targets, name.to_string(), backend_timeout)),
    );
    router
}

async fn serve_endpoint(endpoint: Endpoint) -> Result<()> {
    let socket = Arc::new(endpoint.socket);
    let router = Arc::new(endpoint.router);
    let name: Arc<str> = endpoint.name.into();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let datagram = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let router = Arc::clone(&router);
        let name = Arc::clone(&name);

        tokio::spawn(async move {
            debug!(instance = %name, %peer, len = datagram.len(), "received datagram");
            if let Some(response) = process_datagram(&router, &datagram, peer).await {
                if let Err(err) = socket.send_to(&response, peer).await {
                    warn!(instance = %name, %peer, %err, "failed to send response");
                }
            }
        });
    }
}

/// Decode, route, and encode one datagram. Returns `None` when the
/// frame is malformed or addressed to an unhandled network function.
pub(crate) async fn process_datagram(
    router: &Router,
    datagram: &[u8],
    peer: SocketAddr,
) -> Option<Vec<u8>> {
    let (consumed, _header, wrapper, message) = match protocol::decode_packet(datagram) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(%peer, %err, "dropping malformed datagram");
            return None;
        }
    };
    if consumed < datagram.len() {
        debug!(%peer, trailing = datagram.len() - consumed, "ignoring trailing bytes");
    }

    router.dispatch(&wrapper, &message).await
}
