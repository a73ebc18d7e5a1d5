use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::MessageType;
use crate::packet::DhcpPacket;
use crate::persist::LeaseFile;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

struct Listener {
    interface: Option<String>,
    socket: Arc<UdpSocket>,
}

impl Listener {
    fn name(&self) -> String {
        self.interface
            .clone()
            .unwrap_or_else(|| "all interfaces".to_string())
    }
}

pub struct DhcpServer {
    engine: Arc<Engine>,
    lease_file: LeaseFile,
    listeners: Vec<Listener>,
}

impl DhcpServer {
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = Arc::new(config);
        let engine = Arc::new(Engine::new(Arc::clone(&config), clock)?);

        let lease_file = LeaseFile::new(&config.leases_file);
        let restored = engine.restore(lease_file.load().await?).await;
        if restored > 0 {
            info!(
                "Restored {} leases from {}",
                restored,
                lease_file.path().display()
            );
        }

        let listeners = if config.interfaces.is_empty() {
            vec![Listener {
                interface: None,
                socket: Arc::new(Self::create_socket(None)?),
            }]
        } else {
            config
                .interfaces
                .iter()
                .map(|name| {
                    Ok(Listener {
                        interface: Some(name.clone()),
                        socket: Arc::new(Self::create_socket(Some(name))?),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, DHCP_SERVER_PORT
        );
        info!(
            "IP pool: {} - {} ({} addresses)",
            config.pool_start,
            config.pool_end,
            config.pool_size()
        );

        Ok(Self {
            engine,
            lease_file,
            listeners,
        })
    }

    fn create_socket(interface: Option<&str>) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        if let Some(name) = interface {
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
            {
                socket.bind_device(Some(name.as_bytes())).map_err(|error| {
                    Error::Socket(format!("Failed to bind to interface {}: {}", name, error))
                })?;
                info!("DHCP bound to interface {}", name);
            }
            #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
            {
                warn!(
                    "Binding to interface {} is not supported on this platform; listening on all interfaces",
                    name
                );
            }
        }

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Serves every listener and runs the expiry sweep until a task fails.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();

        for listener in &self.listeners {
            tasks.spawn(serve(
                Arc::clone(&self.engine),
                Arc::clone(&listener.socket),
                listener.name(),
            ));
        }

        let interval = Duration::from_secs(self.engine.config().reclaim_interval_seconds);
        tasks.spawn(reclaim_periodically(Arc::clone(&self.engine), interval));

        info!("DHCP server ready and listening");

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                error!("Server task stopped: {}", error);
                return Err(Error::Socket(format!("Server task stopped: {}", error)));
            }
        }

        Ok(())
    }

    pub async fn save_leases(&self) -> Result<()> {
        self.lease_file.save(&self.engine.snapshot().await).await
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

async fn serve(engine: Arc<Engine>, socket: Arc<UdpSocket>, interface: String) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, source)) => {
                let data = buffer[..size].to_vec();
                let engine = Arc::clone(&engine);
                let socket = Arc::clone(&socket);

                tokio::spawn(async move {
                    debug!("{} bytes from {}", data.len(), source);
                    let Some((reply, destination)) = process_datagram(&engine, &data).await
                    else {
                        return;
                    };
                    if let Err(error) = socket.send_to(&reply, destination).await {
                        warn!("Failed to send reply to {}: {}", destination, error);
                    }
                });
            }
            Err(error) => {
                error!("Error receiving packet on {}: {}", interface, error);
            }
        }
    }
}

async fn reclaim_periodically(engine: Arc<Engine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let freed = engine.reclaim_expired().await;
        if !freed.is_empty() {
            debug!("Expiry sweep freed {} addresses", freed.len());
        }
    }
}

/// Decodes a datagram, runs it through the engine, and encodes the reply
/// together with where it should be sent.
pub async fn process_datagram(engine: &Engine, data: &[u8]) -> Option<(Vec<u8>, SocketAddr)> {
    let request = match DhcpPacket::parse(data) {
        Ok(packet) => packet,
        Err(error) => {
            debug!("Dropping datagram: {}", error);
            return None;
        }
    };

    let reply = engine.handle(&request).await?;
    let destination = reply_destination(&request, &reply);
    Some((reply.encode(), destination))
}

/// Chooses the reply address per RFC 2131 §4.1.
///
/// Relayed requests go back to the relay on port 67. Otherwise NAKs,
/// requests with the broadcast flag, and clients without an address are
/// answered by broadcast; everyone else by unicast to `ciaddr`.
pub fn reply_destination(request: &DhcpPacket, reply: &DhcpPacket) -> SocketAddr {
    let is_nak = reply.message_type() == Some(MessageType::Nak);

    if !request.giaddr.is_unspecified() {
        SocketAddr::new(IpAddr::V4(request.giaddr), DHCP_SERVER_PORT)
    } else if is_nak || request.is_broadcast() || request.ciaddr.is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(request.ciaddr), DHCP_CLIENT_PORT)
    }
}
