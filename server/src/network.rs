//! Server network layer: the TCP listener and the accept loop that hands
//! each incoming connection to its own handler task.

use crate::config::EngineConfig;
use crate::connection;
use crate::registry::RoomRegistry;
use log::{info, warn};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// The listening front of the engine. Rooms and connections all run as their
/// own tasks; this only accepts sockets and spawns handlers.
pub struct Server {
    listener: TcpListener,
    registry: RoomRegistry,
    config: EngineConfig,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: EngineConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            registry: RoomRegistry::new(config.clone()),
            listener,
            config,
        })
    }

    /// Actual bound address; callers binding port 0 read it back here.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> RoomRegistry {
        self.registry.clone()
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("failed to set nodelay on {}: {}", addr, e);
                    }
                    tokio::spawn(connection::handle(
                        stream,
                        addr,
                        self.registry.clone(),
                        self.config.clone(),
                    ));
                }
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                }
            }
        }
    }
}
