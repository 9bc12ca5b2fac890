//! Accept loop tying the transport, sessions and the controller together.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use ofc_wire::MessageCodec;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::session::{CloseReason, SessionConfig, SwitchSession};
use crate::timer::Timer;
use crate::transport::{listen_tcp, spawn_connection, ConnectionContext};

/// Default OpenFlow controller port
pub const DEFAULT_PORT: u16 = 6633;

/// TCP server running one session per switch connection
#[derive(Debug)]
pub struct ControllerServer {
    ctx: ConnectionContext,
    connections: Arc<DashMap<u64, SwitchSession>>,
}

impl ControllerServer {
    /// Create a server with a fresh controller and timer
    pub fn new(config: SessionConfig, codec: Arc<dyn MessageCodec>) -> Self {
        Self::with_controller(config, codec, Arc::new(Controller::new()))
    }

    /// Create a server reporting to an existing controller
    pub fn with_controller(
        config: SessionConfig,
        codec: Arc<dyn MessageCodec>,
        controller: Arc<Controller>,
    ) -> Self {
        Self {
            ctx: ConnectionContext {
                codec,
                config,
                controller,
                timer: Timer::new(),
            },
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Registry of established switches
    pub fn controller(&self) -> &Arc<Controller> {
        &self.ctx.controller
    }

    /// Timer shared by all sessions
    pub fn timer(&self) -> &Timer {
        &self.ctx.timer
    }

    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
        listen_tcp(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions keep running after this returns; call [`stop`](Self::stop)
    /// to close them.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr().context("listener has no local address")?;
        info!("Listening for switches on {}", local);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stopped accepting on {}", local);
                    return Ok(());
                }
                accepted = listener.accept() => accepted.context("accept failed")?,
            };

            info!("Accepted TCP connection from {}", peer);
            let (session, handle) = match spawn_connection(stream, &self.ctx) {
                Ok(started) => started,
                Err(e) => {
                    warn!("Failed to set up connection from {}: {}", peer, e);
                    continue;
                }
            };

            let id = session.id();
            self.connections.insert(id, session);
            let connections = self.connections.clone();
            tokio::spawn(async move {
                match handle.await {
                    Ok(reason) => debug!("Session {} from {} ended: {}", id, peer, reason),
                    Err(e) => warn!("Session {} from {} task failed: {}", id, peer, e),
                }
                connections.remove(&id);
            });
        }
    }

    /// Close every live session and cancel all timers
    pub fn stop(&self) {
        info!("Stopping controller ({} connections)", self.connections.len());
        self.ctx.controller.shutdown();
        for entry in self.connections.iter() {
            entry.value().close(CloseReason::Shutdown);
        }
        self.ctx.timer.shutdown();
    }

    /// Live sessions, handshaking or established
    pub fn connections(&self) -> Vec<SwitchSession> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of live sessions
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
