//! Switch sessions, request correlation and the controller registry.
//!
//! This crate runs the control connection to each switch: the greeting and
//! feature negotiation that establish a session, periodic keepalive probing,
//! correlation of replies with outstanding requests, and fan-out of switch
//! events to application listeners once a switch is known.
//!
//! ## Features
//!
//! - **Session Actor**: one task per switch owns all session state
//! - **Handshake**: HELLO, FEATURES_REQUEST/REPLY with periodic retry
//! - **Keepalive**: ECHO_REQUEST/ECHO_REPLY with RTT measurement and timeout
//! - **Transactions**: xid-keyed pending replies that callers can await
//! - **Registry**: datapath id to session map with listener fan-out
//! - **TCP Server**: accept loop with one session per connection
//!
//! ## Example
//!
//! ```rust,no_run
//! use ofc_session::{ControllerServer, EventListener, SessionConfig, SwitchSession};
//! use ofc_wire::OpenFlowCodec;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventListener for Printer {
//!     fn switch_connected(&self, session: &SwitchSession) {
//!         println!("Connected: {}", session);
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = ControllerServer::new(SessionConfig::default(), Arc::new(OpenFlowCodec::new()));
//! server.controller().add_event_listener(Arc::new(Printer));
//!
//! let listener = ControllerServer::bind("0.0.0.0:6633".parse()?).await?;
//! server
//!     .serve(listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! server.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod handshake;
pub mod keepalive;
pub mod listener;
pub mod server;
pub mod session;
pub mod timer;
pub mod transaction;
pub mod transport;

// Re-export main types
pub use controller::Controller;
pub use handshake::HandshakeState;
pub use keepalive::KeepaliveMonitor;
pub use listener::{EventListener, VendorListener};
pub use server::{ControllerServer, DEFAULT_PORT};
pub use session::{CloseReason, SessionConfig, SwitchSession};
pub use timer::{ScheduledTask, Timer};
pub use transaction::{PendingReply, ReplyFuture, RequestError, TransactionRegistry};
pub use transport::{connect_tcp, listen_tcp, spawn_connection, ConnectionContext};
