//! OpenFlow controller binary.
//!
//! Accepts switch connections, runs the handshake and keepalive for each, and
//! logs switch lifecycle and asynchronous events.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ofc_session::{ControllerServer, EventListener, SwitchSession, VendorListener};
use ofc_wire::{FlowRemoved, OpenFlowCodec, PacketIn, PortStatus, VendorMsg};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ControllerConfig;
use logging::OfcLogFormatter;

/// OpenFlow 1.0 controller
#[derive(Parser, Debug)]
#[command(name = "ofc", version, about = "OpenFlow 1.0 controller control plane")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Address to accept switch connections on
    #[arg(long)]
    listen: Option<IpAddr>,

    /// Port to accept switch connections on
    #[arg(long)]
    port: Option<u16>,

    /// Keepalive probe interval, e.g. 5s
    #[arg(long)]
    echo_interval: Option<humantime::Duration>,

    /// Feature request retry interval, e.g. 5s
    #[arg(long)]
    features_retry_interval: Option<humantime::Duration>,

    /// Silence after which a switch is dropped, e.g. 10s
    #[arg(long)]
    keepalive_timeout: Option<humantime::Duration>,

    /// Liveness check interval, e.g. 10s
    #[arg(long)]
    keepalive_check_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply_to(&self, config: &mut ControllerConfig) {
        if let Some(addr) = self.listen {
            config.listen_address = addr;
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }

        let durations = [
            (&self.echo_interval, &mut config.echo_interval),
            (&self.features_retry_interval, &mut config.features_retry_interval),
            (&self.keepalive_timeout, &mut config.keepalive_timeout),
            (&self.keepalive_check_interval, &mut config.keepalive_check_interval),
        ];
        for (flag, slot) in durations {
            if let Some(value) = flag {
                *slot = **value;
            }
        }
    }
}

/// Logs switch lifecycle and events
struct LoggingListener;

impl EventListener for LoggingListener {
    fn switch_connected(&self, session: &SwitchSession) {
        let ports = session.ports();
        let enabled = session.enabled_ports().len();
        info!(
            "Switch {} up from {:?}: {} ports ({} enabled)",
            session,
            session.remote_addr(),
            ports.len(),
            enabled
        );
        for port in ports {
            debug!("  port {} ({}) {}", port.port_no, port.name, port.hw_addr);
        }
    }

    fn switch_disconnected(&self, session: &SwitchSession) {
        let uptime = session
            .connected_since()
            .elapsed()
            .unwrap_or_default();
        info!(
            "Switch {} down after {}",
            session,
            humantime::format_duration(Duration::from_secs(uptime.as_secs()))
        );
    }

    fn handle_packet_in(&self, session: &SwitchSession, msg: &PacketIn) {
        match msg.frame() {
            Ok(chain) => match chain.link_layer() {
                Some(eth) => debug!(
                    "PACKET_IN from {} port {}: {} -> {} ({}, {} bytes)",
                    session,
                    msg.in_port,
                    eth.source,
                    eth.destination,
                    eth.ether_type,
                    chain.total_length()
                ),
                None => debug!("PACKET_IN from {} port {}: empty frame", session, msg.in_port),
            },
            Err(e) => warn!(
                "PACKET_IN from {} port {} has an undecodable frame: {}",
                session, msg.in_port, e
            ),
        }
    }

    fn handle_flow_removed(&self, session: &SwitchSession, msg: &FlowRemoved) {
        debug!(
            "Flow {:#x} removed on {} after {}s ({} packets)",
            msg.cookie, session, msg.duration_sec, msg.packet_count
        );
    }

    fn handle_port_status(&self, session: &SwitchSession, msg: &PortStatus) {
        info!(
            "Port {} ({}) on {}: {:?}, enabled: {}",
            msg.desc.port_no,
            msg.desc.name,
            session,
            msg.reason,
            msg.desc.is_enabled()
        );
    }
}

impl VendorListener for LoggingListener {
    fn handle_vendor(&self, session: &SwitchSession, msg: &VendorMsg) {
        debug!(
            "VENDOR {:#010x} from {} ({} bytes)",
            msg.vendor,
            session,
            msg.data.len()
        );
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("ofc={}", args.log_level).parse()?)
        .add_directive(format!("ofc_session={}", args.log_level).parse()?)
        .add_directive(format!("ofc_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(OfcLogFormatter::new("ofc"))
        .init();

    component_info!("main", "Starting OpenFlow controller v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ControllerConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    config.validate()?;

    info!(
        "Session config: echo_interval={:?}, features_retry_interval={:?}, keepalive_timeout={:?}, keepalive_check_interval={:?}",
        config.echo_interval,
        config.features_retry_interval,
        config.keepalive_timeout,
        config.keepalive_check_interval
    );

    let server = ControllerServer::new(config.session_config(), Arc::new(OpenFlowCodec::new()));
    let listener = Arc::new(LoggingListener);
    server.controller().add_event_listener(listener.clone());
    server.controller().add_vendor_listener(listener);

    let socket = ControllerServer::bind(config.listen_addr()).await?;
    component_info!("server", "Listening on {}", config.listen_addr());

    let served = server
        .serve(socket, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                component_warn!("main", "Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
            component_info!("main", "Received SIGINT, shutting down");
        })
        .await;

    server.stop();
    // Give sessions a moment to flush and close their sockets
    tokio::time::sleep(Duration::from_millis(200)).await;

    match served {
        Ok(()) => {
            component_info!("main", "Controller stopped");
            Ok(())
        }
        Err(e) => {
            component_warn!("main", "Accept loop failed: {:#}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "ofc",
            "--listen",
            "127.0.0.1",
            "--port",
            "6653",
            "--echo-interval",
            "2s",
            "--keepalive-timeout",
            "30s",
        ]);

        let mut config = ControllerConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:6653");
        assert_eq!(config.echo_interval, Duration::from_secs(2));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(30));
        assert_eq!(config.features_retry_interval, Duration::from_secs(5));
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["ofc"]);
        let mut config = ControllerConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config, ControllerConfig::default());
    }
}
