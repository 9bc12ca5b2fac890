//! Application callback contracts.
//!
//! Listeners are called synchronously from the session that produced the
//! event. A listener that blocks only delays that one switch.

use ofc_wire::{FlowRemoved, PacketIn, PortStatus, VendorMsg};

use crate::session::SwitchSession;

/// Lifecycle and asynchronous event callbacks.
///
/// Every method defaults to a no-op so applications implement only what
/// they need.
pub trait EventListener: Send + Sync {
    /// A switch completed its handshake
    fn switch_connected(&self, _session: &SwitchSession) {}

    /// A previously connected switch went away
    fn switch_disconnected(&self, _session: &SwitchSession) {}

    /// The switch forwarded a packet
    fn handle_packet_in(&self, _session: &SwitchSession, _msg: &PacketIn) {}

    /// A flow entry was removed
    fn handle_flow_removed(&self, _session: &SwitchSession, _msg: &FlowRemoved) {}

    /// A port was added, removed or changed
    fn handle_port_status(&self, _session: &SwitchSession, _msg: &PortStatus) {}
}

/// Vendor extension callback
pub trait VendorListener: Send + Sync {
    /// The switch sent a VENDOR message
    fn handle_vendor(&self, session: &SwitchSession, msg: &VendorMsg);
}
