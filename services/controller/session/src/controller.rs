//! Connection registry and event fan-out.
//!
//! The [`Controller`] maps datapath ids to established sessions and owns the
//! listener lists. Listener lists are copy-on-write: fan-out clones an `Arc`
//! snapshot under a short read lock and calls listeners without holding any
//! lock, so registration can happen while events are in flight.

use std::sync::Arc;

use dashmap::DashMap;
use ofc_wire::{FlowRemoved, Message, MessageBody, PacketIn, PortStatus, VendorMsg};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::listener::{EventListener, VendorListener};
use crate::session::{CloseReason, SwitchSession};
use crate::transaction::{ReplyFuture, RequestError};

type Listeners<T> = RwLock<Arc<Vec<Arc<T>>>>;

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn add_listener<T: ?Sized>(list: &Listeners<T>, listener: Arc<T>) -> bool {
    let mut guard = list.write();
    if guard.iter().any(|existing| same_listener(existing, &listener)) {
        return false;
    }
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(listener);
    *guard = Arc::new(next);
    true
}

fn remove_listener<T: ?Sized>(list: &Listeners<T>, listener: &Arc<T>) -> bool {
    let mut guard = list.write();
    if !guard.iter().any(|existing| same_listener(existing, listener)) {
        return false;
    }
    let next: Vec<_> = guard
        .iter()
        .filter(|existing| !same_listener(existing, listener))
        .cloned()
        .collect();
    *guard = Arc::new(next);
    true
}

/// Registry of established switches and application listeners
pub struct Controller {
    switches: DashMap<u64, SwitchSession>,
    event_listeners: Listeners<dyn EventListener>,
    vendor_listeners: Listeners<dyn VendorListener>,
}

impl Controller {
    /// Create an empty controller
    pub fn new() -> Self {
        Self {
            switches: DashMap::new(),
            event_listeners: RwLock::new(Arc::new(Vec::new())),
            vendor_listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Record an established session and announce it.
    ///
    /// A session already registered under the same datapath id is evicted:
    /// listeners see it disconnect before the newcomer connects, and it is
    /// closed.
    pub fn register(&self, session: &SwitchSession) {
        let Some(dpid) = session.datapath_id() else {
            warn!("Refusing to register session {} without a datapath id", session.id());
            return;
        };

        let previous = self.switches.insert(dpid, session.clone());
        if let Some(old) = previous.filter(|old| old.id() != session.id()) {
            warn!(
                "Switch {:#018x} reconnected as session {}, evicting session {}",
                dpid,
                session.id(),
                old.id()
            );
            self.fire(|l| l.switch_disconnected(&old));
            old.close(CloseReason::Replaced);
        }

        info!("Switch {:#018x} connected (session {})", dpid, session.id());
        self.fire(|l| l.switch_connected(session));
    }

    /// Remove a session if it is still the one registered for its datapath id.
    ///
    /// Returns true and announces the disconnect only when an entry was
    /// removed.
    pub fn deregister(&self, session: &SwitchSession) -> bool {
        let Some(dpid) = session.datapath_id() else {
            return false;
        };

        let removed = self
            .switches
            .remove_if(&dpid, |_, current| current.id() == session.id());
        if removed.is_none() {
            debug!(
                "Session {} for switch {:#018x} no longer registered",
                session.id(),
                dpid
            );
            return false;
        }

        info!("Switch {:#018x} disconnected (session {})", dpid, session.id());
        self.fire(|l| l.switch_disconnected(session));
        true
    }

    fn fire(&self, f: impl Fn(&dyn EventListener)) {
        let snapshot = self.event_listeners.read().clone();
        for listener in snapshot.iter() {
            f(listener.as_ref());
        }
    }

    /// Fan out a PACKET_IN
    pub fn dispatch_packet_in(&self, session: &SwitchSession, msg: &PacketIn) {
        self.fire(|l| l.handle_packet_in(session, msg));
    }

    /// Fan out a FLOW_REMOVED
    pub fn dispatch_flow_removed(&self, session: &SwitchSession, msg: &FlowRemoved) {
        self.fire(|l| l.handle_flow_removed(session, msg));
    }

    /// Fan out a PORT_STATUS
    pub fn dispatch_port_status(&self, session: &SwitchSession, msg: &PortStatus) {
        self.fire(|l| l.handle_port_status(session, msg));
    }

    /// Fan out a VENDOR message to the vendor listeners
    pub fn dispatch_vendor(&self, session: &SwitchSession, msg: &VendorMsg) {
        let snapshot = self.vendor_listeners.read().clone();
        for listener in snapshot.iter() {
            listener.handle_vendor(session, msg);
        }
    }

    /// Add an event listener; false if it was already present
    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        add_listener(&self.event_listeners, listener)
    }

    /// Remove an event listener; false if it was not present
    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        remove_listener(&self.event_listeners, listener)
    }

    /// Add a vendor listener; false if it was already present
    pub fn add_vendor_listener(&self, listener: Arc<dyn VendorListener>) -> bool {
        add_listener(&self.vendor_listeners, listener)
    }

    /// Remove a vendor listener; false if it was not present
    pub fn remove_vendor_listener(&self, listener: &Arc<dyn VendorListener>) -> bool {
        remove_listener(&self.vendor_listeners, listener)
    }

    /// Number of registered event listeners
    pub fn event_listener_count(&self) -> usize {
        self.event_listeners.read().len()
    }

    /// Send `body` to the switch with datapath id `dpid`.
    ///
    /// A switch that is not (or no longer) connected yields an already
    /// failed handle.
    pub fn send(&self, dpid: u64, body: MessageBody) -> ReplyFuture {
        // Clone out of the map so no shard lock is held while sending
        let session = self.switches.get(&dpid).map(|entry| entry.value().clone());
        match session {
            Some(session) => session.send(body),
            None => {
                warn!(
                    "Dropping {} for switch {:#018x}: not connected",
                    body.message_type(),
                    dpid
                );
                ReplyFuture::failed(Message::new(body), RequestError::NotConnected)
            }
        }
    }

    /// Established session for `dpid`
    pub fn switch(&self, dpid: u64) -> Option<SwitchSession> {
        self.switches.get(&dpid).map(|entry| entry.value().clone())
    }

    /// All established sessions
    pub fn switches(&self) -> Vec<SwitchSession> {
        self.switches.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Datapath ids of all established sessions
    pub fn datapath_ids(&self) -> Vec<u64> {
        self.switches.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of established sessions
    pub fn len(&self) -> usize {
        self.switches.len()
    }

    /// Whether no switch is established
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    /// Close every established session
    pub fn shutdown(&self) {
        let sessions = self.switches();
        info!("Closing {} established switch sessions", sessions.len());
        for session in sessions {
            session.close(CloseReason::Shutdown);
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("switches", &self.datapath_ids())
            .field("event_listeners", &self.event_listener_count())
            .field("vendor_listeners", &self.vendor_listeners.read().len())
            .finish()
    }
}
