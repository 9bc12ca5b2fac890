//! Switch session: handshake, keepalive and message dispatch for one
//! connection.
//!
//! Each connection gets one actor task. Inbound messages from the transport
//! and ticks from the shared [`Timer`] both arrive on queues the actor drains
//! in a single `select!` loop, so session state is only ever touched from one
//! place. [`SwitchSession`] is the cheap, clonable handle applications and
//! the controller hold; sending goes straight to the outbound queue without
//! involving the actor.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use ofc_wire::{
    Actions, Capabilities, FeaturesReply, Message, MessageBody, MessageType, PhyPort,
    PortReason,
};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::handshake::{self, HandshakeState, StateCell};
use crate::keepalive::KeepaliveMonitor;
use crate::timer::{ScheduledTask, Timer};
use crate::transaction::{PendingReply, ReplyFuture, RequestError, TransactionRegistry};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a switch session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Interval between ECHO_REQUEST probes
    pub echo_interval: Duration,
    /// Interval between FEATURES_REQUEST retries until established
    pub features_retry_interval: Duration,
    /// Silence after which the switch is considered dead
    pub keepalive_timeout: Duration,
    /// Interval between liveness checks
    pub keepalive_check_interval: Duration,
    /// Decoded messages buffered between the transport and the session
    pub inbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            echo_interval: Duration::from_secs(5),
            features_retry_interval: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(10),
            keepalive_check_interval: Duration::from_secs(10),
            inbound_queue: 1024,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection or the transport failed
    TransportClosed,
    /// No keepalive reply within the timeout
    KeepaliveTimeout,
    /// Another session registered the same datapath id
    Replaced,
    /// The server is stopping
    Shutdown,
    /// Closed through [`SwitchSession::close`]
    Requested,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::TransportClosed => "transport closed",
            CloseReason::KeepaliveTimeout => "keepalive timeout",
            CloseReason::Replaced => "replaced by newer session",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Requested => "requested",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TaskKind {
    FeaturesRequest,
    EchoRequest,
    KeepaliveCheck,
}

impl TaskKind {
    fn name(self) -> &'static str {
        match self {
            TaskKind::FeaturesRequest => "features-request",
            TaskKind::EchoRequest => "echo-request",
            TaskKind::KeepaliveCheck => "keepalive-check",
        }
    }
}

#[derive(Debug)]
enum Command {
    Tick(TaskKind),
    Close(CloseReason),
}

struct SessionShared {
    id: u64,
    remote_addr: Option<SocketAddr>,
    connected_since: SystemTime,
    state: StateCell,
    features: RwLock<Option<FeaturesReply>>,
    ports: DashMap<u16, PhyPort>,
    next_xid: AtomicU32,
    transactions: Arc<TransactionRegistry>,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    mailbox: mpsc::UnboundedSender<Command>,
}

/// Handle to one switch connection
#[derive(Clone)]
pub struct SwitchSession {
    shared: Arc<SessionShared>,
}

impl SwitchSession {
    /// Start the session actor for a freshly connected switch.
    ///
    /// `inbound` delivers decoded messages from the transport; closing it
    /// signals disconnect. `outbound` accepts messages to write; it is dropped
    /// when the session closes. HELLO is queued before the handle is returned,
    /// so it precedes anything sent through it. Must be called from within a
    /// tokio runtime.
    pub fn start(
        config: SessionConfig,
        controller: Arc<Controller>,
        timer: Timer,
        remote_addr: Option<SocketAddr>,
        inbound: mpsc::Receiver<Message>,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> (SwitchSession, JoinHandle<CloseReason>) {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let session = SwitchSession {
            shared: Arc::new(SessionShared {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                connected_since: SystemTime::now(),
                state: StateCell::new(),
                features: RwLock::new(None),
                ports: DashMap::new(),
                next_xid: AtomicU32::new(1),
                transactions: Arc::new(TransactionRegistry::new()),
                outbound: RwLock::new(Some(outbound)),
                mailbox,
            }),
        };

        let _ = session.send(handshake::hello());
        session.shared.state.advance(HandshakeState::Handshaking);

        let actor = SessionActor {
            keepalive: KeepaliveMonitor::new(config.keepalive_timeout, Instant::now()),
            session: session.clone(),
            controller,
            timer,
            config,
            tasks: HashMap::new(),
            features_requests: Vec::new(),
            echo_probe: None,
        };
        let handle = tokio::spawn(actor.run(inbound, commands));
        (session, handle)
    }

    /// Process-unique session id
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Switch datapath id, known once features have been negotiated
    pub fn datapath_id(&self) -> Option<u64> {
        self.shared.features.read().as_ref().map(|f| f.datapath_id)
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.shared.state.get()
    }

    /// Whether the handshake completed and the session is still open
    pub fn is_handshaken(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    /// Whether messages can still be sent
    pub fn is_connected(&self) -> bool {
        self.shared.outbound.read().is_some()
    }

    /// Negotiated features
    pub fn features(&self) -> Option<FeaturesReply> {
        self.shared.features.read().clone()
    }

    /// Switch capabilities, once negotiated
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.shared.features.read().as_ref().map(|f| f.capabilities)
    }

    /// Supported actions, once negotiated
    pub fn supported_actions(&self) -> Option<Actions> {
        self.shared.features.read().as_ref().map(|f| f.actions)
    }

    /// Current port table, ordered by port number
    pub fn ports(&self) -> Vec<PhyPort> {
        let mut ports: Vec<PhyPort> = self
            .shared
            .ports
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        ports.sort_by_key(|p| p.port_no);
        ports
    }

    /// A single port
    pub fn port(&self, port_no: u16) -> Option<PhyPort> {
        self.shared.ports.get(&port_no).map(|entry| entry.value().clone())
    }

    /// Ports that are up and forwarding
    pub fn enabled_ports(&self) -> Vec<PhyPort> {
        self.ports().into_iter().filter(PhyPort::is_enabled).collect()
    }

    /// When the transport connected
    pub fn connected_since(&self) -> SystemTime {
        self.shared.connected_since
    }

    /// Peer address, if the transport has one
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.transactions.len()
    }

    /// Whether a request with `xid` is still waiting for its reply
    pub fn has_pending(&self, xid: u32) -> bool {
        self.shared.transactions.contains(xid)
    }

    fn next_xid(&self) -> u32 {
        loop {
            let xid = self.shared.next_xid.fetch_add(1, Ordering::Relaxed);
            if xid != 0 {
                return xid;
            }
        }
    }

    /// Send `body` with the next transaction id
    pub fn send(&self, body: MessageBody) -> ReplyFuture {
        let xid = self.next_xid();
        self.send_with_xid(body, xid)
    }

    /// Send `body` with a caller-chosen transaction id.
    ///
    /// Request types register a pending reply before the message is queued.
    /// A closed session, or an xid already in flight, yields a failed handle.
    pub fn send_with_xid(&self, body: MessageBody, xid: u32) -> ReplyFuture {
        let msg = Message::with_xid(xid, body);
        let typ = msg.message_type();

        // Held across register + queue so close cannot slip in between
        let outbound = self.shared.outbound.read();
        let Some(tx) = outbound.as_ref() else {
            debug!("Session {} closed, not sending {} (xid: {})", self.id(), typ, xid);
            return ReplyFuture::failed(msg, RequestError::NotConnected);
        };

        if !typ.is_request() {
            return match tx.send(msg.clone()) {
                Ok(()) => ReplyFuture::sent(msg),
                Err(_) => ReplyFuture::failed(msg, RequestError::NotConnected),
            };
        }

        let (pending, future) = PendingReply::new(msg.clone());
        if !self.shared.transactions.register(xid, pending) {
            warn!("Session {}: xid {} already in flight", self.id(), xid);
            return ReplyFuture::failed(msg, RequestError::DuplicateTransaction(xid));
        }
        let future = future.with_registry(&self.shared.transactions);
        if tx.send(msg).is_err() {
            self.shared.transactions.fail(xid, RequestError::NotConnected);
        }
        future
    }

    /// Ask the session to close. No-op if it already has.
    pub fn close(&self, reason: CloseReason) {
        if self.shared.mailbox.send(Command::Close(reason)).is_err() {
            debug!("Session {} already stopped", self.id());
        }
    }
}

impl fmt::Debug for SwitchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchSession")
            .field("id", &self.id())
            .field("datapath_id", &self.datapath_id())
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}

impl fmt::Display for SwitchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.datapath_id(), self.remote_addr()) {
            (Some(dpid), _) => write!(f, "switch {:#018x}", dpid),
            (None, Some(addr)) => write!(f, "session {} ({})", self.id(), addr),
            (None, None) => write!(f, "session {}", self.id()),
        }
    }
}

struct SessionActor {
    session: SwitchSession,
    controller: Arc<Controller>,
    timer: Timer,
    config: SessionConfig,
    keepalive: KeepaliveMonitor,
    tasks: HashMap<TaskKind, ScheduledTask>,
    // Handles for requests the session issues itself; dropping one releases
    // its transaction entry
    features_requests: Vec<ReplyFuture>,
    echo_probe: Option<ReplyFuture>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Message>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> CloseReason {
        info!("Starting session with {}", self.session);

        self.schedule(TaskKind::FeaturesRequest, self.config.features_retry_interval);
        self.schedule(TaskKind::EchoRequest, self.config.echo_interval);
        self.schedule(TaskKind::KeepaliveCheck, self.config.keepalive_check_interval);

        let reason = loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Close(reason)) => break reason,
                    Some(Command::Tick(kind)) => {
                        if let Some(reason) = self.on_tick(kind) {
                            break reason;
                        }
                    }
                    None => break CloseReason::Shutdown,
                },

                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break CloseReason::TransportClosed,
                },
            }
        };

        self.shutdown(reason);
        reason
    }

    fn schedule(&mut self, kind: TaskKind, period: Duration) {
        let mailbox = self.session.shared.mailbox.clone();
        let task = self.timer.schedule_at_fixed_rate(kind.name(), period, move || {
            mailbox.send(Command::Tick(kind)).is_ok()
        });
        self.tasks.insert(kind, task);
    }

    fn cancel(&mut self, kind: TaskKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.cancel();
        }
    }

    fn on_tick(&mut self, kind: TaskKind) -> Option<CloseReason> {
        match kind {
            TaskKind::FeaturesRequest => {
                if self.session.state() < HandshakeState::Established {
                    debug!("Requesting features from {}", self.session);
                    self.request_features();
                } else {
                    self.cancel(TaskKind::FeaturesRequest);
                }
            }
            TaskKind::EchoRequest => {
                self.keepalive.record_probe(Instant::now());
                let probe = self.session.send(handshake::echo_request());
                debug!("Sent ECHO_REQUEST to {} (xid: {})", self.session, probe.xid());
                // An unanswered earlier probe is released here
                self.echo_probe = Some(probe);
            }
            TaskKind::KeepaliveCheck => {
                let now = Instant::now();
                if self.keepalive.is_expired(now) {
                    warn!(
                        "No ECHO_REPLY from {} for {:?}, closing",
                        self.session,
                        self.keepalive.silence(now)
                    );
                    return Some(CloseReason::KeepaliveTimeout);
                }
            }
        }
        None
    }

    fn handle_message(&mut self, msg: Message) {
        let xid = msg.xid;
        match &msg.body {
            MessageBody::Hello => {
                debug!("Received HELLO from {}", self.session);
                if self.session.state() < HandshakeState::Established {
                    self.request_features();
                }
            }
            MessageBody::Error(err) => {
                warn!(
                    "Received ERROR from {} (type: {}, code: {}, xid: {})",
                    self.session, err.err_type, err.code, xid
                );
                let failure = RequestError::PeerError {
                    err_type: err.err_type,
                    code: err.code,
                };
                if self.session.shared.transactions.fail(xid, failure) {
                    debug!("Failed pending request {} on {}", xid, self.session);
                }
            }
            MessageBody::EchoRequest(payload) => {
                debug!("Received ECHO_REQUEST from {} (xid: {})", self.session, xid);
                let _ = self
                    .session
                    .send_with_xid(handshake::echo_reply(payload.clone()), xid);
            }
            MessageBody::EchoReply(_) => {
                if let Some(rtt) = self.keepalive.record_reply(Instant::now()) {
                    debug!("RTT to {}: {:?}", self.session, rtt);
                }
                self.correlate(msg);
            }
            MessageBody::FeaturesReply(features) => {
                let features = features.clone();
                self.correlate(msg);
                self.on_features(features);
            }
            MessageBody::GetConfigReply(_)
            | MessageBody::StatsReply(_)
            | MessageBody::BarrierReply => self.correlate(msg),
            MessageBody::PacketIn(packet_in) => {
                if self.accepts_events(MessageType::PacketIn) {
                    self.controller.dispatch_packet_in(&self.session, packet_in);
                }
            }
            MessageBody::FlowRemoved(flow_removed) => {
                if self.accepts_events(MessageType::FlowRemoved) {
                    self.controller
                        .dispatch_flow_removed(&self.session, flow_removed);
                }
            }
            MessageBody::PortStatus(status) => {
                if self.accepts_events(MessageType::PortStatus) {
                    let ports = &self.session.shared.ports;
                    match status.reason {
                        PortReason::Add | PortReason::Modify => {
                            ports.insert(status.desc.port_no, status.desc.clone());
                        }
                        PortReason::Delete => {
                            ports.remove(&status.desc.port_no);
                        }
                    }
                    self.controller.dispatch_port_status(&self.session, status);
                }
            }
            MessageBody::Vendor(vendor) => {
                if self.accepts_events(MessageType::Vendor) {
                    self.controller.dispatch_vendor(&self.session, vendor);
                }
            }
            MessageBody::FeaturesRequest
            | MessageBody::GetConfigRequest
            | MessageBody::SetConfig(_)
            | MessageBody::PacketOut(_)
            | MessageBody::FlowMod(_)
            | MessageBody::PortMod(_)
            | MessageBody::StatsRequest(_)
            | MessageBody::BarrierRequest => {
                warn!(
                    "Unsupported {} from {} (xid: {}), dropping",
                    msg.message_type(),
                    self.session,
                    xid
                );
            }
        }
    }

    fn request_features(&mut self) {
        let request = self.session.send(handshake::features_request());
        self.features_requests.push(request);
    }

    fn accepts_events(&self, typ: MessageType) -> bool {
        if self.session.is_handshaken() {
            return true;
        }
        debug!(
            "Dropping {} from {} before handshake completed",
            typ, self.session
        );
        false
    }

    fn correlate(&self, reply: Message) {
        let typ = reply.message_type();
        let xid = reply.xid;
        if !self.session.shared.transactions.resolve(reply) {
            warn!(
                "Stale or duplicate {} from {} (xid: {})",
                typ, self.session, xid
            );
        }
    }

    fn on_features(&mut self, features: FeaturesReply) {
        self.cancel(TaskKind::FeaturesRequest);
        // Retries still in flight are answered by this reply
        self.features_requests.clear();

        // The registry is keyed by the first datapath id; it never changes
        if let Some(current) = self.session.datapath_id() {
            if current != features.datapath_id {
                warn!(
                    "{} reported datapath id {:#018x} on refresh, keeping {:#018x}",
                    self.session, features.datapath_id, current
                );
                return;
            }
        }

        let shared = &self.session.shared;
        shared.ports.clear();
        for port in &features.ports {
            shared.ports.insert(port.port_no, port.clone());
        }

        let dpid = features.datapath_id;
        let n_ports = features.ports.len();
        *shared.features.write() = Some(features);

        if shared.state.advance(HandshakeState::Established) {
            info!(
                "Handshake complete with {} ({} ports)",
                self.session, n_ports
            );
            self.controller.register(&self.session);
        } else {
            debug!("Refreshed features for {:#018x}", dpid);
        }
    }

    fn shutdown(&mut self, reason: CloseReason) {
        for (_, task) in self.tasks.drain() {
            task.cancel();
        }

        let shared = &self.session.shared;
        let previous = shared.state.close();
        shared.outbound.write().take();

        if previous == HandshakeState::Established {
            self.controller.deregister(&self.session);
        }

        let failed = shared.transactions.fail_all(RequestError::SessionClosed);
        info!(
            "Session with {} closed: {} ({} pending requests failed)",
            self.session, reason, failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{EventListener, VendorListener};
    use bytes::Bytes;
    use ofc_wire::{
        ErrorMsg, MacAddress, PacketIn, PacketInReason, PortStatus, VendorMsg, NO_BUFFER,
    };
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Connected(u64),
        Disconnected(u64),
        PacketIn(u64, u16),
        PortStatus(u64, u16),
        Vendor(u64, u32),
    }

    struct Recorder {
        tag: &'static str,
        events: mpsc::UnboundedSender<Event>,
        order: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
            let (events, rx) = mpsc::unbounded_channel();
            let recorder = Arc::new(Self {
                tag: "recorder",
                events,
                order: None,
            });
            (recorder, rx)
        }
    }

    impl EventListener for Recorder {
        fn switch_connected(&self, session: &SwitchSession) {
            if let Some(order) = &self.order {
                order.lock().push(self.tag);
            }
            let _ = self.events.send(Event::Connected(session.id()));
        }

        fn switch_disconnected(&self, session: &SwitchSession) {
            let _ = self.events.send(Event::Disconnected(session.id()));
        }

        fn handle_packet_in(&self, session: &SwitchSession, msg: &PacketIn) {
            let _ = self.events.send(Event::PacketIn(session.id(), msg.in_port));
        }

        fn handle_port_status(&self, session: &SwitchSession, msg: &PortStatus) {
            let _ = self
                .events
                .send(Event::PortStatus(session.id(), msg.desc.port_no));
        }
    }

    impl VendorListener for Recorder {
        fn handle_vendor(&self, session: &SwitchSession, msg: &VendorMsg) {
            let _ = self.events.send(Event::Vendor(session.id(), msg.vendor));
        }
    }

    /// One session wired to in-memory channels instead of a socket
    struct Harness {
        session: SwitchSession,
        actor: JoinHandle<CloseReason>,
        to_session: mpsc::Sender<Message>,
        from_session: mpsc::UnboundedReceiver<Message>,
    }

    impl Harness {
        fn start(controller: &Arc<Controller>, timer: &Timer) -> Self {
            let (to_session, inbound) = mpsc::channel(64);
            let (outbound, from_session) = mpsc::unbounded_channel();
            let (session, actor) = SwitchSession::start(
                SessionConfig::default(),
                controller.clone(),
                timer.clone(),
                None,
                inbound,
                outbound,
            );
            Self {
                session,
                actor,
                to_session,
                from_session,
            }
        }

        async fn deliver(&self, xid: u32, body: MessageBody) {
            self.to_session
                .send(Message::with_xid(xid, body))
                .await
                .expect("session stopped");
        }

        /// Next message of type `typ`, skipping keepalive probes
        async fn expect(&mut self, typ: MessageType) -> Message {
            loop {
                let msg = self.from_session.recv().await.expect("outbound closed");
                if msg.message_type() == typ {
                    return msg;
                }
                assert_eq!(
                    msg.message_type(),
                    MessageType::EchoRequest,
                    "unexpected {:?} while waiting for {}",
                    msg,
                    typ
                );
            }
        }

        async fn handshake(&mut self, dpid: u64) {
            self.expect(MessageType::Hello).await;
            self.deliver(0, MessageBody::Hello).await;
            let request = self.expect(MessageType::FeaturesRequest).await;
            self.deliver(request.xid, features(dpid)).await;
        }

        /// Round-trip an ECHO so every earlier delivery has been processed
        async fn sync(&mut self) {
            self.deliver(0xfeed, MessageBody::EchoRequest(Bytes::new()))
                .await;
            let reply = self.expect(MessageType::EchoReply).await;
            assert_eq!(reply.xid, 0xfeed);
        }
    }

    fn port(port_no: u16) -> PhyPort {
        PhyPort::new(
            port_no,
            MacAddress::new([0x02, 0, 0, 0, 0, port_no as u8]),
            format!("eth{port_no}"),
        )
    }

    fn features(dpid: u64) -> MessageBody {
        MessageBody::FeaturesReply(FeaturesReply {
            datapath_id: dpid,
            n_buffers: 256,
            n_tables: 1,
            capabilities: Capabilities::FLOW_STATS | Capabilities::PORT_STATS,
            actions: Actions::OUTPUT,
            ports: vec![port(1), port(2)],
        })
    }

    fn packet_in(in_port: u16) -> MessageBody {
        MessageBody::PacketIn(PacketIn {
            buffer_id: NO_BUFFER,
            total_len: 14,
            in_port,
            reason: PacketInReason::NoMatch,
            data: Bytes::from_static(&[0u8; 14]),
        })
    }

    fn setup() -> (Arc<Controller>, Timer, mpsc::UnboundedReceiver<Event>) {
        let controller = Arc::new(Controller::new());
        let (recorder, events) = Recorder::new();
        controller.add_event_listener(recorder);
        (controller, Timer::new(), events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_registers_switch() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);

        h.handshake(0x1).await;
        assert_eq!(events.recv().await, Some(Event::Connected(h.session.id())));

        assert!(h.session.is_handshaken());
        assert_eq!(h.session.datapath_id(), Some(0x1));
        assert_eq!(h.session.ports().len(), 2);
        assert_eq!(h.session.enabled_ports().len(), 2);
        assert!(h
            .session
            .capabilities()
            .unwrap()
            .contains(Capabilities::PORT_STATS));
        assert_eq!(controller.switch(0x1).unwrap().id(), h.session.id());

        h.sync().await;
        assert!(events.try_recv().is_err(), "exactly one switch_connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_features_request_retried_until_established() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);

        // No HELLO from the switch: only the periodic retry asks for features
        h.expect(MessageType::Hello).await;
        let first = h.expect(MessageType::FeaturesRequest).await;
        let second = h.expect(MessageType::FeaturesRequest).await;
        assert_ne!(first.xid, second.xid);
        assert_eq!(h.session.state(), HandshakeState::Handshaking);

        h.deliver(second.xid, features(0x2)).await;
        h.sync().await;
        assert!(h.session.is_handshaken());
        assert_eq!(timer.active_tasks(), 2);
        // The unanswered retry is released along with the answered one
        assert!(!h.session.has_pending(first.xid));
        assert!(!h.session.has_pending(second.xid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_timeout_closes_session() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        let started = Instant::now();

        h.handshake(0x1).await;
        assert_eq!(events.recv().await, Some(Event::Connected(h.session.id())));

        // The switch never answers probes
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(h.session.id()))
        );
        assert!(started.elapsed() > Duration::from_secs(10));

        assert_eq!(h.actor.await.unwrap(), CloseReason::KeepaliveTimeout);
        assert_eq!(h.session.state(), HandshakeState::Closed);
        assert!(controller.switch(0x1).is_none());
        assert_eq!(timer.active_tasks(), 0);
        assert!(events.try_recv().is_err(), "exactly one switch_disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_replies_keep_session_alive() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;

        let end = Instant::now() + Duration::from_secs(62);
        loop {
            let next = tokio::time::timeout_at(end, h.from_session.recv()).await;
            let Ok(msg) = next else { break };
            let msg = msg.expect("session closed");
            if let MessageBody::EchoRequest(payload) = msg.body {
                h.deliver(msg.xid, MessageBody::EchoReply(payload)).await;
            }
        }
        h.sync().await;

        assert!(h.session.is_handshaken());
        assert_eq!(controller.len(), 1);
        // Each probe was correlated and removed
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_is_ignored() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;

        h.deliver(42, MessageBody::BarrierReply).await;
        h.sync().await;

        assert_eq!(h.session.state(), HandshakeState::Established);
        assert!(controller.switch(0x1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_correlated_by_xid() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;

        let handle = h.session.send_with_xid(MessageBody::FeaturesRequest, 7);
        assert_eq!(handle.xid(), 7);
        let request = h.expect(MessageType::FeaturesRequest).await;
        assert_eq!(request.xid, 7);

        h.deliver(7, features(0x1)).await;
        let reply = handle
            .wait_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.xid, 7);
        assert!(matches!(reply.body, MessageBody::FeaturesReply(ref f) if f.datapath_id == 0x1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_send_assigns_fresh_xid() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert_eq!(events.recv().await, Some(Event::Connected(h.session.id())));

        let handle = controller.send(0x1, MessageBody::BarrierRequest);
        let request = h.expect(MessageType::BarrierRequest).await;
        assert_eq!(request.xid, handle.xid());

        h.deliver(request.xid, MessageBody::BarrierReply).await;
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.message_type(), MessageType::BarrierReply);

        // Messages without a reply resolve once queued
        let sent = controller.send(0x1, MessageBody::FlowMod(Bytes::from_static(b"flow")));
        assert_eq!(sent.await, Ok(None));
        h.expect(MessageType::FlowMod).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_xid_rejected() {
        let (controller, timer, _events) = setup();
        let h = Harness::start(&controller, &timer);

        let _first = h.session.send_with_xid(MessageBody::BarrierRequest, 5);
        let second = h.session.send_with_xid(MessageBody::BarrierRequest, 5);
        assert_eq!(second.await, Err(RequestError::DuplicateTransaction(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_fails_matching_request() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;

        let handle = h.session.send(MessageBody::StatsRequest(Bytes::new()));
        let request = h.expect(MessageType::StatsRequest).await;
        h.deliver(
            request.xid,
            MessageBody::Error(ErrorMsg {
                err_type: ErrorMsg::BAD_REQUEST,
                code: 2,
                data: Bytes::new(),
            }),
        )
        .await;

        assert_eq!(
            handle.await,
            Err(RequestError::PeerError {
                err_type: ErrorMsg::BAD_REQUEST,
                code: 2
            })
        );
        assert!(h.session.is_handshaken());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_pending_and_later_sends() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert!(matches!(events.recv().await, Some(Event::Connected(_))));

        let pending = h.session.send(MessageBody::BarrierRequest);
        h.session.close(CloseReason::Requested);
        assert_eq!(h.actor.await.unwrap(), CloseReason::Requested);

        assert_eq!(pending.await, Err(RequestError::SessionClosed));
        assert_eq!(
            h.session.send(MessageBody::BarrierRequest).await,
            Err(RequestError::NotConnected)
        );
        assert!(!h.session.is_connected());
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(h.session.id()))
        );

        // Closing again is a no-op
        h.session.close(CloseReason::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_close_before_handshake_is_silent() {
        let (controller, timer, mut events) = setup();
        let h = Harness::start(&controller, &timer);

        drop(h.to_session);
        assert_eq!(h.actor.await.unwrap(), CloseReason::TransportClosed);
        assert_eq!(h.session.state(), HandshakeState::Closed);
        assert!(events.try_recv().is_err());
        assert_eq!(timer.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_datapath_id_evicts_older_session() {
        let (controller, timer, mut events) = setup();
        let mut first = Harness::start(&controller, &timer);
        first.handshake(0x1).await;
        assert_eq!(
            events.recv().await,
            Some(Event::Connected(first.session.id()))
        );

        let mut second = Harness::start(&controller, &timer);
        second.handshake(0x1).await;
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(first.session.id()))
        );
        assert_eq!(
            events.recv().await,
            Some(Event::Connected(second.session.id()))
        );

        assert_eq!(first.actor.await.unwrap(), CloseReason::Replaced);
        assert_eq!(controller.switch(0x1).unwrap().id(), second.session.id());
        assert_eq!(controller.len(), 1);

        second.sync().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_dispatched_only_when_established() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);

        h.expect(MessageType::Hello).await;
        h.deliver(0, packet_in(9)).await;
        h.sync().await;
        assert!(events.try_recv().is_err());

        h.deliver(0, MessageBody::Hello).await;
        let request = h.expect(MessageType::FeaturesRequest).await;
        h.deliver(request.xid, features(0x1)).await;
        assert!(matches!(events.recv().await, Some(Event::Connected(_))));

        h.deliver(0, packet_in(3)).await;
        assert_eq!(
            events.recv().await,
            Some(Event::PacketIn(h.session.id(), 3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_status_updates_port_table() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert!(matches!(events.recv().await, Some(Event::Connected(_))));

        h.deliver(
            0,
            MessageBody::PortStatus(PortStatus {
                reason: PortReason::Delete,
                desc: port(2),
            }),
        )
        .await;
        assert_eq!(
            events.recv().await,
            Some(Event::PortStatus(h.session.id(), 2))
        );
        assert!(h.session.port(2).is_none());

        let mut down = port(5);
        down.config = ofc_wire::PortConfig::PORT_DOWN;
        h.deliver(
            0,
            MessageBody::PortStatus(PortStatus {
                reason: PortReason::Add,
                desc: down,
            }),
        )
        .await;
        assert_eq!(
            events.recv().await,
            Some(Event::PortStatus(h.session.id(), 5))
        );
        let numbers: Vec<u16> = h.session.ports().iter().map(|p| p.port_no).collect();
        assert_eq!(numbers, [1, 5]);
        assert_eq!(h.session.enabled_ports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vendor_goes_to_vendor_listeners_only() {
        let (controller, timer, mut events) = setup();
        let (vendor, mut vendor_events) = Recorder::new();
        controller.add_vendor_listener(vendor);

        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert!(matches!(events.recv().await, Some(Event::Connected(_))));

        h.deliver(
            0,
            MessageBody::Vendor(VendorMsg {
                vendor: 0x2320,
                data: Bytes::new(),
            }),
        )
        .await;
        assert_eq!(
            vendor_events.recv().await,
            Some(Event::Vendor(h.session.id(), 0x2320))
        );

        h.sync().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_message_keeps_session_open() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;

        h.deliver(11, MessageBody::FlowMod(Bytes::from_static(b"nope")))
            .await;
        h.deliver(12, MessageBody::BarrierRequest).await;
        h.sync().await;

        assert!(h.session.is_handshaken());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_notified_in_registration_order() {
        let controller = Arc::new(Controller::new());
        let timer = Timer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        for tag in ["first", "second", "third"] {
            controller.add_event_listener(Arc::new(Recorder {
                tag,
                events: tx.clone(),
                order: Some(order.clone()),
            }));
        }

        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(Event::Connected(_))));
        }
        assert_eq!(*order.lock(), ["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_precedes_early_sends() {
        let (controller, timer, _events) = setup();
        let mut h = Harness::start(&controller, &timer);
        assert_eq!(h.session.state(), HandshakeState::Handshaking);

        let _ = h
            .session
            .send(MessageBody::FlowMod(Bytes::from_static(b"early")));
        let first = h.from_session.recv().await.map(|m| m.message_type());
        let second = h.from_session.recv().await.map(|m| m.message_type());
        assert_eq!(first, Some(MessageType::Hello));
        assert_eq!(second, Some(MessageType::FlowMod));
    }

    #[tokio::test(start_paused = true)]
    async fn test_datapath_id_fixed_after_handshake() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert_eq!(events.recv().await, Some(Event::Connected(h.session.id())));

        h.deliver(0, features(0x2)).await;
        h.sync().await;
        assert_eq!(h.session.datapath_id(), Some(0x1));
        assert_eq!(controller.switch(0x1).unwrap().id(), h.session.id());
        assert!(controller.switch(0x2).is_none());

        h.session.close(CloseReason::Requested);
        assert_eq!(h.actor.await.unwrap(), CloseReason::Requested);
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(h.session.id()))
        );
        assert!(controller.switch(0x1).is_none());
        assert!(controller.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_requests_do_not_accumulate() {
        let (controller, timer, mut events) = setup();
        let mut h = Harness::start(&controller, &timer);
        h.handshake(0x1).await;
        assert_eq!(events.recv().await, Some(Event::Connected(h.session.id())));
        assert_eq!(h.session.pending_requests(), 0);

        let bound = Duration::from_millis(1);
        for _ in 0..100 {
            let outcome = h
                .session
                .send(MessageBody::BarrierRequest)
                .wait_timeout(bound)
                .await;
            assert_eq!(outcome, Err(RequestError::Timeout(bound)));
        }
        assert_eq!(h.session.pending_requests(), 0);

        // Dropping a handle without waiting releases it too
        drop(h.session.send(MessageBody::BarrierRequest));
        assert_eq!(h.session.pending_requests(), 0);
    }
}
