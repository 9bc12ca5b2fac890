//! Handshake state and the messages that drive it.
//!
//! A session moves `Connected -> Handshaking -> Established` and ends in
//! `Closed`. The state is shared between the session actor and its handles,
//! so it lives in an atomic that can only move forward.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use ofc_wire::MessageBody;

/// Where a session is in its lifecycle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    /// Transport open, nothing sent yet
    Connected = 0,
    /// HELLO sent, waiting for FEATURES_REPLY
    Handshaking = 1,
    /// Switch identity known and registered with the controller
    Established = 2,
    /// Terminal
    Closed = 3,
}

impl HandshakeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakeState::Connected,
            1 => HandshakeState::Handshaking,
            2 => HandshakeState::Established,
            _ => HandshakeState::Closed,
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Connected => "CONNECTED",
            HandshakeState::Handshaking => "HANDSHAKING",
            HandshakeState::Established => "ESTABLISHED",
            HandshakeState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Forward-only state cell
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Cell in the `Connected` state
    pub fn new() -> Self {
        Self(AtomicU8::new(HandshakeState::Connected as u8))
    }

    /// Current state
    pub fn get(&self) -> HandshakeState {
        HandshakeState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn advance(&self, next: HandshakeState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }

    /// Move to `Closed`, returning the state it was in
    pub fn close(&self) -> HandshakeState {
        HandshakeState::from_u8(self.0.swap(HandshakeState::Closed as u8, Ordering::AcqRel))
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Greeting sent as soon as the transport is up
pub fn hello() -> MessageBody {
    MessageBody::Hello
}

/// Feature negotiation request
pub fn features_request() -> MessageBody {
    MessageBody::FeaturesRequest
}

/// Keepalive probe with an empty payload
pub fn echo_request() -> MessageBody {
    MessageBody::EchoRequest(Bytes::new())
}

/// Answer to a switch's probe, echoing its payload
pub fn echo_reply(payload: Bytes) -> MessageBody {
    MessageBody::EchoReply(payload)
}
