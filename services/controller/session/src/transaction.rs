//! Request/reply correlation by transaction id.
//!
//! Every request-typed message sent on a session registers a [`PendingReply`]
//! under its xid. The receive path removes the entry and fulfils it when the
//! matching reply arrives; session close fails whatever is left. The caller
//! keeps the [`ReplyFuture`] and may await it, bound it with a timeout, or
//! drop it to stop waiting. A handle tied to its registry removes its entry
//! when dropped unfulfilled, so abandoned requests do not accumulate.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ofc_wire::{Message, MessageType};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Why a request did not produce a reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The session was not connected when the message was sent
    #[error("switch not connected")]
    NotConnected,

    /// The session closed while the reply was outstanding
    #[error("session closed before a reply arrived")]
    SessionClosed,

    /// No reply within the caller's bound
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The switch answered with an ERROR message
    #[error("switch reported error (type: {err_type}, code: {code})")]
    PeerError {
        /// Error category
        err_type: u16,
        /// Category specific code
        code: u16,
    },

    /// Another request with the same xid is still in flight
    #[error("transaction {0} already in flight")]
    DuplicateTransaction(u32),

    /// The result was already taken from this handle
    #[error("reply already consumed")]
    Consumed,
}

type ReplySlot = oneshot::Sender<Result<Message, RequestError>>;

/// Registry side of an in-flight request
#[derive(Debug)]
pub struct PendingReply {
    request_type: MessageType,
    slot: ReplySlot,
}

impl PendingReply {
    /// Create the registry entry and the caller's handle for `request`
    pub fn new(request: Message) -> (Self, ReplyFuture) {
        let (slot, rx) = oneshot::channel();
        let pending = Self {
            request_type: request.message_type(),
            slot,
        };
        let future = ReplyFuture {
            request,
            state: ReplyState::Waiting(rx),
            registry: None,
        };
        (pending, future)
    }

    /// Type of the request this entry waits for a reply to
    pub fn request_type(&self) -> MessageType {
        self.request_type
    }

    fn accepts(&self, reply_type: MessageType) -> bool {
        self.request_type.reply_type() == Some(reply_type)
    }

    fn is_abandoned(&self) -> bool {
        self.slot.is_closed()
    }

    fn complete(self, outcome: Result<Message, RequestError>) {
        // The waiter may have given up; that is not an error here
        if self.slot.send(outcome).is_err() {
            debug!("Waiter for {} went away before completion", self.request_type);
        }
    }
}

enum ReplyState {
    Waiting(oneshot::Receiver<Result<Message, RequestError>>),
    Ready(Option<Result<Option<Message>, RequestError>>),
}

/// Caller side of a sent message.
///
/// Resolves to `Ok(Some(reply))` for requests, `Ok(None)` for messages that
/// expect no reply once they are queued for writing, or an error.
pub struct ReplyFuture {
    request: Message,
    state: ReplyState,
    registry: Option<Weak<TransactionRegistry>>,
}

impl ReplyFuture {
    /// Handle that is already complete with `error`
    pub fn failed(request: Message, error: RequestError) -> Self {
        Self {
            request,
            state: ReplyState::Ready(Some(Err(error))),
            registry: None,
        }
    }

    /// Handle for a message that expects no reply
    pub fn sent(request: Message) -> Self {
        Self {
            request,
            state: ReplyState::Ready(Some(Ok(None))),
            registry: None,
        }
    }

    /// Tie this handle to the registry holding its entry.
    ///
    /// Dropping the handle before it completes, including through an
    /// expired [`wait_timeout`](Self::wait_timeout), then removes the entry.
    pub fn with_registry(mut self, registry: &Arc<TransactionRegistry>) -> Self {
        self.registry = Some(Arc::downgrade(registry));
        self
    }

    /// The message that created this handle
    pub fn request(&self) -> &Message {
        &self.request
    }

    /// Transaction id of the request
    pub fn xid(&self) -> u32 {
        self.request.xid
    }

    /// Whether a correlated reply is expected
    pub fn is_request(&self) -> bool {
        self.request.message_type().is_request()
    }

    /// Non-blocking check; returns the outcome once available
    pub fn try_result(&mut self) -> Option<Result<Option<Message>, RequestError>> {
        match &mut self.state {
            ReplyState::Ready(outcome) => outcome.take(),
            ReplyState::Waiting(rx) => match rx.try_recv() {
                Ok(outcome) => {
                    self.state = ReplyState::Ready(None);
                    Some(outcome.map(Some))
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = ReplyState::Ready(None);
                    Some(Err(RequestError::SessionClosed))
                }
            },
        }
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// On timeout the handle is dropped and, if tied to a registry, its entry
    /// released.
    pub async fn wait_timeout(
        self,
        timeout: Duration,
    ) -> Result<Option<Message>, RequestError> {
        match tokio::time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RequestError::Timeout(timeout)),
        }
    }
}

impl Future for ReplyFuture {
    type Output = Result<Option<Message>, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            ReplyState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(RequestError::Consumed)))
            }
            ReplyState::Waiting(rx) => {
                let outcome = match Pin::new(rx).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(outcome)) => outcome.map(Some),
                    // Registry entry dropped without completion
                    Poll::Ready(Err(_)) => Err(RequestError::SessionClosed),
                };
                self.state = ReplyState::Ready(None);
                Poll::Ready(outcome)
            }
        }
    }
}

impl Drop for ReplyFuture {
    fn drop(&mut self) {
        if !matches!(self.state, ReplyState::Waiting(_)) {
            return;
        }
        let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        // Close our receiver first so only our own entry reads as abandoned
        self.state = ReplyState::Ready(None);
        if registry.release(self.request.xid) {
            debug!(
                "Released abandoned {} (xid: {})",
                self.request.message_type(),
                self.request.xid
            );
        }
    }
}

impl std::fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("xid", &self.request.xid)
            .field("type", &self.request.message_type())
            .field("done", &matches!(self.state, ReplyState::Ready(_)))
            .finish()
    }
}

/// Per-session table of in-flight requests
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    pending: DashMap<u32, PendingReply>,
}

impl TransactionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `pending` under `xid` unless that xid is already in flight
    pub fn register(&self, xid: u32, pending: PendingReply) -> bool {
        match self.pending.entry(xid) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(pending);
                true
            }
        }
    }

    /// Remove and fulfil the entry matching `reply`.
    ///
    /// Returns false when nothing is waiting for this xid or the waiting
    /// request expects a different reply type.
    pub fn resolve(&self, reply: Message) -> bool {
        let reply_type = reply.message_type();
        match self
            .pending
            .remove_if(&reply.xid, |_, pending| pending.accepts(reply_type))
        {
            Some((_, pending)) => {
                pending.complete(Ok(reply));
                true
            }
            None => {
                if let Some(pending) = self.pending.get(&reply.xid) {
                    warn!(
                        "Reply type {} does not answer {} (xid: {})",
                        reply_type,
                        pending.request_type(),
                        reply.xid
                    );
                }
                false
            }
        }
    }

    /// Remove and fail the entry for `xid`
    pub fn fail(&self, xid: u32, error: RequestError) -> bool {
        match self.pending.remove(&xid) {
            Some((_, pending)) => {
                pending.complete(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `xid` if its waiter has gone away
    fn release(&self, xid: u32) -> bool {
        self.pending
            .remove_if(&xid, |_, pending| pending.is_abandoned())
            .is_some()
    }

    /// Fail every outstanding entry; returns how many were failed
    pub fn fail_all(&self, error: RequestError) -> usize {
        let xids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        xids.into_iter()
            .filter(|xid| self.fail(*xid, error.clone()))
            .count()
    }

    /// Whether `xid` is in flight
    pub fn contains(&self, xid: u32) -> bool {
        self.pending.contains_key(&xid)
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
