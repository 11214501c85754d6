//! Caller-side transport seams.
//!
//! The wire protocol is not part of this workspace. A transport hands the
//! service a `CallContext` per in-flight call: a `Peer` that resolves the
//! remote caller's credentials, and a single-use `Reply`.

use std::fmt;

use crate::error::GrantError;
use crate::identity::{Pid, Uid};

/// Successful reply payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    Unit,
    Int(i64),
}

/// What a caller eventually receives
pub type ReplyResult = Result<ReplyValue, GrantError>;

/// The remote peer of one call.
///
/// Resolution failures are transport errors and are forwarded to the caller
/// unchanged.
pub trait Peer: Send {
    /// Transport-level sender name
    fn sender(&self) -> &str;

    /// Whether the call arrived through the remote-call channel at all
    fn is_remote(&self) -> bool;

    fn pid(&self) -> Result<Pid, GrantError>;

    fn uid(&self) -> Result<Uid, GrantError>;

    /// Whether the caller's message permits interactive authorization
    fn allows_interactive_authorization(&self) -> bool;
}

/// Deferred-reply channel supplied by the transport
pub trait ReplyChannel: Send {
    fn deliver(self: Box<Self>, reply: ReplyResult);

    /// False once the caller is known to have gone away
    fn is_open(&self) -> bool {
        true
    }
}

impl<F> ReplyChannel for F
where
    F: FnOnce(ReplyResult) + Send,
{
    fn deliver(self: Box<Self>, reply: ReplyResult) {
        (*self)(reply)
    }
}

/// Single-use reply handle; sending consumes it.
pub struct Reply {
    channel: Box<dyn ReplyChannel>,
}

impl Reply {
    pub fn new<C: ReplyChannel + 'static>(channel: C) -> Self {
        Self { channel: Box::new(channel) }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn send(self, reply: ReplyResult) {
        self.channel.deliver(reply);
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("open", &self.is_open()).finish()
    }
}

/// One in-flight call
pub struct CallContext {
    peer: Box<dyn Peer>,
    reply: Reply,
}

impl CallContext {
    pub fn new<P: Peer + 'static>(peer: P, reply: Reply) -> Self {
        Self {
            peer: Box::new(peer),
            reply,
        }
    }

    pub fn peer(&self) -> &dyn Peer {
        self.peer.as_ref()
    }

    pub fn send_reply(self, value: ReplyValue) {
        self.reply.send(Ok(value));
    }

    pub fn send_error(self, err: GrantError) {
        self.reply.send(Err(err));
    }

    pub fn into_saved(self) -> SavedContext {
        SavedContext { call: Some(self) }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("sender", &self.peer.sender())
            .field("remote", &self.peer.is_remote())
            .field("reply", &self.reply)
            .finish()
    }
}

/// A call context held across the authorization round trip.
///
/// Detached contexts (no originating call) swallow replies.
#[derive(Debug, Default)]
pub struct SavedContext {
    call: Option<CallContext>,
}

impl SavedContext {
    pub fn detached() -> Self {
        Self { call: None }
    }

    pub fn peer(&self) -> Option<&dyn Peer> {
        self.call.as_ref().map(|c| c.peer())
    }

    pub fn is_detached(&self) -> bool {
        self.call.is_none()
    }

    /// False when detached or the caller is known gone
    pub fn reply_open(&self) -> bool {
        self.call.as_ref().is_some_and(|c| c.reply.is_open())
    }

    pub fn send_reply(self, value: ReplyValue) {
        if let Some(call) = self.call {
            call.send_reply(value);
        }
    }

    pub fn send_error(self, err: GrantError) {
        match self.call {
            Some(call) => call.send_error(err),
            None => tracing::debug!(error = %err, "reply dropped on detached context"),
        }
    }
}
