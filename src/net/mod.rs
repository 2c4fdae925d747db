//! Low-level networking primitives shared between the reactor and the socket wrapper.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod reactor;
pub mod socket;
pub mod time;

pub use reactor::{ReactorCommand, Waker};

/// Opaque identity of an endpoint, stable for its whole lifetime. Used for
/// logging and as the key into the reactor's endpoint table and selector
/// sources; it carries no addressing information of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic source of [`EndpointId`]s, shared by every reactor instance.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl EndpointId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Selector source key: which kind of readiness a `popol` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Peer(EndpointId),
    Listener(EndpointId),
    Waker,
}

/// Whether an endpoint was dialed by us or handed to us by a listener.
///
/// Only [`Link::Outbound`] endpoints carry a reconnect policy: an accepted
/// endpoint that loses its socket is gone for good (§3, §4.2 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Inbound,
    Outbound,
}
