//! The queue-based public surface (§6 "Queue surface").
use std::net::SocketAddr;

/// Item delivered on an endpoint's inbound queue.
///
/// `Connected` always precedes any `Payload`, and `Closed` is always the
/// final item, exactly once (§3 invariant 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The endpoint just (re)established a connection.
    Connected,
    /// The endpoint lost its connection and will retry (client/accepted only
    /// while retrying makes sense; accepted endpoints go straight to `Closed`).
    Disconnected,
    /// The endpoint is permanently torn down. Terminal; the queue closes
    /// (its sender is dropped) immediately after.
    Closed,
    /// An application payload, exactly as the peer wrote it.
    Payload(Vec<u8>),
}

/// Handle to a client or accepted endpoint: the two queues the spec calls
/// `{inbound_queue, outbound_queue}`.
///
/// Dropping `outbound` is how a user signals "terminate this endpoint"
/// (§6): the endpoint drains any in-flight write and then transitions to
/// `closed`.
pub struct ClientHandle {
    pub inbound: flume::Receiver<Inbound>,
    pub outbound: flume::Sender<Vec<u8>>,
    /// The address actually connected to, once known. For endpoints handed
    /// out by `accept`, this is the remote peer's address.
    pub peer_addr: SocketAddr,
}

/// Handle to a server (listener) endpoint: the accept queue.
pub struct ServerHandle {
    pub accept: flume::Receiver<ClientHandle>,
    /// The address actually bound, which may differ from the requested one
    /// if port `0` was given.
    pub local_addr: SocketAddr,
}
