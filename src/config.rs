//! Typed configuration records (§4.5, §9 "dynamic per-endpoint option bag").
//!
//! The distilled spec describes an open map of options; per the design
//! notes we replace it with plain structs. Unknown options are therefore
//! not representable: adding a knob means adding a field.
use std::time::Duration;

/// Default delay between a disconnect and the next connect attempt.
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 1000;
/// Default idle-write interval that triggers a heartbeat frame.
pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 5000;
/// Default declared-length ceiling above which a peer is treated as protocol-violating.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Buffering policy for a user-facing queue.
///
/// Stands in for the distilled spec's "user-supplied queue (any buffering
/// policy)" — see Open Question 2 in `SPEC_FULL.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    Unbounded,
    Bounded(usize),
}

impl Default for QueueCapacity {
    fn default() -> Self {
        QueueCapacity::Unbounded
    }
}

impl QueueCapacity {
    /// Build a channel pair honoring this capacity.
    pub fn channel<T>(self) -> (flume::Sender<T>, flume::Receiver<T>) {
        match self {
            QueueCapacity::Unbounded => flume::unbounded(),
            QueueCapacity::Bounded(n) => flume::bounded(n),
        }
    }
}

/// Options for [`crate::connect`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Buffering policy for the inbound (status + payload) queue.
    pub inbound_queue: QueueCapacity,
    /// Buffering policy for the outbound (payload) queue.
    pub outbound_queue: QueueCapacity,
    /// Delay between a disconnect and the next connect attempt.
    pub reconnect_period: Duration,
    /// Idle-write interval that triggers a heartbeat frame.
    pub heartbeat_period: Duration,
    /// Silent-read duration after which the socket is declared stuck.
    ///
    /// Defaults to four times `heartbeat_period`, as in the distilled spec.
    pub heartbeat_timeout: Duration,
    /// Declared frame body length above which a peer is torn down as a
    /// protocol error (§4.1, §7).
    pub max_frame_len: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let heartbeat_period = Duration::from_millis(DEFAULT_HEARTBEAT_PERIOD_MS);
        Self {
            inbound_queue: QueueCapacity::Unbounded,
            outbound_queue: QueueCapacity::Unbounded,
            reconnect_period: Duration::from_millis(DEFAULT_RECONNECT_PERIOD_MS),
            heartbeat_timeout: heartbeat_period * 4,
            heartbeat_period,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Options for [`crate::accept`].
///
/// There is no `reconnect_period`: accepted endpoints never reconnect
/// (Open Question 1 in `SPEC_FULL.md`).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Buffering policy for the accept queue itself.
    pub accept_queue: QueueCapacity,
    /// Buffering policy applied to every accepted child's inbound queue.
    pub inbound_queue: QueueCapacity,
    /// Buffering policy applied to every accepted child's outbound queue.
    pub outbound_queue: QueueCapacity,
    /// Idle-write interval, inherited by every accepted child.
    pub heartbeat_period: Duration,
    /// Stall threshold, inherited by every accepted child.
    pub heartbeat_timeout: Duration,
    /// Declared frame length ceiling, inherited by every accepted child.
    pub max_frame_len: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let heartbeat_period = Duration::from_millis(DEFAULT_HEARTBEAT_PERIOD_MS);
        Self {
            accept_queue: QueueCapacity::Unbounded,
            inbound_queue: QueueCapacity::Unbounded,
            outbound_queue: QueueCapacity::Unbounded,
            heartbeat_timeout: heartbeat_period * 4,
            heartbeat_period,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}
