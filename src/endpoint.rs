//! Per-endpoint state: the connection state machine (§4.2) and the framing
//! buffers it carries (§3).
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use crate::frame;
use crate::net::socket::Socket;
use crate::net::{EndpointId, Link};
use crate::queue::{ClientHandle, Inbound};

/// Connection lifecycle states (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Accepting,
    NotAccepting,
    Closed,
}

/// Read framing state: exactly one of "waiting for the 4-byte header" or
/// "waiting for the declared-length body" (§3 invariant 2).
pub enum ReadState {
    Header {
        buf: [u8; frame::HEADER_LEN],
        filled: usize,
    },
    Body {
        declared_len: u32,
        buf: Vec<u8>,
        filled: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header { buf: [0; frame::HEADER_LEN], filled: 0 }
    }
}

impl ReadState {
    /// Feed freshly-read bytes through the header/body state machine,
    /// appending every fully-decoded payload to `out`. A zero-length frame
    /// (heartbeat) is consumed silently and never appended.
    ///
    /// `bytes` may contain any number of frames, partial or complete; this
    /// carries state across calls via `self` so a frame split across reads
    /// resumes correctly (§3 invariant 2).
    pub fn ingest(&mut self, mut bytes: &[u8], max_frame_len: u32, out: &mut Vec<Vec<u8>>) -> std::io::Result<()> {
        while !bytes.is_empty() {
            match self {
                ReadState::Header { buf, filled } => {
                    let need = frame::HEADER_LEN - *filled;
                    let take = need.min(bytes.len());
                    buf[*filled..*filled + take].copy_from_slice(&bytes[..take]);
                    *filled += take;
                    bytes = &bytes[take..];

                    if *filled < frame::HEADER_LEN {
                        continue;
                    }
                    let len = frame::decode_header(*buf);
                    if len == 0 {
                        *filled = 0;
                        continue;
                    }
                    frame::check_declared_len(len, max_frame_len)?;
                    *self = ReadState::Body { declared_len: len, buf: vec![0u8; len as usize], filled: 0 };
                }
                ReadState::Body { declared_len, buf, filled } => {
                    let need = *declared_len as usize - *filled;
                    let take = need.min(bytes.len());
                    buf[*filled..*filled + take].copy_from_slice(&bytes[..take]);
                    *filled += take;
                    bytes = &bytes[take..];

                    if *filled < *declared_len as usize {
                        continue;
                    }
                    let complete = std::mem::take(buf);
                    *self = ReadState::Header { buf: [0; frame::HEADER_LEN], filled: 0 };
                    out.push(complete);
                }
            }
        }
        Ok(())
    }
}

/// Write framing state: an in-flight frame plus how much of it has already
/// reached the kernel.
///
/// `sent` is rewound to `0` (not drained) on disconnect, so a reconnect
/// retransmits the whole frame from its start (§4.2 "Tie-breaks").
pub struct WriteState {
    frame: Vec<u8>,
    sent: usize,
}

impl WriteState {
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame, sent: 0 }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.frame[self.sent..]
    }

    pub fn advance(&mut self, n: usize) {
        self.sent += n;
    }

    pub fn is_drained(&self) -> bool {
        self.sent >= self.frame.len()
    }

    pub fn rewind(&mut self) {
        self.sent = 0;
    }
}

/// A client or accepted endpoint: a connected (or reconnecting) peer with a
/// byte stream framed into messages.
pub struct Peer {
    pub id: EndpointId,
    pub link: Link,
    /// The dial target, for client endpoints; `None` for accepted ones,
    /// which never reconnect (§3).
    pub addr: Option<SocketAddr>,
    pub state: ConnectionState,
    pub socket: Option<Socket>,
    pub read: ReadState,
    pub write: Option<WriteState>,
    pub last_read: Option<Instant>,
    pub reconnect_at: Option<Instant>,
    pub reconnect_period: Duration,
    pub heartbeat_period: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_len: u32,
    /// Non-blocking relay into the inbound-queue bridge task (§4.4).
    pub inbound_stage: flume::Sender<Inbound>,
    /// Pulse sent to the outbound bridge task when the endpoint is ready
    /// for the next frame (first connect, or after the current one drains).
    /// `None` once the bridge has reported the outbound queue closed.
    pub ready: Option<flume::Sender<()>>,
    /// Set once the bridge reports the outbound queue closed while a write
    /// was still in flight: the endpoint closes as soon as that write drains
    /// instead of requesting another frame.
    pub closing: bool,
}

impl Peer {
    pub fn is_client(&self) -> bool {
        self.addr.is_some()
    }
}

/// A server (listener) endpoint.
pub struct Listener {
    pub id: EndpointId,
    pub state: ConnectionState,
    pub socket: Option<TcpListener>,
    pub addr: SocketAddr,
    pub heartbeat_period: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_len: u32,
    pub inbound_queue: crate::config::QueueCapacity,
    pub outbound_queue: crate::config::QueueCapacity,
    /// Non-blocking relay into the accept-queue bridge task (§4.4).
    pub accept_stage: flume::Sender<ClientHandle>,
}
