//! Poll-based reactor. A single dedicated thread runs this loop; everything
//! else (user code, queue-bridge tasks) reaches it only through
//! [`ReactorCommand`] plus a selector wakeup (§4.3, §5).
use std::collections::HashMap;
use std::io;
use std::net::{self, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::config::{ClientOptions, ServerOptions};
use crate::endpoint::{ConnectionState, Listener, Peer, ReadState, WriteState};
use crate::frame;
use crate::net::socket::Socket;
use crate::net::time::TimeoutManager;
use crate::net::{EndpointId, Link, Source};
use crate::queue::{ClientHandle, Inbound};

/// Maximum time the selector blocks per iteration (§4.3 step 3).
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);
/// Read buffer size per readiness event.
const READ_BUFFER_SIZE: usize = 64 * 1024;
/// Listen backlog passed to the kernel.
const LISTEN_BACKLOG: i32 = 128;

/// A clonable handle that wakes the reactor's selector wait.
///
/// Every queue-bridge task holds one: it is the "notify" primitive called
/// out in the design notes, replacing a watched reference with an explicit
/// wakeup.
#[derive(Clone)]
pub struct Waker(Arc<popol::Waker>);

impl Waker {
    fn new(sources: &mut popol::Sources<Source>) -> io::Result<Self> {
        Ok(Self(Arc::new(popol::Waker::new(sources, Source::Waker)?)))
    }

    pub fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}

/// Messages the queue bridge (and the public API) send into the reactor.
/// Draining this channel after a waker event is the reactor's only way of
/// learning about new endpoints or queue activity (§5 "Shared resources").
pub enum ReactorCommand {
    /// Register a new client endpoint; the reactor dials it on its next
    /// housekeeping pass.
    AddClient {
        id: EndpointId,
        addr: SocketAddr,
        opts: ClientOptions,
        inbound_stage: flume::Sender<Inbound>,
        ready: flume::Sender<()>,
    },
    /// Register an already-bound listener.
    AddListener {
        id: EndpointId,
        listener: TcpListener,
        opts: ServerOptions,
        accept_stage: flume::Sender<ClientHandle>,
    },
    /// The bridge dequeued a payload; frame it and send it.
    Frame { id: EndpointId, payload: Vec<u8> },
    /// The bridge's heartbeat timer fired before the outbound queue produced
    /// anything.
    Heartbeat { id: EndpointId },
    /// The bridge observed the outbound queue close.
    OutboundClosed { id: EndpointId },
    /// The accept-relay task finished delivering (or discarding) a handle;
    /// the listener may resume accepting.
    AcceptDelivered { id: EndpointId },
    /// Stop the loop after this pass.
    Shutdown,
}

/// Why a peer's socket was torn down. Only affects the log level and
/// whether we schedule a reconnect (§7).
enum TeardownReason {
    DialError,
    ConnectionError,
    Stall,
    UserClosed,
    Shutdown,
}

/// The single-threaded, non-blocking I/O loop (§4.3).
pub struct Core {
    peers: HashMap<EndpointId, Peer>,
    listeners: HashMap<EndpointId, Listener>,
    sources: popol::Sources<Source>,
    waker: Waker,
    reconnects: TimeoutManager<EndpointId>,
    commands: flume::Receiver<ReactorCommand>,
    /// A sender the reactor hands out to bridge tasks it spawns itself
    /// (accepted connections never go through the public `connect`/`accept`
    /// call sites, so they need their own route back in).
    commands_tx: flume::Sender<ReactorCommand>,
    /// Handle into the small cooperative runtime the bridge tasks run on
    /// (§5): used only to spawn the two tasks an accepted connection needs.
    rt: tokio::runtime::Handle,
    running: bool,
}

impl Core {
    pub fn new(
        commands: flume::Receiver<ReactorCommand>,
        commands_tx: flume::Sender<ReactorCommand>,
        rt: tokio::runtime::Handle,
    ) -> io::Result<(Self, Waker)> {
        let mut sources = popol::Sources::new();
        let waker = Waker::new(&mut sources)?;

        Ok((
            Self {
                peers: HashMap::new(),
                listeners: HashMap::new(),
                sources,
                waker: waker.clone(),
                reconnects: TimeoutManager::new(),
                commands,
                commands_tx,
                rt,
                running: true,
            },
            waker,
        ))
    }

    /// Run the loop until [`ReactorCommand::Shutdown`] is processed.
    pub fn run(mut self) {
        let mut events = Vec::with_capacity(32);

        while self.running {
            self.housekeeping();

            let now = Instant::now();
            let wait = self
                .reconnects
                .next(now)
                .map(|d| d.min(WAIT_TIMEOUT))
                .unwrap_or(WAIT_TIMEOUT);

            match self.sources.wait_timeout(&mut events, wait) {
                Ok(_n) => self.dispatch(&mut events),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => error!(target: "net", "selector wait failed: {}", e),
            }
            events.clear();
        }

        self.teardown_all();
    }

    fn dispatch(&mut self, events: &mut Vec<popol::Event<Source>>) {
        trace!("woke up with {} source(s) ready", events.len());

        for event in events.drain(..) {
            match event.key {
                Source::Peer(id) => self.handle_peer_event(id, &event),
                Source::Listener(id) => self.handle_listener_event(id),
                Source::Waker => {
                    popol::Waker::reset(event.source).ok();
                    self.drain_commands();
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                ReactorCommand::AddClient { id, addr, opts, inbound_stage, ready } => {
                    self.add_client(id, addr, opts, inbound_stage, ready);
                }
                ReactorCommand::AddListener { id, listener, opts, accept_stage } => {
                    self.add_listener(id, listener, opts, accept_stage);
                }
                ReactorCommand::Frame { id, payload } => self.install_frame(id, payload),
                ReactorCommand::Heartbeat { id } => self.install_heartbeat(id),
                ReactorCommand::OutboundClosed { id } => self.mark_closing(id),
                ReactorCommand::AcceptDelivered { id } => self.resume_accepting(id),
                ReactorCommand::Shutdown => self.running = false,
            }
        }
    }

    // -- endpoint setup ----------------------------------------------------

    fn add_client(
        &mut self,
        id: EndpointId,
        addr: SocketAddr,
        opts: ClientOptions,
        inbound_stage: flume::Sender<Inbound>,
        ready: flume::Sender<()>,
    ) {
        let peer = Peer {
            id,
            link: Link::Outbound,
            addr: Some(addr),
            state: ConnectionState::Connecting,
            socket: None,
            read: ReadState::default(),
            write: None,
            last_read: None,
            reconnect_at: None,
            reconnect_period: opts.reconnect_period,
            heartbeat_period: opts.heartbeat_period,
            heartbeat_timeout: opts.heartbeat_timeout,
            max_frame_len: opts.max_frame_len,
            inbound_stage,
            ready: Some(ready),
            closing: false,
        };
        self.peers.insert(id, peer);
    }

    fn add_listener(
        &mut self,
        id: EndpointId,
        listener: TcpListener,
        opts: ServerOptions,
        accept_stage: flume::Sender<ClientHandle>,
    ) {
        let addr = listener.local_addr().unwrap_or_else(|_| ([0, 0, 0, 0], 0).into());

        self.sources
            .register(Source::Listener(id), &listener, popol::interest::READ);

        self.listeners.insert(
            id,
            Listener {
                id,
                state: ConnectionState::Accepting,
                socket: Some(listener),
                addr,
                heartbeat_period: opts.heartbeat_period,
                heartbeat_timeout: opts.heartbeat_timeout,
                max_frame_len: opts.max_frame_len,
                inbound_queue: opts.inbound_queue,
                outbound_queue: opts.outbound_queue,
                accept_stage,
            },
        );
    }

    fn install_frame(&mut self, id: EndpointId, payload: Vec<u8>) {
        let Some(peer) = self.peers.get_mut(&id) else { return };
        match frame::encode(&payload, peer.max_frame_len) {
            Ok(framed) => {
                peer.write = Some(WriteState::new(framed));
                if let Some(source) = self.sources.get_mut(&Source::Peer(id)) {
                    source.set(popol::interest::WRITE);
                }
            }
            Err(err) => {
                error!(target: "net", "{}: refusing to send oversized payload: {}", id, err);
                if let Some(ready) = &peer.ready {
                    let _ = ready.try_send(());
                }
            }
        }
    }

    fn install_heartbeat(&mut self, id: EndpointId) {
        let Some(peer) = self.peers.get_mut(&id) else { return };
        peer.write = Some(WriteState::new(frame::encode_heartbeat().to_vec()));
        if let Some(source) = self.sources.get_mut(&Source::Peer(id)) {
            source.set(popol::interest::WRITE);
        }
    }

    /// The bridge reported the outbound queue closed. If the endpoint is
    /// idle, close it now; otherwise let the in-flight write drain first
    /// (`handle_writable` checks this by re-reading `peer.closing`).
    fn mark_closing(&mut self, id: EndpointId) {
        let Some(peer) = self.peers.get_mut(&id) else { return };
        peer.ready = None;
        if peer.write.is_none() {
            self.teardown_peer(id, TeardownReason::UserClosed);
        } else {
            peer.closing = true;
        }
    }

    fn resume_accepting(&mut self, id: EndpointId) {
        let Some(listener) = self.listeners.get_mut(&id) else { return };
        if listener.state != ConnectionState::NotAccepting {
            return;
        }
        listener.state = ConnectionState::Accepting;
        if let Some(source) = self.sources.get_mut(&Source::Listener(id)) {
            source.set(popol::interest::READ);
        }
    }

    // -- housekeeping (§4.3 step 1) -----------------------------------------

    fn housekeeping(&mut self) {
        let now = Instant::now();

        let due_reconnects: Vec<EndpointId> = self
            .peers
            .iter()
            .filter(|(_, p)| {
                p.is_client()
                    && p.state == ConnectionState::Disconnected
                    && p.reconnect_at.map_or(false, |at| at <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in due_reconnects {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.state = ConnectionState::Connecting;
                peer.reconnect_at = None;
            }
            self.reconnects.unregister(&id);
        }

        let pending_dial: Vec<EndpointId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_client() && p.state == ConnectionState::Connecting && p.socket.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in pending_dial {
            self.dial_peer(id);
        }

        let stalled: Vec<EndpointId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.state == ConnectionState::Connected)
            .filter(|(_, p)| p.last_read.map_or(false, |t| now.duration_since(t) >= p.heartbeat_timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in stalled {
            self.teardown_peer(id, TeardownReason::Stall);
        }

        let closed_peers: Vec<EndpointId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.state == ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in closed_peers {
            if let Some(peer) = self.peers.remove(&id) {
                let _ = peer.inbound_stage.send(Inbound::Closed);
            }
        }

        let closed_listeners: Vec<EndpointId> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.state == ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in closed_listeners {
            self.listeners.remove(&id);
        }
    }

    fn dial_peer(&mut self, id: EndpointId) {
        let Some(addr) = self.peers.get(&id).and_then(|p| p.addr) else { return };

        match dial(&addr) {
            Ok(stream) => {
                self.sources.register(Source::Peer(id), &stream, popol::interest::ALL);

                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.socket = Some(Socket::new(stream));
                }
                trace!(target: "net", "{}: dialing {}", id, addr);
            }
            Err(err) => {
                debug!(target: "net", "{}: dial error: {}", id, err);
                self.teardown_peer(id, TeardownReason::DialError);
            }
        }
    }

    // -- dispatch (§4.3 step 4) ---------------------------------------------

    fn handle_peer_event(&mut self, id: EndpointId, event: &popol::Event<Source>) {
        let Some(peer) = self.peers.get(&id) else { return };

        if event.is_error() || event.is_hangup() {
            trace!(target: "net", "{}: socket error signalled, deferring to read/write", id);
        }
        if event.is_invalid() {
            error!(target: "net", "{}: socket is invalid, removing", id);
            self.sources.unregister(&Source::Peer(id));
            return;
        }

        if peer.state == ConnectionState::Connecting {
            if event.is_writable() {
                self.handle_connect_complete(id);
            }
            return;
        }

        if event.is_writable() {
            self.handle_writable(id);
        }
        if event.is_readable() {
            self.handle_readable(id);
        }
    }

    /// A socket that is connecting asynchronously becomes writable exactly
    /// once a connection is established (POSIX). We don't probe `SO_ERROR`
    /// beyond that: a connection that was in fact refused surfaces as an
    /// ordinary read/write error on the next event, same as any other drop.
    fn handle_connect_complete(&mut self, id: EndpointId) {
        self.announce_connected(id);

        let keep_write = self.peers.get(&id).map_or(false, |p| p.write.is_some());
        if !keep_write {
            if let Some(source) = self.sources.get_mut(&Source::Peer(id)) {
                source.unset(popol::interest::WRITE);
            }
        }
    }

    fn handle_readable(&mut self, id: EndpointId) {
        let Some(peer) = self.peers.get_mut(&id) else { return };
        let max_frame_len = peer.max_frame_len;
        let Some(socket) = peer.socket.as_mut() else { return };

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut completed = Vec::new();
        let mut outcome: io::Result<()> = Ok(());

        loop {
            match socket.read(&mut buf) {
                Ok(0) => {
                    outcome = Err(io::Error::from(io::ErrorKind::ConnectionReset));
                    break;
                }
                Ok(n) => {
                    peer.last_read = Some(Instant::now());
                    if let Err(e) = peer.read.ingest(&buf[..n], max_frame_len, &mut completed) {
                        outcome = Err(e);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        for payload in completed {
            let _ = peer.inbound_stage.send(Inbound::Payload(payload));
        }

        if let Err(err) = outcome {
            trace!(target: "net", "{}: read error: {}", id, err);
            self.teardown_peer(id, TeardownReason::ConnectionError);
        }
    }

    fn handle_writable(&mut self, id: EndpointId) {
        let Some(peer) = self.peers.get_mut(&id) else { return };
        let Some(write) = peer.write.as_mut() else { return };
        let socket = match peer.socket.as_mut() {
            Some(s) => s,
            None => return,
        };

        let mut outcome: io::Result<()> = Ok(());
        loop {
            let remaining = write.remaining();
            if remaining.is_empty() {
                break;
            }
            match socket.write(remaining) {
                Ok(0) => {
                    outcome = Err(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => write.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Err(err) = outcome {
            trace!(target: "net", "{}: write error: {}", id, err);
            self.teardown_peer(id, TeardownReason::ConnectionError);
            return;
        }

        // Fully drained.
        peer.write = None;
        if peer.closing {
            self.teardown_peer(id, TeardownReason::UserClosed);
            return;
        }

        if let Some(source) = self.sources.get_mut(&Source::Peer(id)) {
            source.unset(popol::interest::WRITE);
        }
        if let Some(ready) = &peer.ready {
            let _ = ready.try_send(());
        }
    }

    fn handle_listener_event(&mut self, id: EndpointId) {
        let Some(listener) = self.listeners.get(&id) else { return };
        if listener.state != ConnectionState::Accepting {
            return;
        }
        let Some(tcp_listener) = listener.socket.as_ref() else { return };

        match tcp_listener.accept() {
            Ok((conn, remote_addr)) => {
                if let Err(err) = conn.set_nonblocking(true) {
                    error!(target: "net", "{}: failed to configure accepted socket: {}", id, err);
                    return;
                }
                self.spawn_accepted(id, conn, remote_addr);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => error!(target: "net", "{}: accept error: {}", id, e),
        }
    }

    fn spawn_accepted(&mut self, listener_id: EndpointId, conn: TcpStream, remote_addr: SocketAddr) {
        let Some((heartbeat_period, heartbeat_timeout, max_frame_len, inbound_queue, outbound_queue, accept_stage)) =
            self.listeners.get(&listener_id).map(|l| {
                (
                    l.heartbeat_period,
                    l.heartbeat_timeout,
                    l.max_frame_len,
                    l.inbound_queue,
                    l.outbound_queue,
                    l.accept_stage.clone(),
                )
            })
        else {
            return;
        };

        let child_id = EndpointId::next();

        self.sources
            .register(Source::Peer(child_id), &conn, popol::interest::READ);

        let (stage_tx, stage_rx) = flume::unbounded::<Inbound>();
        let (user_inbound_tx, user_inbound_rx) = inbound_queue.channel::<Inbound>();
        let (user_outbound_tx, user_outbound_rx) = outbound_queue.channel::<Vec<u8>>();
        let (ready_tx, ready_rx) = flume::bounded::<()>(1);

        self.peers.insert(
            child_id,
            Peer {
                id: child_id,
                link: Link::Inbound,
                addr: None,
                state: ConnectionState::Connected,
                socket: Some(Socket::new(conn)),
                read: ReadState::default(),
                write: None,
                last_read: None,
                reconnect_at: None,
                reconnect_period: Duration::ZERO,
                heartbeat_period,
                heartbeat_timeout,
                max_frame_len,
                inbound_stage: stage_tx,
                ready: Some(ready_tx),
                closing: false,
            },
        );
        self.announce_connected(child_id);

        self.rt.spawn(crate::bridge::inbound_relay(stage_rx, user_inbound_tx));
        self.rt.spawn(crate::bridge::outbound_bridge(
            child_id,
            user_outbound_rx,
            ready_rx,
            heartbeat_period,
            self.commands_tx.clone(),
            self.waker.clone(),
        ));

        let handle = ClientHandle {
            inbound: user_inbound_rx,
            outbound: user_outbound_tx,
            peer_addr: remote_addr,
        };
        let _ = accept_stage.send(handle);

        if let Some(listener) = self.listeners.get_mut(&listener_id) {
            listener.state = ConnectionState::NotAccepting;
        }
        if let Some(source) = self.sources.get_mut(&Source::Listener(listener_id)) {
            source.unset(popol::interest::READ);
        }
    }

    fn announce_connected(&mut self, id: EndpointId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.state = ConnectionState::Connected;
            peer.last_read = Some(Instant::now());
            peer.read = ReadState::default();
            let _ = peer.inbound_stage.send(Inbound::Connected);
            if peer.write.is_none() {
                if let Some(ready) = &peer.ready {
                    let _ = ready.try_send(());
                }
            }
        }
    }

    fn teardown_peer(&mut self, id: EndpointId, reason: TeardownReason) {
        let Some(peer) = self.peers.get_mut(&id) else { return };

        if let Some(socket) = peer.socket.take() {
            let _ = socket.disconnect();
        }
        self.sources.unregister(&Source::Peer(id));

        let terminal = matches!(reason, TeardownReason::UserClosed | TeardownReason::Shutdown)
            || peer.link == Link::Inbound;

        match reason {
            TeardownReason::DialError => debug!(target: "net", "{}: dial error", id),
            TeardownReason::ConnectionError => debug!(target: "net", "{}: connection error", id),
            TeardownReason::Stall => {
                error!(target: "net", "{}: stalled, no bytes read within heartbeat timeout", id)
            }
            TeardownReason::UserClosed => trace!(target: "net", "{}: outbound queue closed", id),
            TeardownReason::Shutdown => trace!(target: "net", "{}: reactor shutting down", id),
        }

        if terminal {
            peer.state = ConnectionState::Closed;
            peer.ready = None;
            self.reconnects.unregister(&id);
        } else {
            peer.state = ConnectionState::Disconnected;
            let _ = peer.inbound_stage.send(Inbound::Disconnected);
            peer.read = ReadState::default();
            if let Some(write) = peer.write.as_mut() {
                write.rewind();
            }
            let at = Instant::now() + peer.reconnect_period;
            peer.reconnect_at = Some(at);
            self.reconnects.register(id, at);
        }
    }

    fn teardown_all(&mut self) {
        let peer_ids: Vec<EndpointId> = self.peers.keys().copied().collect();
        for id in peer_ids {
            self.teardown_peer(id, TeardownReason::Shutdown);
            if let Some(peer) = self.peers.remove(&id) {
                let _ = peer.inbound_stage.send(Inbound::Closed);
            }
        }

        for (_, listener) in self.listeners.drain() {
            if let Some(socket) = listener.socket {
                drop(socket);
            }
        }
    }
}

/// Connect to a peer, completing non-blocking. Callers discover success or
/// failure via a later writable readiness event (§4.3 "Connectable").
fn dial(addr: &SocketAddr) -> io::Result<TcpStream> {
    use socket2::{Domain, Socket, Type};

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let sock = Socket::new(domain, Type::STREAM, None)?;
    sock.set_nonblocking(true)?;

    match sock.connect(&(*addr).into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(sock.into())
}

/// Bind a listening socket, non-blocking, with address-reuse set so a rebind
/// to the same port succeeds while a prior connection through it lingers in
/// `TIME_WAIT` (§6).
pub(crate) fn listen<A: net::ToSocketAddrs>(addr: A) -> io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket address to bind"))?;

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let sock = Socket::new(domain, Type::STREAM, None)?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.listen(LISTEN_BACKLOG)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}
