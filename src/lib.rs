//! A reliable, message-oriented, bidirectional TCP transport exposed
//! through in-process queues.
//!
//! Call [`event_loop`] once to start the reactor, then [`Reactor::connect`]
//! or [`Reactor::accept`] any number of times to open endpoints. Each
//! endpoint hands back a pair of [`flume`] queues: `inbound` carries status
//! events and payloads, `outbound` carries payloads the other side should
//! write. Dropping an endpoint's outbound sender closes it. Call
//! [`Reactor::shutdown`] to stop the reactor and join its I/O thread.
//!
//! TLS, a handshake, compression, cross-reconnect ordering, application-level
//! acknowledgement, and peer-negotiated backpressure are all out of scope —
//! see the crate's design notes for the reasoning.
mod bridge;
mod config;
mod endpoint;
mod error;
mod frame;
mod net;
mod queue;

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

pub use config::{ClientOptions, QueueCapacity, ServerOptions};
pub use error::Error;
pub use queue::{ClientHandle, Inbound, ServerHandle};

use net::reactor::{Core, ReactorCommand, Waker};
use net::EndpointId;

/// A running reactor: one dedicated OS thread driving non-blocking I/O, plus
/// a small cooperative `tokio` runtime driving the queue-bridge tasks that
/// ferry bytes to and from user code (§5 of the design notes).
pub struct Reactor {
    commands: flume::Sender<ReactorCommand>,
    waker: Waker,
    rt: Option<tokio::runtime::Runtime>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Start the reactor. Spawns the I/O thread and the bridge runtime; returns
/// once both are up and listening for commands.
pub fn event_loop() -> std::io::Result<Reactor> {
    let (commands_tx, commands_rx) = flume::unbounded();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .thread_name("wireq-bridge")
        .build()?;
    let rt_handle = rt.handle().clone();

    let (core, waker) = Core::new(commands_rx, commands_tx.clone(), rt_handle)?;

    let thread = thread::Builder::new()
        .name("wireq-reactor".into())
        .spawn(move || core.run())?;

    Ok(Reactor {
        commands: commands_tx,
        waker,
        rt: Some(rt),
        thread: Some(thread),
    })
}

impl Reactor {
    /// Open a client endpoint that dials `addr`, reconnecting on
    /// `opts.reconnect_period` after every disconnect until [`Reactor::shutdown`].
    ///
    /// Never blocks and never fails synchronously: a dial failure is
    /// reported on the returned handle's inbound queue, like any other
    /// disconnect (§7).
    pub fn connect(&self, addr: SocketAddr, opts: ClientOptions) -> ClientHandle {
        let id = EndpointId::next();
        let heartbeat_period = opts.heartbeat_period;

        let (stage_tx, stage_rx) = flume::unbounded::<Inbound>();
        let (user_inbound_tx, user_inbound_rx) = opts.inbound_queue.channel::<Inbound>();
        let (user_outbound_tx, user_outbound_rx) = opts.outbound_queue.channel::<Vec<u8>>();
        let (ready_tx, ready_rx) = flume::bounded::<()>(1);

        if let Some(rt) = &self.rt {
            rt.spawn(bridge::inbound_relay(stage_rx, user_inbound_tx));
            rt.spawn(bridge::outbound_bridge(
                id,
                user_outbound_rx,
                ready_rx,
                heartbeat_period,
                self.commands.clone(),
                self.waker.clone(),
            ));
        }

        let _ = self.commands.send(ReactorCommand::AddClient {
            id,
            addr,
            opts,
            inbound_stage: stage_tx,
            ready: ready_tx,
        });
        let _ = self.waker.wake();

        ClientHandle {
            inbound: user_inbound_rx,
            outbound: user_outbound_tx,
            peer_addr: addr,
        }
    }

    /// Bind a listener at `addr` and start accepting. Bind failure is
    /// surfaced synchronously, the one exception to "no error crosses a
    /// queue" (§7): there is no endpoint yet to carry it in-band.
    pub fn accept(&self, addr: SocketAddr, opts: ServerOptions) -> Result<ServerHandle, Error> {
        let listener = net::reactor::listen(addr)?;
        let local_addr = listener.local_addr()?;
        let id = EndpointId::next();

        let (stage_tx, stage_rx) = flume::unbounded::<ClientHandle>();
        let (user_accept_tx, user_accept_rx) = opts.accept_queue.channel::<ClientHandle>();

        if let Some(rt) = &self.rt {
            rt.spawn(bridge::accept_relay(
                id,
                stage_rx,
                user_accept_tx,
                self.commands.clone(),
                self.waker.clone(),
            ));
        }

        self.commands
            .send(ReactorCommand::AddListener { id, listener, opts, accept_stage: stage_tx })
            .map_err(|_| Error::ReactorGone)?;
        self.waker.wake()?;

        Ok(ServerHandle { accept: user_accept_rx, local_addr })
    }

    /// Stop the reactor: every endpoint is torn down (closed, not
    /// disconnected-and-retrying), the I/O thread is joined, and the bridge
    /// runtime is shut down. Synchronous: returns once the I/O thread has
    /// actually exited.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(ReactorCommand::Shutdown);
        let _ = self.waker.wake();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(rt) = self.rt.take() {
            rt.shutdown_timeout(Duration::from_secs(1));
        }
    }
}
