//! Cooperative tokio tasks that ferry bytes between the reactor's internal
//! staging channels and the user-facing queues (§4.4, §5).
//!
//! These are the only code that ever touches a user-supplied queue; the
//! reactor thread itself never blocks on one. Each task is small and
//! single-purpose by design, mirroring the "queue bridge" role the spec
//! keeps separate from both the reactor and the public API.
use std::time::Duration;

use crate::net::reactor::{ReactorCommand, Waker};
use crate::net::EndpointId;
use crate::queue::{ClientHandle, Inbound};

/// Forwards payloads from the user's outbound queue into the reactor, and
/// turns idle stretches into heartbeats.
///
/// Waits for a `ready` pulse before polling `outbound` at all: the reactor
/// only sends one once the endpoint is connected and any in-flight frame has
/// drained, so this task can never race ahead of the write side (§4.4).
pub async fn outbound_bridge(
    id: EndpointId,
    outbound: flume::Receiver<Vec<u8>>,
    ready: flume::Receiver<()>,
    heartbeat_period: Duration,
    commands: flume::Sender<ReactorCommand>,
    waker: Waker,
) {
    loop {
        if ready.recv_async().await.is_err() {
            return;
        }

        tokio::select! {
            res = outbound.recv_async() => {
                let (cmd, done) = match res {
                    Ok(payload) => (ReactorCommand::Frame { id, payload }, false),
                    Err(_) => (ReactorCommand::OutboundClosed { id }, true),
                };
                if commands.send_async(cmd).await.is_err() {
                    return;
                }
                let _ = waker.wake();
                if done {
                    return;
                }
            }
            _ = tokio::time::sleep(heartbeat_period) => {
                if commands.send_async(ReactorCommand::Heartbeat { id }).await.is_err() {
                    return;
                }
                let _ = waker.wake();
            }
        }
    }
}

/// Drains the reactor's internal inbound staging channel into the user's
/// actual inbound queue, one item at a time, preserving order.
pub async fn inbound_relay(stage: flume::Receiver<Inbound>, user: flume::Sender<Inbound>) {
    while let Ok(item) = stage.recv_async().await {
        let closed = matches!(item, Inbound::Closed);
        if user.send_async(item).await.is_err() {
            return;
        }
        if closed {
            return;
        }
    }
}

/// Drains accepted connections off a listener's internal staging channel
/// into the user's accept queue, then tells the reactor it may resume
/// accepting (§4.2 "not-accepting").
pub async fn accept_relay(
    id: EndpointId,
    stage: flume::Receiver<ClientHandle>,
    user: flume::Sender<ClientHandle>,
    commands: flume::Sender<ReactorCommand>,
    waker: Waker,
) {
    while let Ok(handle) = stage.recv_async().await {
        let delivered = user.send_async(handle).await.is_ok();
        if commands.send_async(ReactorCommand::AcceptDelivered { id }).await.is_err() {
            return;
        }
        let _ = waker.wake();
        if !delivered {
            // The user dropped their accept queue; keep draining so the
            // listener doesn't wedge in `not-accepting`, but there's no one
            // left to hand connections to.
            continue;
        }
    }
}
