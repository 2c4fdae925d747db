//! Errors surfaced synchronously at the public API boundary.
//!
//! Everything that happens *after* an endpoint exists is reported in-band on
//! its inbound queue as a status event (§7 of the spec) rather than through
//! a `Result`. The error type here only covers the setup failures that have
//! no endpoint, and therefore no queue, to report through yet.
use std::io;

use thiserror::Error;

/// An error occurring while setting up the reactor or one of its endpoints.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error, typically from binding a listener or resolving an address.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The reactor's command channel is gone; the I/O thread has exited.
    #[error("reactor is shut down")]
    ReactorGone,
}
