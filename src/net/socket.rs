//! A thin, non-blocking-aware wrapper around a connected TCP stream.
//!
//! The framing state (which bytes of the current read or write belong to
//! which frame) lives on the owning [`crate::endpoint::Endpoint`], per the
//! data model in §3 of the spec; this type only knows how to move bytes in
//! and out of the kernel.
use std::io::{self, Read, Write};
use std::net::TcpStream;

/// A registered peer connection: the live socket the reactor reads and
/// writes non-blocking bytes through.
pub struct Socket {
    stream: TcpStream,
}

impl Socket {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Read available bytes into `buf`. Non-blocking; a `WouldBlock` error
    /// means there is nothing more to read right now.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Write as many bytes from `buf` as the socket currently accepts.
    /// Non-blocking; a `WouldBlock` error means the socket send buffer is full.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    /// Tear down both halves of the connection. Errors (e.g. `ENOTCONN` if
    /// the peer already closed) are expected and safe to ignore.
    pub fn disconnect(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
