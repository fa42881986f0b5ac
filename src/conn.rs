// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-connection state: a small state machine around a socket and its two
//! [`SegmentedBuffer`]s, mirroring the source's `TcpConnection` but without
//! its own thread — the event loop in [`crate::server`] drives it.

use crate::resp::{self, RespValue};
use crate::segment::SegmentPool;
use crate::segmented_buffer::SegmentedBuffer;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialised,
    Initialised,
    OwnerSet,
    Running,
    StopRequested,
    Stopped,
}

/// A single client connection's socket, buffers, and close bookkeeping.
pub struct Connection {
    pub state: ConnectionState,
    socket: TcpStream,
    incoming: SegmentedBuffer,
    outgoing: SegmentedBuffer,
}

impl Connection {
    #[must_use]
    pub fn new(socket: TcpStream, pool: &Arc<SegmentPool>) -> Self {
        let mut conn = Self {
            state: ConnectionState::Uninitialised,
            socket,
            incoming: SegmentedBuffer::new(Arc::clone(pool)),
            outgoing: SegmentedBuffer::new(Arc::clone(pool)),
        };
        conn.state = ConnectionState::Initialised;
        conn.state = ConnectionState::OwnerSet;
        conn.state = ConnectionState::Running;
        conn
    }

    #[must_use]
    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    #[must_use]
    pub fn wants_write(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn request_stop(&mut self) {
        if self.state != ConnectionState::Stopped {
            self.state = ConnectionState::StopRequested;
        }
    }

    /// Reads as many bytes as the non-blocking socket currently has,
    /// feeding them into the incoming buffer. Returns `true` if the peer
    /// has closed its write half (EOF).
    pub fn fill_from_socket(&mut self) -> io::Result<bool> {
        loop {
            let dst = self.incoming.write_ptr(4096);
            match self.socket.read(dst) {
                Ok(0) => return Ok(true),
                Ok(n) => self.incoming.commit_write(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Decodes and removes the next complete message from the incoming
    /// buffer, if any. A protocol error is fatal to the connection.
    pub fn decode_next(&mut self) -> crate::error::Result<Option<RespValue>> {
        resp::decode(&mut self.incoming)
    }

    /// Appends `value`'s wire encoding to the outgoing buffer.
    pub fn queue_response(&mut self, value: &RespValue) {
        let mut encoded = Vec::new();
        resp::encode(value, &mut encoded);
        self.outgoing.append(&encoded);
    }

    /// Writes as much of the outgoing buffer as the socket accepts right
    /// now. Returns `true` once the buffer has fully drained.
    pub fn flush_to_socket(&mut self) -> io::Result<bool> {
        loop {
            if self.outgoing.is_empty() {
                return Ok(true);
            }
            let chunk = self.outgoing.peek();
            match self.socket.write(chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.outgoing.consume(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
