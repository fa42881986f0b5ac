// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The single-threaded `mio` event loop: accepts connections, drives each
//! [`Connection`] through read/decode/dispatch/encode/write, and ticks the
//! durability engine. Mirrors the source's `TcpServer` accept-and-pump loop,
//! collapsed onto one thread since there is no per-connection worker here.

use crate::conn::{Connection, ConnectionState};
use crate::config::Config;
use crate::dispatch::{self, CommandContext};
use crate::durability::Durability;
use crate::error::Result;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;
use crate::segment::SegmentPool;
use crate::stop_signal::StopSignal;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1::Signals;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

const LISTENER: Token = Token(0);
const SIGNALS: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Owns everything the event loop touches: the listener, the live
/// connections, and the keyspace/durability/config trio a command handler
/// needs. Stands in for the source's `Database` + `TcpServer` pairing.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    signals: Signals,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    pool: std::sync::Arc<SegmentPool>,
    keyspace: Keyspace,
    durability: Durability,
    config: Config,
    stop: StopSignal,
}

impl Server {
    pub fn bind(addr: SocketAddr, config: Config, stop: StopSignal) -> Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        poll.registry().register(&mut signals, SIGNALS, Interest::READABLE)?;

        let durability = Durability::open(&config.appendfilename, config.appendfsync, config.appendfsync_interval_secs)?;

        Ok(Self {
            poll,
            listener,
            signals,
            connections: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
            pool: SegmentPool::new(),
            keyspace: Keyspace::new(),
            durability,
            config,
            stop,
        })
    }

    /// Replays the append-only log against a fresh keyspace. Replayed
    /// commands are never re-journalled; errors from individual records are
    /// logged and skipped rather than aborting the whole replay.
    pub fn replay(&mut self) -> Result<()> {
        let commands = self.durability.load()?;
        log::info!("replaying {} command(s) from the append-only log", commands.len());
        for command in commands {
            let RespValue::Array(args) = command else {
                log::warn!("skipping malformed AOF record (not an array)");
                continue;
            };
            let mut ctx = CommandContext {
                keyspace: &mut self.keyspace,
                durability: &mut self.durability,
                config: &mut self.config,
            };
            if let RespValue::Error(msg) = dispatch::dispatch(&mut ctx, &args) {
                log::warn!("AOF replay of a command produced an error: {}", msg.to_string_lossy());
            }
        }
        Ok(())
    }

    /// Runs the accept/read/dispatch/write loop until the stop signal fires,
    /// then drains outstanding writes and flushes the durability engine.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(256);
        log::info!("listening on {}", self.listener.local_addr()?);

        while !self.stop.is_stopped() {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_all()?,
                    SIGNALS => {
                        for signal in self.signals.pending() {
                            log::info!("received signal {signal}, shutting down");
                            self.stop.send();
                        }
                    }
                    token => self.service_connection(token),
                }
            }

            self.durability.tick();
        }

        self.shutdown();
        Ok(())
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            let (socket, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let mut conn = Connection::new(socket, &self.pool);
            let token = Token(self.next_token);
            self.next_token += 1;

            self.poll.registry().register(conn.socket_mut(), token, Interest::READABLE)?;
            log::debug!("accepted connection from {addr} as {token:?}");
            self.connections.insert(token, conn);
        }
    }

    fn service_connection(&mut self, token: Token) {
        let mut close = false;

        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match conn.fill_from_socket() {
                Ok(eof) => close |= eof,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::debug!("{token:?} read error: {e}");
                    close = true;
                }
            }
        }

        // Decoding is done against the borrowed connection alone, so every
        // complete message is collected here first; dispatching a command
        // needs `&mut self` as a whole (keyspace + durability), which can't
        // overlap with a borrow of `self.connections`.
        let mut pending = Vec::new();
        loop {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match conn.decode_next() {
                Ok(Some(RespValue::Array(args))) => pending.push(args),
                Ok(Some(other @ (RespValue::SimpleString(_) | RespValue::BulkString(_)))) => {
                    pending.push(vec![other]);
                }
                Ok(Some(_)) => {
                    conn.queue_response(&RespValue::error("ERR Protocol error: expected command array"));
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("{token:?} protocol error: {e}");
                    conn.queue_response(&RespValue::error(e.to_resp_message()));
                    close = close || e.is_fatal_to_connection();
                    break;
                }
            }
        }

        for args in pending {
            let reply = self.execute_command(&args);
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.queue_response(&reply);
            }
        }

        let should_teardown = 'finish: {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match conn.flush_to_socket() {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::debug!("{token:?} write error: {e}");
                    close = true;
                }
            }

            if close {
                conn.request_stop();
            }

            let interest = if conn.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if self.poll.registry().reregister(conn.socket_mut(), token, interest).is_err() {
                conn.request_stop();
            }

            break 'finish matches!(conn.state, ConnectionState::StopRequested);
        };

        if should_teardown {
            self.teardown_connection(token);
        }
    }

    /// Dispatches one command against the live keyspace, journalling it if
    /// it's a write command that succeeded.
    fn execute_command(&mut self, args: &[RespValue]) -> RespValue {
        let name = dispatch::command_name(args);
        let mut ctx = CommandContext {
            keyspace: &mut self.keyspace,
            durability: &mut self.durability,
            config: &mut self.config,
        };
        let reply = dispatch::dispatch(&mut ctx, args);

        if !matches!(reply, RespValue::Error(_)) {
            if let Some(name) = &name {
                if dispatch::is_write_command(name) {
                    if let Err(e) = self.durability.append(&RespValue::Array(args.to_vec())) {
                        log::error!("failed to journal command: {e}");
                    }
                }
            }
        }
        reply
    }

    fn teardown_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            conn.state = ConnectionState::Stopped;
            let _ = self.poll.registry().deregister(conn.socket_mut());
            log::debug!("{token:?} closed");
        }
    }

    fn shutdown(&mut self) {
        log::info!("shutting down: draining {} connection(s)", self.connections.len());
        for conn in self.connections.values_mut() {
            let _ = conn.flush_to_socket();
        }
        self.connections.clear();
        if let Err(e) = self.durability.flush() {
            log::error!("final AOF flush failed: {e}");
        }
    }
}
