// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An in-memory key-value store speaking a RESP-compatible wire protocol.
//!
//! ##### About
//!
//! `respkv` keeps every key in a single progressively-rehashing hash map
//! ([`phmap`]), with richer types (lists, sets, hashes, sorted sets) layered
//! on top of it. A sorted set additionally threads an order-statistic AVL
//! tree ([`ostree`]) so that rank queries don't need a linear scan.
//!
//! Durability is append-only: every write command is logged as its own RESP
//! array and replayed on startup ([`durability`]). `BGREWRITEAOF` compacts
//! the log on a background thread rather than forking, since there's no
//! portable safe-Rust equivalent to `fork()`'s copy-on-write snapshot.
//!
//! The wire protocol ([`resp`]) is decoded incrementally out of a pool of
//! reusable, page-aligned buffers ([`segment`], [`segmented_buffer`]) so a
//! connection that has only received half a command doesn't block anyone
//! else. [`server`] drives every connection from one thread via `mio`.
//!
//! # Example usage
//!
//! ```
//! use respkv::keyspace::Keyspace;
//! use respkv::bytes::Bytes;
//!
//! let mut ks = Keyspace::new();
//! ks.set(b"greeting", Bytes::from("hello"), None);
//! assert_eq!(ks.get(b"greeting").unwrap(), Some(Bytes::from("hello")));
//! ```

#![forbid(unsafe_code)]

pub mod bytes;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod durability;
pub mod error;
mod hash;
pub mod keyspace;
mod ostree;
mod phmap;
pub mod resp;
pub mod segment;
pub mod segmented_buffer;
pub mod server;
pub mod stop_signal;
mod zset;

pub use error::{Error, Result};
