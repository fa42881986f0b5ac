// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Black-box scenarios against the public crate API: command dispatch,
//! journal replay, TTL expiry timing, and wire-codec boundary cases.

use respkv::config::{AppendFsync, Config};
use respkv::durability::Durability;
use respkv::dispatch::{dispatch, CommandContext};
use respkv::keyspace::Keyspace;
use respkv::resp::{self, RespValue};
use respkv::segment::SegmentPool;
use respkv::segmented_buffer::SegmentedBuffer;
use std::thread::sleep;
use std::time::Duration;
use test_log::test;

fn bulk_array(parts: &[&str]) -> Vec<RespValue> {
    parts.iter().map(|p| RespValue::bulk(*p)).collect()
}

struct Harness {
    keyspace: Keyspace,
    durability: Durability,
    config: Config,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let durability = Durability::open(dir.path().join("test.aof"), AppendFsync::Always, 1).unwrap();
        Self { keyspace: Keyspace::new(), durability, config: Config::default(), _dir: dir }
    }

    /// Dispatches a command, journalling it if it's a write command whose
    /// reply wasn't an error — mirroring what the event loop does.
    fn run(&mut self, parts: &[&str]) -> RespValue {
        let args = bulk_array(parts);
        let mut ctx = CommandContext {
            keyspace: &mut self.keyspace,
            durability: &mut self.durability,
            config: &mut self.config,
        };
        let reply = dispatch(&mut ctx, &args);
        if !matches!(reply, RespValue::Error(_)) {
            if let Some(name) = respkv::dispatch::command_name(&args) {
                if respkv::dispatch::is_write_command(&name) {
                    self.durability.append(&RespValue::Array(args)).unwrap();
                }
            }
        }
        reply
    }
}

#[test]
fn incr_sequence() {
    let mut h = Harness::new();
    h.run(&["SET", "a", "1"]);
    h.run(&["INCR", "a"]);
    h.run(&["INCR", "a"]);
    assert_eq!(h.run(&["GET", "a"]), RespValue::bulk("3"));
}

#[test]
fn list_push_and_range() {
    let mut h = Harness::new();
    h.run(&["LPUSH", "l", "x"]);
    h.run(&["LPUSH", "l", "y"]);
    h.run(&["RPUSH", "l", "z"]);
    assert_eq!(
        h.run(&["LRANGE", "l", "0", "-1"]),
        RespValue::Array(vec![RespValue::bulk("y"), RespValue::bulk("x"), RespValue::bulk("z")])
    );
    assert_eq!(h.run(&["LLEN", "l"]), RespValue::Integer(3));
}

#[test]
fn sorted_set_rank_and_withscores() {
    let mut h = Harness::new();
    h.run(&["ZADD", "z", "10", "a"]);
    h.run(&["ZADD", "z", "20", "b"]);
    h.run(&["ZADD", "z", "15", "a"]);
    assert_eq!(
        h.run(&["ZRANGE", "z", "0", "-1", "WITHSCORES"]),
        RespValue::Array(vec![
            RespValue::bulk("a"),
            RespValue::bulk("15"),
            RespValue::bulk("b"),
            RespValue::bulk("20"),
        ])
    );
    assert_eq!(h.run(&["ZRANK", "z", "b"]), RespValue::Integer(1));
}

#[test]
fn hash_set_overwrite_and_len() {
    let mut h = Harness::new();
    h.run(&["HSET", "hh", "f1", "v1"]);
    h.run(&["HSET", "hh", "f2", "v2"]);
    h.run(&["HSET", "hh", "f1", "v1prime"]);
    assert_eq!(h.run(&["HLEN", "hh"]), RespValue::Integer(2));
    assert_eq!(h.run(&["HGET", "hh", "f1"]), RespValue::bulk("v1prime"));
}

#[test]
fn ttl_expires_via_px() {
    let mut h = Harness::new();
    h.run(&["SET", "t", "data", "PX", "200"]);
    assert_eq!(h.run(&["GET", "t"]), RespValue::bulk("data"));
    sleep(Duration::from_millis(250));
    assert_eq!(h.run(&["GET", "t"]), RespValue::Null);
    assert_eq!(h.run(&["PTTL", "t"]), RespValue::Integer(-2));
}

#[test]
fn rename_overwrites_existing_destination() {
    let mut h = Harness::new();
    h.run(&["SET", "a", "1"]);
    h.run(&["SET", "b", "2"]);
    assert_eq!(h.run(&["RENAME", "a", "b"]), RespValue::ok());
    assert_eq!(h.run(&["EXISTS", "a"]), RespValue::Integer(0));
    assert_eq!(h.run(&["GET", "b"]), RespValue::bulk("1"));
}

#[test]
fn lrange_start_greater_than_stop_is_empty() {
    let mut h = Harness::new();
    h.run(&["RPUSH", "l", "a"]);
    h.run(&["RPUSH", "l", "b"]);
    assert_eq!(h.run(&["LRANGE", "l", "1", "0"]), RespValue::Array(vec![]));
}

#[test]
fn journal_replay_reproduces_state() {
    let dir = tempfile::tempdir().unwrap();
    let aof_path = dir.path().join("replay.aof");

    {
        let mut keyspace = Keyspace::new();
        let mut durability = Durability::open(&aof_path, AppendFsync::Always, 1).unwrap();
        let mut config = Config::default();
        for parts in [
            vec!["SET", "a", "1"],
            vec!["INCR", "a"],
            vec!["INCR", "a"],
            vec!["LPUSH", "l", "x"],
            vec!["RPUSH", "l", "z"],
            vec!["HSET", "hh", "f1", "v1"],
            vec!["ZADD", "z", "10", "a"],
            vec!["ZADD", "z", "20", "b"],
        ] {
            let args = bulk_array(&parts);
            let mut ctx = CommandContext { keyspace: &mut keyspace, durability: &mut durability, config: &mut config };
            dispatch(&mut ctx, &args);
            durability.append(&RespValue::Array(args)).unwrap();
        }
    }

    // Fresh process: replay the log into an empty keyspace before serving.
    let mut replay_durability = Durability::open(&aof_path, AppendFsync::Always, 1).unwrap();
    let commands = replay_durability.load().unwrap();
    let mut keyspace = Keyspace::new();
    let mut config = Config::default();
    for command in commands {
        let RespValue::Array(args) = command else { continue };
        let mut ctx = CommandContext { keyspace: &mut keyspace, durability: &mut replay_durability, config: &mut config };
        dispatch(&mut ctx, &args);
    }

    assert_eq!(keyspace.get(b"a").unwrap(), Some(respkv::bytes::Bytes::from("3")));
    assert_eq!(keyspace.lrange(b"l", 0, -1).unwrap(), vec![respkv::bytes::Bytes::from("x"), respkv::bytes::Bytes::from("z")]);
    assert_eq!(keyspace.hgetall(b"hh").unwrap(), vec![(respkv::bytes::Bytes::from("f1"), respkv::bytes::Bytes::from("v1"))]);
    assert_eq!(keyspace.zrange(b"z", 0, -1).unwrap(), vec![(respkv::bytes::Bytes::from("a"), 10.0), (respkv::bytes::Bytes::from("b"), 20.0)]);
}

#[test]
fn bgrewriteaof_compacts_and_log_still_replays() {
    let mut h = Harness::new();
    h.run(&["SET", "a", "1"]);
    h.run(&["SET", "a", "2"]);
    h.run(&["SET", "a", "3"]);
    h.run(&["BGREWRITEAOF"]);

    for _ in 0..200 {
        h.durability.tick();
        if !h.durability.is_rewriting() {
            break;
        }
        sleep(Duration::from_millis(5));
    }
    assert!(!h.durability.is_rewriting());

    let commands = h.durability.load().unwrap();
    let mut keyspace = Keyspace::new();
    for command in commands {
        if let RespValue::Array(args) = command {
            let name = respkv::dispatch::command_name(&args);
            assert_eq!(name.as_deref(), Some("SET"));
            let mut ctx = CommandContext { keyspace: &mut keyspace, durability: &mut h.durability, config: &mut h.config };
            dispatch(&mut ctx, &args);
        }
    }
    assert_eq!(keyspace.get(b"a").unwrap(), Some(respkv::bytes::Bytes::from("3")));
}

#[test]
fn bgrewriteaof_preserves_ttl_across_replay() {
    let mut h = Harness::new();
    h.run(&["SET", "a", "1"]);
    h.run(&["SET", "t", "data"]);
    h.run(&["EXPIRE", "t", "1000"]);
    h.run(&["BGREWRITEAOF"]);

    for _ in 0..200 {
        h.durability.tick();
        if !h.durability.is_rewriting() {
            break;
        }
        sleep(Duration::from_millis(5));
    }
    assert!(!h.durability.is_rewriting());

    // The compacted log must carry the TTL forward as a `PEXPIREAT` record,
    // which `Server::replay()` (and this loop) has to know how to dispatch.
    let commands = h.durability.load().unwrap();
    assert!(commands.iter().any(|c| {
        matches!(c, RespValue::Array(args) if respkv::dispatch::command_name(args).as_deref() == Some("PEXPIREAT"))
    }));

    let mut keyspace = Keyspace::new();
    for command in commands {
        if let RespValue::Array(args) = command {
            let mut ctx = CommandContext { keyspace: &mut keyspace, durability: &mut h.durability, config: &mut h.config };
            let reply = dispatch(&mut ctx, &args);
            assert!(!matches!(reply, RespValue::Error(_)), "replay of {args:?} failed: {reply:?}");
        }
    }

    assert_eq!(keyspace.get(b"t").unwrap(), Some(respkv::bytes::Bytes::from("data")));
    let pttl = keyspace.pttl(b"t");
    assert!(pttl > 0 && pttl <= 1000, "expected a live TTL close to 1000ms, got {pttl}");
}

fn decode_one(bytes: &[u8]) -> Option<RespValue> {
    let pool = SegmentPool::new();
    let mut buf = SegmentedBuffer::new(pool);
    buf.append(bytes);
    resp::decode(&mut buf).unwrap()
}

#[test]
fn empty_array_decodes_to_empty_vec() {
    assert_eq!(decode_one(b"*0\r\n"), Some(RespValue::Array(vec![])));
}

#[test]
fn null_bulk_and_null_array_unify_to_null() {
    assert_eq!(decode_one(b"$-1\r\n"), Some(RespValue::Null));
    assert_eq!(decode_one(b"*-1\r\n"), Some(RespValue::Null));
}

#[test]
fn bulk_string_with_embedded_crlf_is_preserved() {
    let payload = b"line1\r\nline2";
    let mut wire = format!("${}\r\n", payload.len()).into_bytes();
    wire.extend_from_slice(payload);
    wire.extend_from_slice(b"\r\n");
    assert_eq!(decode_one(&wire), Some(RespValue::bulk(payload.as_slice())));
}

#[test]
fn nested_array_at_the_depth_limit_decodes_ok() {
    let mut wire = Vec::new();
    for _ in 0..resp::MAX_RECURSION_DEPTH {
        wire.extend_from_slice(b"*1\r\n");
    }
    wire.extend_from_slice(b":1\r\n");
    assert!(decode_one(&wire).is_some());
}

#[test]
fn nested_array_past_the_depth_limit_is_rejected() {
    let mut wire = Vec::new();
    for _ in 0..=resp::MAX_RECURSION_DEPTH {
        wire.extend_from_slice(b"*1\r\n");
    }
    wire.extend_from_slice(b":1\r\n");

    let pool = SegmentPool::new();
    let mut buf = SegmentedBuffer::new(pool);
    buf.append(&wire);
    assert!(resp::decode(&mut buf).is_err());
}

#[test]
fn unknown_command_yields_resp_error() {
    let mut h = Harness::new();
    assert!(matches!(h.run(&["FROBNICATE"]), RespValue::Error(_)));
}
