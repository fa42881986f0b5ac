// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The keyspace: a single flat dictionary from key to typed value, with
//! per-key lazy expiration. Command handlers for each value family live in
//! sibling modules and are added as `impl Keyspace` blocks.

mod hash;
mod list;
mod set;
mod sorted_set;
mod strings;

use crate::bytes::Bytes;
use crate::error::{Error, Result};
use crate::hash::hash64;
use crate::phmap::{self, PHMap};
use crate::zset::ZSet;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// The type tag of a stored value, as reported by the `TYPE` command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryType {
    String,
    List,
    Set,
    Hash,
    ZSet,
}

impl EntryType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::Hash => "hash",
            Self::ZSet => "zset",
        }
    }
}

pub(super) enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(PHMap<Bytes>),
    Hash(PHMap<(Bytes, Bytes)>),
    ZSet(ZSet),
}

impl Value {
    fn type_of(&self) -> EntryType {
        match self {
            Self::String(_) => EntryType::String,
            Self::List(_) => EntryType::List,
            Self::Set(_) => EntryType::Set,
            Self::Hash(_) => EntryType::Hash,
            Self::ZSet(_) => EntryType::ZSet,
        }
    }
}

pub(super) struct Record {
    key: Bytes,
    value: Value,
    expires_at_ms: Option<i64>,
}

/// The in-memory store's keyspace: one flat `PHMap<Record>` keyed by the
/// entry's own key bytes, mirroring the source's single `Database::_map`.
#[derive(Default)]
pub struct Keyspace {
    map: PHMap<Record>,
}

pub(super) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

impl Keyspace {
    #[must_use]
    pub fn new() -> Self {
        Self { map: PHMap::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(super) fn lookup_raw(&mut self, key: &[u8]) -> Option<phmap::NodeId> {
        self.map.lookup(hash64(key), |r| r.key.as_slice() == key)
    }

    pub(super) fn is_expired(&self, id: phmap::NodeId) -> bool {
        self.map
            .get(id)
            .expires_at_ms
            .is_some_and(|t| now_ms() >= t)
    }

    pub(super) fn remove_key(&mut self, key: &[u8]) -> bool {
        self.map
            .remove(hash64(key), |r| r.key.as_slice() == key)
            .is_some()
    }

    /// Finds `key`, lazily evicting it first if its TTL has elapsed, and
    /// optionally enforcing that it holds a value of `expected` type.
    pub(super) fn find_entry(
        &mut self,
        key: &[u8],
        expected: Option<EntryType>,
    ) -> Result<Option<phmap::NodeId>> {
        let Some(id) = self.lookup_raw(key) else {
            return Ok(None);
        };
        if self.is_expired(id) {
            self.remove_key(key);
            return Ok(None);
        }
        if let Some(want) = expected {
            if self.map.get(id).value.type_of() != want {
                return Err(Error::WrongType);
            }
        }
        Ok(Some(id))
    }

    pub(super) fn insert_new(&mut self, key: &[u8], value: Value, expires_at_ms: Option<i64>) -> phmap::NodeId {
        self.map.insert(
            hash64(key),
            Record {
                key: Bytes::new(key),
                value,
                expires_at_ms,
            },
        )
    }

    #[must_use]
    pub fn type_of(&mut self, key: &[u8]) -> Option<EntryType> {
        let id = self.find_entry(key, None).ok()??;
        Some(self.map.get(id).value.type_of())
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.remove_key(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        matches!(self.find_entry(key, None), Ok(Some(_)))
    }

    /// Sets an absolute expiry `ttl_ms` milliseconds from now. Returns
    /// `false` if the key doesn't exist.
    pub fn expire_ms(&mut self, key: &[u8], ttl_ms: i64) -> bool {
        let Ok(Some(id)) = self.find_entry(key, None) else {
            return false;
        };
        self.map.get_mut(id).expires_at_ms = Some(now_ms() + ttl_ms);
        true
    }

    /// Sets expiry to the absolute unix-epoch millisecond timestamp `at_ms`.
    /// Returns `false` if the key doesn't exist. Used by `PEXPIREAT`, and by
    /// AOF replay to restore the `PEXPIREAT` records `snapshot_commands`
    /// emits for keys with a live TTL.
    pub fn expire_at_ms(&mut self, key: &[u8], at_ms: i64) -> bool {
        let Ok(Some(id)) = self.find_entry(key, None) else {
            return false;
        };
        self.map.get_mut(id).expires_at_ms = Some(at_ms);
        true
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        let Ok(Some(id)) = self.find_entry(key, None) else {
            return false;
        };
        let record = self.map.get_mut(id);
        if record.expires_at_ms.is_none() {
            return false;
        }
        record.expires_at_ms = None;
        true
    }

    /// Milliseconds of TTL remaining: `-2` if the key is missing or expired,
    /// `-1` if it has no expiry, otherwise the remaining milliseconds
    /// (floored at zero).
    #[must_use]
    pub fn pttl(&mut self, key: &[u8]) -> i64 {
        let Some(id) = self.lookup_raw(key) else {
            return -2;
        };
        if self.is_expired(id) {
            return -2;
        }
        match self.map.get(id).expires_at_ms {
            None => -1,
            Some(at) => (at - now_ms()).max(0),
        }
    }

    /// Seconds of TTL remaining, rounded up, using the same sentinel values
    /// as [`Keyspace::pttl`].
    #[must_use]
    pub fn ttl_secs(&mut self, key: &[u8]) -> i64 {
        match self.pttl(key) {
            -2 => -2,
            -1 => -1,
            ms => (ms + 999) / 1000,
        }
    }

    pub fn rename(&mut self, key: &[u8], newkey: &[u8]) -> bool {
        let Ok(Some(_)) = self.find_entry(key, None) else {
            return false;
        };
        self.remove_key(newkey);

        let record = self
            .map
            .remove(hash64(key), |r| r.key.as_slice() == key)
            .expect("just confirmed key exists");
        self.map.insert(
            hash64(newkey),
            Record {
                key: Bytes::new(newkey),
                value: record.value,
                expires_at_ms: record.expires_at_ms,
            },
        );
        true
    }

    pub fn flush_all(&mut self) {
        self.map.clear();
    }

    /// Every live (non-expired) key matching a redis-style glob `pattern`.
    #[must_use]
    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Bytes> {
        let now = now_ms();
        self.map
            .iter()
            .filter(|r| r.expires_at_ms.is_none_or(|t| now < t))
            .filter(|r| glob_match(pattern, r.key.as_slice()))
            .map(|r| r.key.clone())
            .collect()
    }

    /// The minimal command sequence that reconstructs the current keyspace:
    /// one write command per live entry (plus a trailing `PEXPIREAT` for
    /// entries with a TTL), used both to write a compacted AOF file and as
    /// the snapshot fed to the background rewrite thread. Mirrors the
    /// source's `Database::accept(IDataVisitor&)` full-table visitor.
    #[must_use]
    pub fn snapshot_commands(&self) -> Vec<crate::resp::RespValue> {
        use crate::resp::RespValue;

        let now = now_ms();
        let mut commands = Vec::new();

        for record in self.map.iter() {
            if record.expires_at_ms.is_some_and(|t| now >= t) {
                continue;
            }

            let key = RespValue::bulk(record.key.clone());
            // Sets/lists/hashes/zsets are always deleted the moment they go
            // empty (see the sibling command modules), so `args` here is
            // never just `[cmd, key]` with nothing appended.
            let args = match &record.value {
                Value::String(s) => vec![RespValue::bulk("SET"), key.clone(), RespValue::bulk(s.clone())],
                Value::List(items) => {
                    let mut a = vec![RespValue::bulk("RPUSH"), key.clone()];
                    a.extend(items.iter().cloned().map(RespValue::bulk));
                    a
                }
                Value::Set(members) => {
                    let mut a = vec![RespValue::bulk("SADD"), key.clone()];
                    a.extend(members.iter().cloned().map(RespValue::bulk));
                    a
                }
                Value::Hash(fields) => {
                    let mut a = vec![RespValue::bulk("HSET"), key.clone()];
                    for (field, value) in fields.iter() {
                        a.push(RespValue::bulk(field.clone()));
                        a.push(RespValue::bulk(value.clone()));
                    }
                    a
                }
                Value::ZSet(zset) => {
                    let mut a = vec![RespValue::bulk("ZADD"), key.clone()];
                    for member in zset.iter() {
                        a.push(RespValue::bulk(member.score.to_string()));
                        a.push(RespValue::bulk(member.name.clone()));
                    }
                    a
                }
            };
            commands.push(RespValue::Array(args));

            if let Some(at) = record.expires_at_ms {
                commands.push(RespValue::Array(vec![
                    RespValue::bulk("PEXPIREAT"),
                    key,
                    RespValue::bulk(at.to_string()),
                ]));
            }
        }

        commands
    }
}

/// Redis-compatible glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^...]`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_at(pattern, text, 0, 0)
}

fn glob_match_at(pattern: &[u8], text: &[u8], mut pi: usize, mut ti: usize) -> bool {
    while pi < pattern.len() {
        match pattern[pi] {
            b'*' => {
                while pi < pattern.len() && pattern[pi] == b'*' {
                    pi += 1;
                }
                if pi == pattern.len() {
                    return true;
                }
                for i in ti..=text.len() {
                    if glob_match_at(pattern, text, pi, i) {
                        return true;
                    }
                }
                return false;
            }
            b'?' => {
                if ti >= text.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            b'[' => {
                if ti >= text.len() {
                    return false;
                }
                let Some(end) = pattern[pi + 1..].iter().position(|&b| b == b']').map(|p| p + pi + 1) else {
                    if text[ti] != b'[' {
                        return false;
                    }
                    pi += 1;
                    ti += 1;
                    continue;
                };
                let negate = pi + 1 < end && pattern[pi + 1] == b'^';
                let start = pi + 1 + usize::from(negate);
                let mut matched = false;
                let mut j = start;
                while j < end {
                    if j + 2 < end && pattern[j + 1] == b'-' {
                        if text[ti] >= pattern[j] && text[ti] <= pattern[j + 2] {
                            matched = true;
                        }
                        j += 3;
                    } else {
                        if text[ti] == pattern[j] {
                            matched = true;
                        }
                        j += 1;
                    }
                }
                if matched == negate {
                    return false;
                }
                pi = end + 1;
                ti += 1;
            }
            c => {
                if ti >= text.len() || text[ti] != c {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }
    ti == text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn set_get_roundtrip() {
        let mut ks = Keyspace::new();
        assert!(ks.set(b"k", Bytes::from("v"), None));
        assert_eq!(ks.get(b"k").unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn expire_and_pttl_and_persist() {
        let mut ks = Keyspace::new();
        ks.set(b"k", Bytes::from("v"), None);
        assert_eq!(ks.pttl(b"k"), -1);
        assert!(ks.expire_ms(b"k", 100_000));
        assert!(ks.pttl(b"k") > 0);
        assert!(ks.persist(b"k"));
        assert_eq!(ks.pttl(b"k"), -1);
    }

    #[test]
    fn pttl_on_missing_key() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.pttl(b"nope"), -2);
    }

    #[test]
    fn expired_key_is_lazily_evicted() {
        let mut ks = Keyspace::new();
        ks.set(b"k", Bytes::from("v"), Some(-5));
        assert_eq!(ks.get(b"k").unwrap(), None);
        assert!(!ks.exists(b"k"));
    }

    #[test]
    fn rename_moves_value_and_expiry() {
        let mut ks = Keyspace::new();
        ks.set(b"a", Bytes::from("1"), Some(50_000));
        assert!(ks.rename(b"a", b"b"));
        assert!(!ks.exists(b"a"));
        assert_eq!(ks.get(b"b").unwrap(), Some(Bytes::from("1")));
        assert!(ks.pttl(b"b") > 0);
    }

    #[test]
    fn type_of_reports_family() {
        let mut ks = Keyspace::new();
        ks.set(b"s", Bytes::from("x"), None);
        assert_eq!(ks.type_of(b"s"), Some(EntryType::String));
        assert_eq!(ks.type_of(b"missing"), None);
    }

    #[test]
    fn keys_matches_glob_patterns() {
        let mut ks = Keyspace::new();
        ks.set(b"foo", Bytes::from("1"), None);
        ks.set(b"foobar", Bytes::from("1"), None);
        ks.set(b"baz", Bytes::from("1"), None);
        let mut matched: Vec<String> = ks
            .keys(b"foo*")
            .into_iter()
            .map(|b| b.to_string_lossy().into_owned())
            .collect();
        matched.sort();
        assert_eq!(matched, vec!["foo".to_owned(), "foobar".to_owned()]);
    }

    #[test]
    fn glob_match_handles_classes() {
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"a?c", b"abc"));
        assert!(glob_match(b"*", b"anything"));
    }
}
