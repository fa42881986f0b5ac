// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{EntryType, Keyspace, Value};
use crate::bytes::Bytes;
use crate::error::Result;
use std::collections::VecDeque;

/// Clamps a Python-style (possibly negative) `start..=stop` range against a
/// sequence of length `len`, the way `LRANGE`/`ZRANGE` slice their backing
/// sequence. Returns `None` if the clamped range is empty.
pub(super) fn clamp_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| if i < 0 { (i + len_i).max(0) } else { i };
    let start = norm(start).min(len_i - 1).max(0);
    let stop = norm(stop).min(len_i - 1);
    if stop < start {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl Keyspace {
    pub fn lpush(&mut self, key: &[u8], value: Bytes) -> Result<usize> {
        let id = match self.find_entry(key, Some(EntryType::List))? {
            Some(id) => id,
            None => self.insert_new(key, Value::List(VecDeque::new()), None),
        };
        let Value::List(ref mut list) = self.map.get_mut(id).value else {
            unreachable!("find_entry/insert_new enforced EntryType::List");
        };
        list.push_front(value);
        Ok(list.len())
    }

    pub fn rpush(&mut self, key: &[u8], value: Bytes) -> Result<usize> {
        let id = match self.find_entry(key, Some(EntryType::List))? {
            Some(id) => id,
            None => self.insert_new(key, Value::List(VecDeque::new()), None),
        };
        let Value::List(ref mut list) = self.map.get_mut(id).value else {
            unreachable!("find_entry/insert_new enforced EntryType::List");
        };
        list.push_back(value);
        Ok(list.len())
    }

    /// Pops from the head, deleting the key entirely once the list empties.
    pub fn lpop(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::List))? else {
            return Ok(None);
        };
        let Value::List(ref mut list) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::List");
        };
        let popped = list.pop_front();
        if list.is_empty() {
            self.remove_key(key);
        }
        Ok(popped)
    }

    pub fn rpop(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::List))? else {
            return Ok(None);
        };
        let Value::List(ref mut list) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::List");
        };
        let popped = list.pop_back();
        if list.is_empty() {
            self.remove_key(key);
        }
        Ok(popped)
    }

    pub fn llen(&mut self, key: &[u8]) -> Result<usize> {
        let Some(id) = self.find_entry(key, Some(EntryType::List))? else {
            return Ok(0);
        };
        let Value::List(ref list) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::List");
        };
        Ok(list.len())
    }

    /// Elements from `start` to `stop` inclusive, with Python-style negative
    /// indices counting from the end.
    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::List))? else {
            return Ok(Vec::new());
        };
        let Value::List(ref list) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::List");
        };
        let Some((start, stop)) = clamp_range(start, stop, list.len()) else {
            return Ok(Vec::new());
        };
        Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use test_log::test;

    #[test]
    fn lpush_rpush_order() {
        let mut ks = Keyspace::new();
        ks.rpush(b"l", Bytes::from("a")).unwrap();
        ks.rpush(b"l", Bytes::from("b")).unwrap();
        ks.lpush(b"l", Bytes::from("z")).unwrap();
        assert_eq!(
            ks.lrange(b"l", 0, -1).unwrap(),
            vec![Bytes::from("z"), Bytes::from("a"), Bytes::from("b")]
        );
    }

    #[test]
    fn lpop_rpop_remove_key_when_empty() {
        let mut ks = Keyspace::new();
        ks.rpush(b"l", Bytes::from("only")).unwrap();
        assert_eq!(ks.lpop(b"l").unwrap(), Some(Bytes::from("only")));
        assert!(!ks.exists(b"l"));
        assert_eq!(ks.rpop(b"l").unwrap(), None);
    }

    #[test]
    fn lrange_clamps_negative_and_out_of_bounds_indices() {
        let mut ks = Keyspace::new();
        for v in ["a", "b", "c", "d", "e"] {
            ks.rpush(b"l", Bytes::from(v)).unwrap();
        }
        assert_eq!(
            ks.lrange(b"l", -2, -1).unwrap(),
            vec![Bytes::from("d"), Bytes::from("e")]
        );
        assert_eq!(ks.lrange(b"l", 10, 20).unwrap(), Vec::<Bytes>::new());
        assert_eq!(ks.lrange(b"l", 3, 1).unwrap(), Vec::<Bytes>::new());
        assert_eq!(ks.llen(b"l").unwrap(), 5);
    }

    #[test]
    fn lpush_on_wrong_type_is_an_error() {
        let mut ks = Keyspace::new();
        ks.set(b"s", Bytes::from("v"), None);
        assert!(matches!(ks.lpush(b"s", Bytes::from("x")), Err(Error::WrongType)));
    }

    #[test]
    fn clamp_range_empty_list_is_none() {
        assert_eq!(clamp_range(0, -1, 0), None);
    }
}
