// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::list::clamp_range;
use super::{EntryType, Keyspace, Value};
use crate::bytes::Bytes;
use crate::error::Result;
use crate::zset::ZSet;

impl Keyspace {
    /// Adds `member` with `score` to the sorted set at `key`, or updates its
    /// score if already present. Returns `true` if the member is new.
    pub fn zadd(&mut self, key: &[u8], member: Bytes, score: f64) -> Result<bool> {
        let id = match self.find_entry(key, Some(EntryType::ZSet))? {
            Some(id) => id,
            None => self.insert_new(key, Value::ZSet(ZSet::new()), None),
        };
        let Value::ZSet(ref mut zset) = self.map.get_mut(id).value else {
            unreachable!("find_entry/insert_new enforced EntryType::ZSet");
        };
        Ok(zset.insert(member, score))
    }

    /// Removes `member`, deleting the key entirely once the set empties.
    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(false);
        };
        let Value::ZSet(ref mut zset) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        let removed = zset.remove(member).is_some();
        if removed && zset.is_empty() {
            self.remove_key(key);
        }
        Ok(removed)
    }

    pub fn zcard(&mut self, key: &[u8]) -> Result<usize> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(0);
        };
        let Value::ZSet(ref zset) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        Ok(zset.len())
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(None);
        };
        let Value::ZSet(ref mut zset) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        Ok(zset.score(member))
    }

    /// Zero-based ascending-order rank of `member`, or `None` if either the
    /// key or the member is missing.
    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<u32>> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(None);
        };
        let Value::ZSet(ref mut zset) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        Ok(zset.rank(member))
    }

    /// Members from rank `start` to `stop` inclusive, Python-style negative
    /// indices counting from the end, ascending by `(score, member)`.
    pub fn zrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Bytes, f64)>> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(Vec::new());
        };
        let Value::ZSet(ref zset) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        let Some((start, stop)) = clamp_range(start, stop, zset.len()) else {
            return Ok(Vec::new());
        };
        Ok((start..=stop)
            .filter_map(|rank| zset.nth(rank as u32))
            .map(|m| (m.name.clone(), m.score))
            .collect())
    }

    /// Members with `min <= score <= max`, ascending by `(score, member)`.
    pub fn zrangebyscore(&mut self, key: &[u8], min: f64, max: f64) -> Result<Vec<(Bytes, f64)>> {
        let Some(id) = self.find_entry(key, Some(EntryType::ZSet))? else {
            return Ok(Vec::new());
        };
        let Value::ZSet(ref zset) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::ZSet");
        };
        Ok(zset
            .iter()
            .filter(|m| m.score >= min && m.score <= max)
            .map(|m| (m.name.clone(), m.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use test_log::test;

    #[test]
    fn zadd_zscore_zrank_roundtrip() {
        let mut ks = Keyspace::new();
        assert!(ks.zadd(b"z", Bytes::from("a"), 1.0).unwrap());
        assert!(ks.zadd(b"z", Bytes::from("b"), 2.0).unwrap());
        assert!(!ks.zadd(b"z", Bytes::from("a"), 5.0).unwrap());
        assert_eq!(ks.zscore(b"z", b"a").unwrap(), Some(5.0));
        assert_eq!(ks.zrank(b"z", b"b").unwrap(), Some(0));
        assert_eq!(ks.zrank(b"z", b"a").unwrap(), Some(1));
    }

    #[test]
    fn zrem_removes_key_once_empty() {
        let mut ks = Keyspace::new();
        ks.zadd(b"z", Bytes::from("only"), 1.0).unwrap();
        assert!(ks.zrem(b"z", b"only").unwrap());
        assert!(!ks.exists(b"z"));
    }

    #[test]
    fn zrange_by_index_clamps_negative_indices() {
        let mut ks = Keyspace::new();
        for (name, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            ks.zadd(b"z", Bytes::from(name), score).unwrap();
        }
        assert_eq!(
            ks.zrange(b"z", 0, -1).unwrap(),
            vec![
                (Bytes::from("a"), 1.0),
                (Bytes::from("b"), 2.0),
                (Bytes::from("c"), 3.0)
            ]
        );
        assert_eq!(ks.zrange(b"z", -1, -1).unwrap(), vec![(Bytes::from("c"), 3.0)]);
    }

    #[test]
    fn zrangebyscore_filters_by_bounds() {
        let mut ks = Keyspace::new();
        for (name, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            ks.zadd(b"z", Bytes::from(name), score).unwrap();
        }
        assert_eq!(
            ks.zrangebyscore(b"z", 2.0, 3.0).unwrap(),
            vec![(Bytes::from("b"), 2.0), (Bytes::from("c"), 3.0)]
        );
    }

    #[test]
    fn zadd_on_wrong_type_is_an_error() {
        let mut ks = Keyspace::new();
        ks.set(b"s", Bytes::from("v"), None);
        assert!(matches!(ks.zadd(b"s", Bytes::from("m"), 1.0), Err(Error::WrongType)));
    }
}
