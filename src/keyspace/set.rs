// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{EntryType, Keyspace, Value};
use crate::bytes::Bytes;
use crate::error::Result;
use crate::hash::hash64;
use crate::phmap::PHMap;

impl Keyspace {
    /// Adds `member` to the set at `key`, creating it as needed. Returns
    /// `true` if the member was newly added.
    pub fn sadd(&mut self, key: &[u8], member: Bytes) -> Result<bool> {
        let id = match self.find_entry(key, Some(EntryType::Set))? {
            Some(id) => id,
            None => self.insert_new(key, Value::Set(PHMap::new()), None),
        };
        let Value::Set(ref mut members) = self.map.get_mut(id).value else {
            unreachable!("find_entry/insert_new enforced EntryType::Set");
        };
        if members
            .lookup(hash64(member.as_slice()), |m| m.as_slice() == member.as_slice())
            .is_some()
        {
            return Ok(false);
        }
        members.insert(hash64(member.as_slice()), member);
        Ok(true)
    }

    /// Removes `member`, deleting the key entirely once the set empties.
    /// Returns `true` if the member existed.
    pub fn srem(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        let Some(id) = self.find_entry(key, Some(EntryType::Set))? else {
            return Ok(false);
        };
        let Value::Set(ref mut members) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::Set");
        };
        let removed = members.remove(hash64(member), |m| m.as_slice() == member).is_some();
        if removed && members.is_empty() {
            self.remove_key(key);
        }
        Ok(removed)
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        let Some(id) = self.find_entry(key, Some(EntryType::Set))? else {
            return Ok(false);
        };
        let Value::Set(ref members) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::Set");
        };
        Ok(members.lookup(hash64(member), |m| m.as_slice() == member).is_some())
    }

    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::Set))? else {
            return Ok(Vec::new());
        };
        let Value::Set(ref members) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::Set");
        };
        Ok(members.iter().cloned().collect())
    }

    pub fn scard(&mut self, key: &[u8]) -> Result<usize> {
        let Some(id) = self.find_entry(key, Some(EntryType::Set))? else {
            return Ok(0);
        };
        let Value::Set(ref members) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::Set");
        };
        Ok(members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use test_log::test;

    #[test]
    fn sadd_sismember_roundtrip() {
        let mut ks = Keyspace::new();
        assert!(ks.sadd(b"s", Bytes::from("a")).unwrap());
        assert!(!ks.sadd(b"s", Bytes::from("a")).unwrap());
        assert!(ks.sismember(b"s", b"a").unwrap());
        assert!(!ks.sismember(b"s", b"b").unwrap());
        assert_eq!(ks.scard(b"s").unwrap(), 1);
    }

    #[test]
    fn srem_removes_key_once_empty() {
        let mut ks = Keyspace::new();
        ks.sadd(b"s", Bytes::from("only")).unwrap();
        assert!(ks.srem(b"s", b"only").unwrap());
        assert!(!ks.exists(b"s"));
    }

    #[test]
    fn smembers_returns_every_member() {
        let mut ks = Keyspace::new();
        ks.sadd(b"s", Bytes::from("a")).unwrap();
        ks.sadd(b"s", Bytes::from("b")).unwrap();
        let mut members: Vec<String> = ks
            .smembers(b"s")
            .unwrap()
            .into_iter()
            .map(|b| b.to_string_lossy().into_owned())
            .collect();
        members.sort();
        assert_eq!(members, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn sadd_on_wrong_type_is_an_error() {
        let mut ks = Keyspace::new();
        ks.set(b"str", Bytes::from("v"), None);
        assert!(matches!(ks.sadd(b"str", Bytes::from("x")), Err(Error::WrongType)));
    }
}
