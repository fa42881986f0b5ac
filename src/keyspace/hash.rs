// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{EntryType, Keyspace, Value};
use crate::bytes::Bytes;
use crate::error::Result;
use crate::hash::hash64;
use crate::phmap::PHMap;

impl Keyspace {
    /// Sets `field` to `value` in the hash at `key`, creating both as needed.
    /// Returns `true` if `field` is new to the hash.
    pub fn hset(&mut self, key: &[u8], field: Bytes, value: Bytes) -> Result<bool> {
        let id = match self.find_entry(key, Some(EntryType::Hash))? {
            Some(id) => id,
            None => self.insert_new(key, Value::Hash(PHMap::new()), None),
        };
        let Value::Hash(ref mut fields) = self.map.get_mut(id).value else {
            unreachable!("find_entry/insert_new enforced EntryType::Hash");
        };

        if let Some(slot) = fields.lookup(hash64(field.as_slice()), |(f, _)| f.as_slice() == field.as_slice()) {
            fields.get_mut(slot).1 = value;
            return Ok(false);
        }
        fields.insert(hash64(field.as_slice()), (field, value));
        Ok(true)
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::Hash))? else {
            return Ok(None);
        };
        let Value::Hash(ref mut fields) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::Hash");
        };
        Ok(fields
            .lookup(hash64(field), |(f, _)| f.as_slice() == field)
            .map(|slot_id| fields.get(slot_id).1.clone()))
    }

    /// Removes `field` from the hash at `key`, deleting the key entirely
    /// once the hash becomes empty. Returns `true` if the field existed.
    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> Result<bool> {
        let Some(id) = self.find_entry(key, Some(EntryType::Hash))? else {
            return Ok(false);
        };
        let Value::Hash(ref mut fields) = self.map.get_mut(id).value else {
            unreachable!("find_entry enforced EntryType::Hash");
        };
        let removed = fields.remove(hash64(field), |(f, _)| f.as_slice() == field).is_some();
        if removed && fields.is_empty() {
            self.remove_key(key);
        }
        Ok(removed)
    }

    pub fn hlen(&mut self, key: &[u8]) -> Result<usize> {
        let Some(id) = self.find_entry(key, Some(EntryType::Hash))? else {
            return Ok(0);
        };
        let Value::Hash(ref fields) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::Hash");
        };
        Ok(fields.len())
    }

    /// Every `(field, value)` pair in the hash at `key`, in unspecified order.
    pub fn hgetall(&mut self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let Some(id) = self.find_entry(key, Some(EntryType::Hash))? else {
            return Ok(Vec::new());
        };
        let Value::Hash(ref fields) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::Hash");
        };
        Ok(fields.iter().cloned().collect())
    }

    pub fn hmset(&mut self, key: &[u8], pairs: Vec<(Bytes, Bytes)>) -> Result<()> {
        for (field, value) in pairs {
            self.hset(key, field, value)?;
        }
        Ok(())
    }

    /// Looks up several fields at once, preserving the caller's order and
    /// returning `None` per field that isn't present.
    pub fn hmget(&mut self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>> {
        fields.iter().map(|f| self.hget(key, f.as_slice())).collect()
    }
}
