// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{now_ms, EntryType, Keyspace, Value};
use crate::bytes::Bytes;
use crate::error::{Error, Result};

impl Keyspace {
    /// `SET key value [PX ttl_ms]`. Returns `true` if this created a new key.
    /// A non-string value at `key` is overwritten outright, matching the
    /// source's unconditional type replacement on `SET`.
    pub fn set(&mut self, key: &[u8], value: Bytes, ttl_ms: Option<i64>) -> bool {
        if let Some(id) = self.lookup_raw(key) {
            let is_string = matches!(self.map.get(id).value, Value::String(_));
            if is_string {
                let expires_at_ms = ttl_ms.map(|t| now_ms() + t);
                let record = self.map.get_mut(id);
                record.value = Value::String(value);
                record.expires_at_ms = expires_at_ms;
                return false;
            }
            self.remove_key(key);
        }

        let expires_at_ms = ttl_ms.map(|t| now_ms() + t);
        self.insert_new(key, Value::String(value), expires_at_ms);
        true
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        let Some(id) = self.find_entry(key, Some(EntryType::String))? else {
            return Ok(None);
        };
        let Value::String(ref s) = self.map.get(id).value else {
            unreachable!("find_entry enforced EntryType::String");
        };
        Ok(Some(s.clone()))
    }

    pub fn incr(&mut self, key: &[u8]) -> Result<i64> {
        self.incrby(key, 1)
    }

    pub fn decr(&mut self, key: &[u8]) -> Result<i64> {
        self.incrby(key, -1)
    }

    pub fn decrby(&mut self, key: &[u8], decrement: i64) -> Result<i64> {
        let negated = decrement.checked_neg().ok_or(Error::NotAnInteger)?;
        self.incrby(key, negated)
    }

    pub fn incrby(&mut self, key: &[u8], increment: i64) -> Result<i64> {
        let Some(id) = self.find_entry(key, None)? else {
            self.insert_new(key, Value::String(Bytes::from(increment.to_string())), None);
            return Ok(increment);
        };

        let Value::String(ref current) = self.map.get(id).value else {
            return Err(Error::WrongType);
        };
        let parsed: i64 = std::str::from_utf8(current.as_slice())
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::NotAnInteger)?;
        let updated = parsed.checked_add(increment).ok_or(Error::NotAnInteger)?;

        let Value::String(ref mut s) = self.map.get_mut(id).value else {
            unreachable!("type checked above");
        };
        *s = Bytes::from(updated.to_string());
        Ok(updated)
    }
}
