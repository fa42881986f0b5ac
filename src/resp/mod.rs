// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The wire codec: decodes RESP2/RESP3 values out of a [`SegmentedBuffer`]
//! and encodes [`RespValue`]s back into their wire form.

use crate::bytes::Bytes;
use crate::error::Error;
use crate::segment::Segment;
use crate::segmented_buffer::SegmentedBuffer;
use std::borrow::Cow;
use std::sync::Arc;

/// The head segment backing the current decode view, and the offset within
/// it that position `0` of that view corresponds to. `None` when the view
/// spans more than one segment (already copied into scratch by
/// [`SegmentedBuffer::peek_contiguous`]), in which case nothing can be
/// anchored. Only [`decode_bulk_string`] uses this — bulk strings are the
/// payload-carrying variant large enough for zero-copy to matter; the
/// framing-only variants (simple strings, errors, big numbers) stay owned.
type Anchor<'a> = Option<(&'a Arc<Segment>, usize)>;

/// Maximum nesting depth for arrays, maps and sets. Matches the source
/// parser's recursion guard: a message nested deeper than this is rejected
/// rather than risking a stack overflow on the connection thread.
pub const MAX_RECURSION_DEPTH: usize = 32;

/// A single decoded RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<RespValue>),
    Null,
    Map(Vec<(RespValue, RespValue)>),
    Set(Vec<RespValue>),
    Boolean(bool),
    BigNumber(Bytes),
}

impl RespValue {
    #[must_use]
    pub fn simple_string(s: impl Into<Bytes>) -> Self {
        Self::SimpleString(s.into())
    }

    #[must_use]
    pub fn error(s: impl Into<Bytes>) -> Self {
        Self::Error(s.into())
    }

    #[must_use]
    pub fn bulk(s: impl Into<Bytes>) -> Self {
        Self::BulkString(s.into())
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

}

/// Outcome of attempting to decode one value from a byte slice.
enum DecodeOutcome {
    Ok(RespValue, usize),
    Incomplete,
    Invalid,
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn decode_from(data: &[u8], depth: usize, base_offset: usize, anchor: Anchor) -> DecodeOutcome {
    if data.is_empty() {
        return DecodeOutcome::Incomplete;
    }

    if depth > MAX_RECURSION_DEPTH {
        return DecodeOutcome::Invalid;
    }

    match data[0] {
        b'+' => decode_line(data, |line| {
            RespValue::SimpleString(Bytes::new(line))
        }),
        b'-' => decode_line(data, |line| RespValue::Error(Bytes::new(line))),
        b':' => decode_integer(data),
        b'$' => decode_bulk_string(data, base_offset, anchor),
        b'*' => decode_array(data, depth, base_offset, anchor),
        b'%' => decode_map(data, depth, base_offset, anchor),
        b'~' => decode_set(data, depth, base_offset, anchor),
        b'#' => decode_boolean(data),
        b'(' => decode_line(data, |line| RespValue::BigNumber(Bytes::new(line))),
        _ => DecodeOutcome::Invalid,
    }
}

fn decode_line(data: &[u8], make: impl FnOnce(&[u8]) -> RespValue) -> DecodeOutcome {
    let Some(crlf) = find_crlf(data) else {
        return DecodeOutcome::Incomplete;
    };
    DecodeOutcome::Ok(make(&data[1..crlf]), crlf + 2)
}

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok()
}

fn decode_integer(data: &[u8]) -> DecodeOutcome {
    let Some(crlf) = find_crlf(data) else {
        return DecodeOutcome::Incomplete;
    };
    match parse_i64(&data[1..crlf]) {
        Some(n) => DecodeOutcome::Ok(RespValue::Integer(n), crlf + 2),
        None => DecodeOutcome::Invalid,
    }
}

fn decode_bulk_string(data: &[u8], base_offset: usize, anchor: Anchor) -> DecodeOutcome {
    let Some(crlf) = find_crlf(data) else {
        return DecodeOutcome::Incomplete;
    };
    let Some(len) = parse_i64(&data[1..crlf]) else {
        return DecodeOutcome::Invalid;
    };

    if len == -1 {
        return DecodeOutcome::Ok(RespValue::Null, crlf + 2);
    }
    if len < 0 {
        return DecodeOutcome::Invalid;
    }
    let len = len as usize;

    let content_start = crlf + 2;
    let total_needed = content_start + len + 2;
    if data.len() < total_needed {
        return DecodeOutcome::Incomplete;
    }

    let bytes = match anchor {
        Some((segment, seg_read_pos)) => {
            let start = seg_read_pos + base_offset + content_start;
            Bytes::anchored(Arc::clone(segment), start, start + len)
        }
        None => Bytes::new(&data[content_start..content_start + len]),
    };
    DecodeOutcome::Ok(RespValue::BulkString(bytes), total_needed)
}

fn decode_array(data: &[u8], depth: usize, base_offset: usize, anchor: Anchor) -> DecodeOutcome {
    let Some(crlf) = find_crlf(data) else {
        return DecodeOutcome::Incomplete;
    };
    let Some(count) = parse_i64(&data[1..crlf]) else {
        return DecodeOutcome::Invalid;
    };

    if count == -1 {
        return DecodeOutcome::Ok(RespValue::Null, crlf + 2);
    }
    if count < 0 {
        return DecodeOutcome::Invalid;
    }

    let mut items = Vec::with_capacity(count as usize);
    let mut pos = crlf + 2;
    for _ in 0..count {
        match decode_from(&data[pos..], depth + 1, base_offset + pos, anchor) {
            DecodeOutcome::Ok(value, consumed) => {
                items.push(value);
                pos += consumed;
            }
            other => return other,
        }
    }

    DecodeOutcome::Ok(RespValue::Array(items), pos)
}

fn decode_map(data: &[u8], depth: usize, base_offset: usize, anchor: Anchor) -> DecodeOutcome {
    let Some(crlf) = find_crlf(data) else {
        return DecodeOutcome::Incomplete;
    };
    let Some(count) = parse_i64(&data[1..crlf]) else {
        return DecodeOutcome::Invalid;
    };
    if count < 0 {
        return DecodeOutcome::Invalid;
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut pos = crlf + 2;
    for _ in 0..count {
        let key = match decode_from(&data[pos..], depth + 1, base_offset + pos, anchor) {
            DecodeOutcome::Ok(value, consumed) => {
                pos += consumed;
                value
            }
            other => return other,
        };
        let val = match decode_from(&data[pos..], depth + 1, base_offset + pos, anchor) {
            DecodeOutcome::Ok(value, consumed) => {
                pos += consumed;
                value
            }
            other => return other,
        };
        entries.push((key, val));
    }

    DecodeOutcome::Ok(RespValue::Map(entries), pos)
}

fn decode_set(data: &[u8], depth: usize, base_offset: usize, anchor: Anchor) -> DecodeOutcome {
    match decode_array(data, depth, base_offset, anchor) {
        DecodeOutcome::Ok(RespValue::Array(items), consumed) => {
            DecodeOutcome::Ok(RespValue::Set(items), consumed)
        }
        other => other,
    }
}

fn decode_boolean(data: &[u8]) -> DecodeOutcome {
    if data.len() < 4 {
        return DecodeOutcome::Incomplete;
    }
    if data[2] != b'\r' || data[3] != b'\n' {
        return DecodeOutcome::Invalid;
    }
    match data[1] {
        b't' => DecodeOutcome::Ok(RespValue::Boolean(true), 4),
        b'f' => DecodeOutcome::Ok(RespValue::Boolean(false), 4),
        _ => DecodeOutcome::Invalid,
    }
}

/// Attempts to decode one complete value off the front of `buffer`.
///
/// On success, consumes the bytes that made up the value and returns it.
/// Returns `Ok(None)` if the buffer doesn't yet hold a complete message.
/// Returns `Err` if the bytes present can never form a valid message.
pub fn decode(buffer: &mut SegmentedBuffer) -> crate::error::Result<Option<RespValue>> {
    let mut scratch = Vec::new();
    let available = buffer.size();
    if available == 0 {
        return Ok(None);
    }

    let Some(data) = buffer.peek_contiguous(available, &mut scratch) else {
        return Ok(None);
    };

    let anchor = match &data {
        Cow::Borrowed(_) => buffer.front_anchor().map(|seg| {
            let pos = seg.read_pos();
            (seg, pos)
        }),
        Cow::Owned(_) => None,
    };
    // `anchor` borrows a `Segment` owned by the `Option` above, which must
    // outlive the decode call; reborrow it as the `&Arc<Segment>` shape
    // `decode_from` expects.
    let anchor_ref = anchor.as_ref().map(|(seg, pos)| (seg, *pos));

    match decode_from(&data, 0, 0, anchor_ref) {
        DecodeOutcome::Ok(value, consumed) => {
            buffer.consume(consumed);
            Ok(Some(value))
        }
        DecodeOutcome::Incomplete => Ok(None),
        DecodeOutcome::Invalid => Err(Error::Protocol("malformed RESP message")),
    }
}

/// Encodes `value` into its RESP wire representation, appended to `out`.
pub fn encode(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_slice());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_slice());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(s) => {
            out.push(b'$');
            out.extend_from_slice(s.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(s.as_slice());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Null => {
            out.extend_from_slice(b"$-1\r\n");
        }
        RespValue::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode(item, out);
            }
        }
        RespValue::Map(entries) => {
            out.push(b'%');
            out.extend_from_slice(entries.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for (k, v) in entries {
                encode(k, out);
                encode(v, out);
            }
        }
        RespValue::Set(items) => {
            out.push(b'~');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode(item, out);
            }
        }
        RespValue::Boolean(b) => {
            out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
        }
        RespValue::BigNumber(s) => {
            out.push(b'(');
            out.extend_from_slice(s.as_slice());
            out.extend_from_slice(b"\r\n");
        }
    }
}

/// Convenience wrapper returning the encoded bytes directly.
#[must_use]
pub fn encode_to_vec(value: &RespValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentPool;
    use test_log::test;

    fn feed(bytes: &[u8]) -> SegmentedBuffer {
        let mut buf = SegmentedBuffer::new(SegmentPool::new());
        buf.append(bytes);
        buf
    }

    #[test]
    fn decodes_simple_string() {
        let mut buf = feed(b"+OK\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString(Bytes::from("OK")));
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn decodes_error() {
        let mut buf = feed(b"-ERR bad\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::Error(Bytes::from("ERR bad")));
    }

    #[test]
    fn decodes_integer() {
        let mut buf = feed(b":-42\r\n");
        assert_eq!(decode(&mut buf).unwrap().unwrap(), RespValue::Integer(-42));
    }

    #[test]
    fn decodes_null_bulk_string() {
        let mut buf = feed(b"$-1\r\n");
        assert_eq!(decode(&mut buf).unwrap().unwrap(), RespValue::Null);
    }

    #[test]
    fn decodes_null_array() {
        let mut buf = feed(b"*-1\r\n");
        assert_eq!(decode(&mut buf).unwrap().unwrap(), RespValue::Null);
    }

    #[test]
    fn decodes_bulk_string_with_embedded_crlf() {
        let mut buf = feed(b"$6\r\nfoo\r\nx\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::new(b"foo\r\nx")));
    }

    #[test]
    fn incomplete_returns_none_without_consuming() {
        let mut buf = feed(b"$5\r\nhel");
        assert!(decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.size(), 7);
    }

    #[test]
    fn anchored_bulk_strings_in_an_array_keep_correct_offsets() {
        // Regression check for `base_offset` threading: each bulk string's
        // anchored range must be computed relative to its own position in
        // the buffer, not the array's.
        let mut buf = feed(b"*3\r\n$3\r\nfoo\r\n$5\r\nhello\r\n$1\r\nx\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::bulk("foo"),
                RespValue::bulk("hello"),
                RespValue::bulk("x"),
            ])
        );
    }

    #[test]
    fn decodes_nested_array() {
        let mut buf = feed(b"*2\r\n$3\r\nfoo\r\n*1\r\n:1\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("foo")),
                RespValue::Array(vec![RespValue::Integer(1)]),
            ])
        );
    }

    #[test]
    fn rejects_excessive_recursion_depth() {
        let mut payload = Vec::new();
        for _ in 0..40 {
            payload.extend_from_slice(b"*1\r\n");
        }
        payload.extend_from_slice(b":1\r\n");
        let mut buf = feed(&payload);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn decodes_map_and_set() {
        let mut buf = feed(b"%1\r\n+k\r\n:1\r\n");
        assert_eq!(
            decode(&mut buf).unwrap().unwrap(),
            RespValue::Map(vec![(
                RespValue::SimpleString(Bytes::from("k")),
                RespValue::Integer(1)
            )])
        );

        let mut buf = feed(b"~1\r\n:5\r\n");
        assert_eq!(
            decode(&mut buf).unwrap().unwrap(),
            RespValue::Set(vec![RespValue::Integer(5)])
        );
    }

    #[test]
    fn decodes_boolean() {
        let mut buf = feed(b"#t\r\n");
        assert_eq!(decode(&mut buf).unwrap().unwrap(), RespValue::Boolean(true));
    }

    #[test]
    fn unknown_type_tag_is_invalid() {
        let mut buf = feed(b"!oops\r\n");
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn encode_array_roundtrip() {
        let value = RespValue::Array(vec![
            RespValue::bulk("SET"),
            RespValue::bulk("key"),
            RespValue::bulk("value"),
        ]);
        let encoded = encode_to_vec(&value);
        assert_eq!(
            encoded,
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n".to_vec()
        );

        let mut buf = feed(&encoded);
        assert_eq!(decode(&mut buf).unwrap().unwrap(), value);
    }

    #[test]
    fn encode_null_and_error() {
        assert_eq!(encode_to_vec(&RespValue::Null), b"$-1\r\n".to_vec());
        assert_eq!(
            encode_to_vec(&RespValue::error("ERR oops")),
            b"-ERR oops\r\n".to_vec()
        );
    }
}
