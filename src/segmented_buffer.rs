// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A non-contiguous byte queue built from [`Segment`]s, giving the connection
//! runtime a zero-copy write path into socket reads and a zero-copy read path
//! into the RESP codec.

use crate::segment::{Segment, SegmentPool};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;

/// An ordered queue of segments presenting a contiguous-like byte stream.
pub struct SegmentedBuffer {
    pool: Arc<SegmentPool>,
    segments: VecDeque<Arc<Segment>>,
    total_size: usize,
}

impl SegmentedBuffer {
    #[must_use]
    pub fn new(pool: Arc<SegmentPool>) -> Self {
        Self {
            pool,
            segments: VecDeque::new(),
            total_size: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.total_size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Copy-appends `data`, extending with fresh segments as needed.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.segments.back().is_none_or(|s| s.writable() == 0) {
                self.segments.push_back(self.pool.acquire(data.len()));
            }

            let last = self.segments.back_mut().expect("just ensured non-empty");
            let to_write = last.writable().min(data.len());
            last.write_slice_mut()[..to_write].copy_from_slice(&data[..to_write]);
            last.commit(to_write);

            data = &data[to_write..];
            self.total_size += to_write;
        }
    }

    /// Zero-copy hook: ensures the tail segment has writable capacity and
    /// returns a mutable view into it. The caller (socket read) commits the
    /// bytes it actually wrote via [`SegmentedBuffer::commit_write`].
    pub fn write_ptr(&mut self, hint: usize) -> &mut [u8] {
        if self.segments.back().is_none_or(|s| s.writable() == 0) {
            self.segments.push_back(self.pool.acquire(hint));
        }
        self.segments
            .back_mut()
            .expect("just ensured non-empty")
            .write_slice_mut()
    }

    pub fn commit_write(&mut self, len: usize) {
        if let Some(last) = self.segments.back() {
            last.commit(len);
            self.total_size += len;
        }
    }

    /// A view of the readable bytes of the first segment only. May be
    /// shorter than [`SegmentedBuffer::size`] if the data spans segments.
    #[must_use]
    pub fn peek(&self) -> &[u8] {
        self.segments
            .front()
            .map(|s| s.read_slice())
            .unwrap_or(&[])
    }

    /// A guaranteed-contiguous view of the first `len` bytes. Borrowed
    /// (no copy) when `len` already lies entirely within the head segment —
    /// the common case — and paired with [`SegmentedBuffer::front_anchor`]
    /// this is what lets the RESP codec hand out zero-copy bulk strings.
    /// Falls back to assembling the bytes into `scratch` when the span
    /// crosses a segment boundary. Returns `None` if fewer than `len` bytes
    /// are readable.
    pub fn peek_contiguous<'a>(&'a self, len: usize, scratch: &'a mut Vec<u8>) -> Option<Cow<'a, [u8]>> {
        if self.total_size < len {
            return None;
        }

        let first = self.segments.front()?;
        if first.readable() >= len {
            return Some(Cow::Borrowed(&first.read_slice()[..len]));
        }

        scratch.clear();
        scratch.reserve(len);
        let mut collected = 0;
        for seg in &self.segments {
            let to_collect = (len - collected).min(seg.readable());
            scratch.extend_from_slice(&seg.read_slice()[..to_collect]);
            collected += to_collect;
            if collected == len {
                break;
            }
        }
        Some(Cow::Owned(std::mem::take(scratch)))
    }

    /// A shared handle on the head segment, keeping it alive for any
    /// zero-copy view anchored on it (e.g. a decoded RESP bulk string)
    /// independent of subsequent `consume` calls advancing past it. Only
    /// meaningful paired with the borrowed branch of `peek_contiguous`.
    #[must_use]
    pub fn front_anchor(&self) -> Option<Arc<Segment>> {
        self.segments.front().cloned()
    }

    /// O(1) advance, dropping fully-read head segments.
    pub fn consume(&mut self, len: usize) {
        let mut to_consume = len.min(self.total_size);
        self.total_size -= to_consume;

        while to_consume > 0 {
            let Some(first) = self.segments.front() else {
                break;
            };
            let can_consume = to_consume.min(first.readable());
            first.consume(can_consume);
            to_consume -= can_consume;

            if first.readable() == 0 {
                self.segments.pop_front();
            } else {
                break;
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentPool;
    use test_log::test;

    fn buf() -> SegmentedBuffer {
        SegmentedBuffer::new(SegmentPool::new())
    }

    #[test]
    fn append_and_peek() {
        let mut b = buf();
        b.append(b"hello world");
        assert_eq!(b.size(), 11);
        assert_eq!(b.peek(), b"hello world");
    }

    #[test]
    fn consume_decreases_size_exactly() {
        let mut b = buf();
        b.append(b"0123456789");
        b.consume(4);
        assert_eq!(b.size(), 6);
        assert_eq!(b.peek(), b"456789");
        b.consume(100);
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn append_spanning_segments_then_peek_contiguous() {
        let mut b = buf();
        // Force a second segment by writing more than one page.
        let chunk = vec![b'a'; 5000];
        b.append(&chunk);
        b.append(b"tail-marker");

        let mut scratch = Vec::new();
        let view = b.peek_contiguous(5000 + 11, &mut scratch).unwrap();
        assert!(matches!(view, Cow::Owned(_)), "a span crossing segments must copy");
        assert_eq!(&view[5000..], b"tail-marker");
    }

    #[test]
    fn peek_contiguous_borrows_when_already_contiguous() {
        let mut b = buf();
        b.append(b"hello world");
        let mut scratch = Vec::new();
        let view = b.peek_contiguous(5, &mut scratch).unwrap();
        assert!(matches!(view, Cow::Borrowed(_)), "a view within one segment must not copy");
        assert_eq!(&view[..], b"hello");
    }

    #[test]
    fn peek_contiguous_none_when_insufficient() {
        let mut b = buf();
        b.append(b"short");
        let mut scratch = Vec::new();
        assert!(b.peek_contiguous(100, &mut scratch).is_none());
    }

    #[test]
    fn front_anchor_keeps_segment_alive_after_consume() {
        let mut b = buf();
        b.append(b"abc");
        let anchor = b.front_anchor().unwrap();
        let pos = anchor.read_pos();
        b.consume(3);
        // The segmented buffer has advanced past and may have dropped its
        // own reference, but the anchor's bytes are still readable.
        assert_eq!(anchor.slice(pos, pos + 3), b"abc");
    }

    #[test]
    fn write_ptr_zero_copy_roundtrip() {
        let mut b = buf();
        {
            let dst = b.write_ptr(16);
            dst[..5].copy_from_slice(b"zcopy");
        }
        b.commit_write(5);
        assert_eq!(b.peek(), b"zcopy");
    }
}
