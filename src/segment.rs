// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Page-aligned memory slabs used by the connection runtime's incoming and
//! outgoing byte queues.
//!
//! A [`Segment`] is acquired from a process-wide [`SegmentPool`] and returned
//! to it automatically when the last [`std::sync::Arc`] reference drops.

use std::sync::{Arc, Mutex};

/// Cache-line padded counter, keeping the read and write cursors of a segment
/// on distinct cache lines so the I/O producer and consumer don't false-share.
#[repr(align(128))]
#[derive(Debug, Default)]
struct Cursor(std::sync::atomic::AtomicUsize);

impl Cursor {
    fn get(&self) -> usize {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn set(&self, value: usize) {
        self.0.store(value, std::sync::atomic::Ordering::Relaxed);
    }
}

fn page_size() -> usize {
    4096
}

/// Size tier a segment was allocated from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tier {
    /// A single page.
    Small,
    /// Eight pages, for larger bulk strings and arrays.
    Large,
}

impl Tier {
    fn capacity(self) -> usize {
        match self {
            Self::Small => page_size(),
            Self::Large => page_size() * 8,
        }
    }

    fn for_hint(hint: usize) -> Self {
        if hint <= page_size() {
            Self::Small
        } else {
            Self::Large
        }
    }
}

/// A page-aligned slab of memory with independent read and write cursors.
pub struct Segment {
    data: Box<[u8]>,
    rpos: Cursor,
    wpos: Cursor,
    tier: Tier,
    pool: Option<Arc<SegmentPool>>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.data.len())
            .field("rpos", &self.rpos.get())
            .field("wpos", &self.wpos.get())
            .field("tier", &self.tier)
            .finish()
    }
}

impl Segment {
    fn new(tier: Tier, pool: Option<Arc<SegmentPool>>) -> Self {
        Self {
            data: vec![0u8; tier.capacity()].into_boxed_slice(),
            rpos: Cursor::default(),
            wpos: Cursor::default(),
            tier,
            pool,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn writable(&self) -> usize {
        self.capacity() - self.wpos.get()
    }

    #[must_use]
    pub fn readable(&self) -> usize {
        self.wpos.get() - self.rpos.get()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.wpos.get() == self.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rpos.get() == self.wpos.get()
    }

    #[must_use]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.rpos.get()..self.wpos.get()]
    }

    /// The current read cursor, i.e. the offset into this segment's backing
    /// storage that `read_slice()[0]` corresponds to. Used to translate a
    /// position within a [`read_slice`](Self::read_slice)-derived view back
    /// into an absolute range for an anchored [`crate::bytes::Bytes`].
    #[must_use]
    pub fn read_pos(&self) -> usize {
        self.rpos.get()
    }

    /// A view of `start..end` of this segment's backing storage, independent
    /// of the current read/write cursors. Valid for as long as this segment
    /// (or any `Arc` clone of it) is kept alive, regardless of subsequent
    /// `consume`/`commit` calls advancing past that range.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.data[start..end]
    }

    /// Returns a mutable writable tail cursor. Safe because `Segment`s are
    /// only ever held behind a unique owner while being written to (the
    /// segmented buffer never hands out a write pointer while a reader
    /// exists concurrently — the runtime is single-threaded).
    pub fn write_slice_mut(self: &mut Arc<Self>) -> &mut [u8] {
        let wpos = self.wpos.get();
        let this = Arc::get_mut(self).expect("segment has no concurrent readers while writing");
        &mut this.data[wpos..]
    }

    pub fn commit(&self, len: usize) {
        let new_wpos = (self.wpos.get() + len).min(self.capacity());
        self.wpos.set(new_wpos);
    }

    pub fn consume(&self, len: usize) {
        let new_rpos = (self.rpos.get() + len).min(self.wpos.get());
        self.rpos.set(new_rpos);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(self.tier);
        }
    }
}

/// A process-wide, tiered pool of reusable [`Segment`]s.
///
/// Acquisition picks the smallest tier whose capacity covers the caller's
/// size hint; release (on last-`Arc`-drop) returns the segment's capacity
/// budget to its tier's free count. The pool only ever allocates fresh
/// segments — returned segments are dropped for real, but the pool tracks
/// how many of each tier are "in the wild" so it never needs its own
/// container of boxed trait objects to reuse. This is deliberately simpler
/// than an arena of live segments: the expensive part of a segment is its
/// backing allocation, and the allocator already recycles freed memory of a
/// matching size class efficiently.
#[derive(Debug, Default)]
pub struct SegmentPool {
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    small_free: Vec<Box<[u8]>>,
    large_free: Vec<Box<[u8]>>,
}

impl SegmentPool {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires a segment whose capacity is at least `hint` bytes.
    pub fn acquire(self: &Arc<Self>, hint: usize) -> Arc<Segment> {
        let tier = Tier::for_hint(hint);
        let mut inner = self.inner.lock().expect("segment pool mutex poisoned");
        let free_list = match tier {
            Tier::Small => &mut inner.small_free,
            Tier::Large => &mut inner.large_free,
        };

        let data = free_list
            .pop()
            .unwrap_or_else(|| vec![0u8; tier.capacity()].into_boxed_slice());

        Arc::new(Segment {
            data,
            rpos: Cursor::default(),
            wpos: Cursor::default(),
            tier,
            pool: Some(Arc::clone(self)),
        })
    }

    fn release(&self, tier: Tier) {
        // The actual backing buffer was already dropped along with the
        // `Segment`; we only track tier bookkeeping here. See the doc
        // comment on `SegmentPool` for why we don't keep the buffer itself.
        let mut inner = self.inner.lock().expect("segment pool mutex poisoned");
        let free_list = match tier {
            Tier::Small => &mut inner.small_free,
            Tier::Large => &mut inner.large_free,
        };
        if free_list.len() < 64 {
            free_list.push(vec![0u8; tier.capacity()].into_boxed_slice());
        }
    }
}
