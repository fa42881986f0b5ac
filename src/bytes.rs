// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segment::Segment;
use byteview::ByteView;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Repr {
    Owned(ByteView),
    /// A zero-copy view into a decode buffer's segment: `start..end` of its
    /// backing storage, independent of the segment's own read/write cursors.
    /// The `Arc` keeps the segment (and therefore the bytes) alive for as
    /// long as this value, or any clone of it, exists.
    Anchored { segment: Arc<Segment>, start: usize, end: usize },
}

/// An immutable byte string, either independently owned or a zero-copy view
/// anchored on the wire buffer it was decoded from.
///
/// Owned bytes clone without additional heap allocation. Anchored bytes
/// clone just as cheaply (an `Arc` bump) but keep their backing segment
/// pinned in memory — call [`Bytes::materialize`] before a value needs to
/// outlive the connection buffer it came from. The keyspace does this for
/// every key, field and value it stores, since those must survive long
/// after the request that produced them.
#[derive(Debug, Clone)]
pub struct Bytes(Repr);

impl Bytes {
    /// Constructs a [`Bytes`] from a byte slice, copying it.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(Repr::Owned(bytes.into()))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(Repr::Owned(ByteView::new(&[])))
    }

    /// A zero-copy view of `segment`'s `start..end` byte range.
    #[must_use]
    pub fn anchored(segment: Arc<Segment>, start: usize, end: usize) -> Self {
        Self(Repr::Anchored { segment, start, end })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.0 {
            Repr::Owned(v) => v,
            Repr::Anchored { segment, start, end } => segment.slice(*start, *end),
        }
    }

    /// Copies an anchored view into independently-owned storage. A cheap
    /// clone, not a copy, if this value is already owned.
    #[must_use]
    pub fn materialize(&self) -> Self {
        match &self.0 {
            Repr::Owned(_) => self.clone(),
            Repr::Anchored { .. } => Self::new(self.as_slice()),
        }
    }

    /// Parses the bytes as a UTF-8-lossy string, for display purposes only.
    #[must_use]
    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_slice())
    }
}

impl Default for Bytes {
    fn default() -> Self {
        Self::empty()
    }
}

impl Eq for Bytes {}

impl std::hash::Hash for Bytes {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl Ord for Bytes {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl std::borrow::Borrow<[u8]> for Bytes {
    fn borrow(&self) -> &[u8] {
        self
    }
}

impl From<&[u8]> for Bytes {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self(Repr::Owned(ByteView::from(value)))
    }
}

impl From<&Vec<u8>> for Bytes {
    fn from(value: &Vec<u8>) -> Self {
        Self::new(value.as_slice())
    }
}

impl From<&str> for Bytes {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Bytes {
    fn from(value: String) -> Self {
        Self(Repr::Owned(ByteView::from(value.into_bytes())))
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(value: [u8; N]) -> Self {
        Self::new(value.as_slice())
    }
}

impl<T: AsRef<[u8]>> PartialEq<T> for Bytes {
    fn eq(&self, other: &T) -> bool {
        self.as_slice() == other.as_ref()
    }
}

impl<T: AsRef<[u8]>> PartialOrd<T> for Bytes {
    fn partial_cmp(&self, other: &T) -> Option<std::cmp::Ordering> {
        self.as_slice().partial_cmp(other.as_ref())
    }
}

impl std::fmt::Display for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::Bytes;
    use crate::segment::SegmentPool;
    use test_log::test;

    #[test]
    fn bytes_roundtrip() {
        let b: Bytes = "hello".into();
        assert_eq!(b, "hello".as_bytes());
        assert_eq!(b.clone(), b);
    }

    #[test]
    fn bytes_empty() {
        assert_eq!(Bytes::empty(), []);
    }

    #[test]
    fn bytes_ordering() {
        let a: Bytes = "aaa".into();
        let b: Bytes = "aab".into();
        assert!(a < b);
    }

    #[test]
    fn anchored_bytes_compare_equal_to_owned_bytes_with_same_content() {
        let pool = SegmentPool::new();
        let mut seg = pool.acquire(16);
        seg.write_slice_mut()[..5].copy_from_slice(b"hello");
        seg.commit(5);

        let anchored = Bytes::anchored(seg, 0, 5);
        assert_eq!(anchored, Bytes::from("hello"));
        assert_eq!(anchored.clone(), Bytes::from("hello"));
    }

    #[test]
    fn materialize_detaches_an_anchored_value_from_its_segment() {
        let pool = SegmentPool::new();
        let mut seg = pool.acquire(16);
        seg.write_slice_mut()[..3].copy_from_slice(b"abc");
        seg.commit(3);

        let anchored = Bytes::anchored(seg, 0, 3);
        let owned = anchored.materialize();
        assert_eq!(owned, Bytes::from("abc"));
        // A materialized value no longer holds the segment's Arc alive via
        // this handle; dropping `anchored` wouldn't affect `owned`.
        drop(anchored);
        assert_eq!(owned, Bytes::from("abc"));
    }
}
