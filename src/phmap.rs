// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A progressively-rehashing open-chaining hash map.
//!
//! Rather than rehash the whole table in one (potentially huge) pause, the
//! map keeps two generations of buckets — `newer` and `older` — and moves a
//! bounded number of entries from `older` into `newer` on every mutation
//! ([`REHASHING_WORK`] nodes per call) until `older` is empty.
//!
//! Entries live in a slab (`Arena<T>`) addressed by [`NodeId`], standing in
//! for the source's intrusive `HNode*` links, which safe Rust can't express
//! directly.

const MAX_LOAD_FACTOR: usize = 8;
const REHASHING_WORK: usize = 128;
const INITIAL_BUCKETS: usize = 4;

/// A handle into the map's arena. Stable across rehashing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

enum Slot<T> {
    Occupied {
        code: u64,
        value: T,
        next: Option<NodeId>,
    },
    Free {
        next_free: Option<usize>,
    },
}

struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
        }
    }

    fn insert(&mut self, code: u64, value: T, next: Option<NodeId>) -> NodeId {
        let slot = Slot::Occupied { code, value, next };
        if let Some(idx) = self.free_head {
            let Slot::Free { next_free } = self.slots[idx] else {
                unreachable!("free list pointed at an occupied slot");
            };
            self.free_head = next_free;
            self.slots[idx] = slot;
            NodeId(idx)
        } else {
            self.slots.push(slot);
            NodeId(self.slots.len() - 1)
        }
    }

    fn remove(&mut self, id: NodeId) -> (u64, T, Option<NodeId>) {
        let slot = std::mem::replace(
            &mut self.slots[id.0],
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(id.0);
        match slot {
            Slot::Occupied { code, value, next } => (code, value, next),
            Slot::Free { .. } => unreachable!("removed a node twice"),
        }
    }

    fn get(&self, id: NodeId) -> &T {
        match &self.slots[id.0] {
            Slot::Occupied { value, .. } => value,
            Slot::Free { .. } => unreachable!("stale NodeId"),
        }
    }

    fn get_mut(&mut self, id: NodeId) -> &mut T {
        match &mut self.slots[id.0] {
            Slot::Occupied { value, .. } => value,
            Slot::Free { .. } => unreachable!("stale NodeId"),
        }
    }

    fn code_of(&self, id: NodeId) -> u64 {
        match &self.slots[id.0] {
            Slot::Occupied { code, .. } => *code,
            Slot::Free { .. } => unreachable!("stale NodeId"),
        }
    }

    fn next_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.slots[id.0] {
            Slot::Occupied { next, .. } => *next,
            Slot::Free { .. } => unreachable!("stale NodeId"),
        }
    }

    fn set_next(&mut self, id: NodeId, next: Option<NodeId>) {
        match &mut self.slots[id.0] {
            Slot::Occupied { next: n, .. } => *n = next,
            Slot::Free { .. } => unreachable!("stale NodeId"),
        }
    }
}

struct HashTable {
    buckets: Vec<Option<NodeId>>,
    mask: usize,
    size: usize,
}

impl HashTable {
    fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            mask: 0,
            size: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn init(size: usize) -> Self {
        assert!(size > 0 && (size - 1) & size == 0, "size must be power of two");
        Self {
            buckets: vec![None; size],
            mask: size - 1,
            size: 0,
        }
    }

    fn insert<T>(&mut self, arena: &mut Arena<T>, id: NodeId, code: u64) {
        let index = (code as usize) & self.mask;
        arena.set_next(id, self.buckets[index]);
        self.buckets[index] = Some(id);
        self.size += 1;
    }

    fn lookup<T>(
        &self,
        arena: &Arena<T>,
        code: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<(usize, Option<NodeId>, NodeId)> {
        if self.buckets.is_empty() {
            return None;
        }
        let index = (code as usize) & self.mask;
        let mut prev: Option<NodeId> = None;
        let mut curr = self.buckets[index];
        while let Some(id) = curr {
            if arena.code_of(id) == code && eq(arena.get(id)) {
                return Some((index, prev, id));
            }
            prev = Some(id);
            curr = arena.next_of(id);
        }
        None
    }

    fn detach<T>(&mut self, arena: &mut Arena<T>, index: usize, prev: Option<NodeId>, id: NodeId) {
        let next = arena.next_of(id);
        match prev {
            Some(p) => arena.set_next(p, next),
            None => self.buckets[index] = next,
        }
        self.size -= 1;
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.mask = 0;
        self.size = 0;
    }
}

/// A generic progressively-rehashing hash map over an opaque `code: u64` key
/// hash. Callers supply the hash and an equality predicate on each lookup,
/// mirroring the source's `HNodeEq` comparator style — this lets the same
/// map implementation back the main keyspace dictionary, hash-field tables,
/// and sorted-set member indexes without requiring `T: Hash + Eq`.
pub struct PHMap<T> {
    arena: Arena<T>,
    newer: HashTable,
    older: HashTable,
    migrate_position: usize,
}

impl<T> Default for PHMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PHMap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            newer: HashTable::empty(),
            older: HashTable::empty(),
            migrate_position: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.newer.size + self.older.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &T {
        self.arena.get(id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: NodeId) -> &mut T {
        self.arena.get_mut(id)
    }

    pub fn lookup(&mut self, code: u64, mut eq: impl FnMut(&T) -> bool) -> Option<NodeId> {
        self.help_rehashing();
        if let Some((_, _, id)) = self.older.lookup(&self.arena, code, &mut eq) {
            return Some(id);
        }
        self.newer.lookup(&self.arena, code, &mut eq).map(|(_, _, id)| id)
    }

    pub fn insert(&mut self, code: u64, value: T) -> NodeId {
        if self.newer.is_empty() {
            self.newer = HashTable::init(INITIAL_BUCKETS);
        }

        let id = self.arena.insert(code, value, None);
        self.newer.insert(&mut self.arena, id, code);

        if self.older.is_empty() {
            let threshold = (self.newer.mask + 1) * MAX_LOAD_FACTOR;
            if self.newer.size >= threshold {
                self.trigger_rehashing();
            }
        }
        self.help_rehashing();
        id
    }

    pub fn remove(&mut self, code: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        self.help_rehashing();

        if let Some((index, prev, id)) = self.newer.lookup(&self.arena, code, &mut eq) {
            self.newer.detach(&mut self.arena, index, prev, id);
            let (_, value, _) = self.arena.remove(id);
            return Some(value);
        }
        if let Some((index, prev, id)) = self.older.lookup(&self.arena, code, &mut eq) {
            self.older.detach(&mut self.arena, index, prev, id);
            let (_, value, _) = self.arena.remove(id);
            return Some(value);
        }
        None
    }

    pub fn clear(&mut self) {
        self.newer.clear();
        self.older.clear();
        self.arena = Arena::new();
        self.migrate_position = 0;
    }

    fn trigger_rehashing(&mut self) {
        debug_assert!(!self.newer.is_empty());
        self.older = std::mem::replace(&mut self.newer, HashTable::empty());
        self.newer = HashTable::init((self.older.mask + 1) * 2);
        self.migrate_position = 0;
    }

    fn help_rehashing(&mut self) {
        let mut nwork = 0;
        while nwork < REHASHING_WORK && self.older.size > 0 {
            if self.migrate_position >= self.older.buckets.len() {
                break;
            }
            let Some(id) = self.older.buckets[self.migrate_position] else {
                self.migrate_position += 1;
                continue;
            };
            self.older
                .detach(&mut self.arena, self.migrate_position, None, id);
            let code = self.arena.code_of(id);
            self.newer.insert(&mut self.arena, id, code);
            nwork += 1;
        }
        if self.older.size == 0 && !self.older.is_empty() {
            self.older.clear();
        }
    }

    /// Visits every value currently stored in the map. Order is unspecified
    /// and may include entries from both generations while a rehash is in
    /// flight.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.newer
            .buckets
            .iter()
            .chain(self.older.buckets.iter())
            .flat_map(move |head| ChainIter {
                arena: &self.arena,
                current: *head,
            })
    }
}

struct ChainIter<'a, T> {
    arena: &'a Arena<T>,
    current: Option<NodeId>,
}

impl<'a, T> Iterator for ChainIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.arena.next_of(id);
        Some(self.arena.get(id))
    }
}
