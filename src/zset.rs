// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A sorted set: a `(score, member)` index backed by [`OsTree`] for ordered
//! range queries, kept in sync with a `member -> score` [`PHMap`] index for
//! O(1) membership lookups. This is the composite structure behind `ZADD`,
//! `ZSCORE`, `ZRANK` and the `ZRANGE*` family.

use crate::bytes::Bytes;
use crate::hash::hash64;
use crate::ostree::{self, OsTree};
use crate::phmap::{self, PHMap};
use std::cmp::Ordering;

/// A single sorted-set element as stored in the ordering tree.
#[derive(Clone, Debug)]
pub struct ZMember {
    pub name: Bytes,
    pub score: f64,
}

/// Orders members ascending by score, then by name to break ties — matches
/// the source's `ZNode::less`. Uses `total_cmp` so a stray NaN score can
/// never corrupt the tree's invariants.
fn member_cmp(member: &ZMember, score: f64, name: &[u8]) -> Ordering {
    match member.score.total_cmp(&score) {
        Ordering::Equal => member.name.as_slice().cmp(name),
        other => other,
    }
}

fn score_name_less(a: &ZMember, b: &ZMember) -> bool {
    member_cmp(a, b.score, b.name.as_slice()) == Ordering::Less
}

struct IndexEntry {
    name: Bytes,
    score: f64,
    tree_id: ostree::NodeId,
}

/// A sorted set of unique members, each carrying a floating-point score.
#[derive(Default)]
pub struct ZSet {
    tree: OsTree<ZMember>,
    index: PHMap<IndexEntry>,
}

impl ZSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: OsTree::new(),
            index: PHMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn find_index(&mut self, name: &[u8]) -> Option<phmap::NodeId> {
        self.index
            .lookup(hash64(name), |e| e.name.as_slice() == name)
    }

    #[must_use]
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        self.find_index(name).map(|id| self.index.get(id).score)
    }

    pub fn contains(&mut self, name: &[u8]) -> bool {
        self.find_index(name).is_some()
    }

    /// Inserts `name` with `score`, or updates its score if already present.
    /// Returns `true` if this added a brand-new member.
    pub fn insert(&mut self, name: Bytes, score: f64) -> bool {
        if let Some(idx_id) = self.find_index(name.as_slice()) {
            let old_score = self.index.get(idx_id).score;
            let removed = self
                .tree
                .remove(|m| member_cmp(m, old_score, name.as_slice()).reverse());
            debug_assert!(removed.is_some(), "index and tree out of sync");

            let new_tree_id = self.tree.insert(
                ZMember {
                    name: name.clone(),
                    score,
                },
                score_name_less,
            );
            let entry = self.index.get_mut(idx_id);
            entry.score = score;
            entry.tree_id = new_tree_id;
            return false;
        }

        let tree_id = self.tree.insert(
            ZMember {
                name: name.clone(),
                score,
            },
            score_name_less,
        );
        let code = hash64(name.as_slice());
        self.index.insert(
            code,
            IndexEntry {
                name,
                score,
                tree_id,
            },
        );
        true
    }

    /// Removes `name`, returning its former score.
    pub fn remove(&mut self, name: &[u8]) -> Option<f64> {
        let idx_id = self.find_index(name)?;
        let score = self.index.get(idx_id).score;

        self.index.remove(hash64(name), |e| e.name.as_slice() == name);
        self.tree.remove(|m| member_cmp(m, score, name).reverse());
        Some(score)
    }

    /// Zero-based rank of `name` in ascending `(score, name)` order.
    pub fn rank(&mut self, name: &[u8]) -> Option<u32> {
        let idx_id = self.find_index(name)?;
        let tree_id = self.index.get(idx_id).tree_id;
        Some(self.tree.rank(tree_id))
    }

    /// The leftmost member not ordered strictly before `(score, name)`.
    #[must_use]
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<&ZMember> {
        let id = self
            .tree
            .seek_ge(|m| member_cmp(m, score, name) == Ordering::Less)?;
        Some(self.tree.get(id))
    }

    /// The member at zero-based rank `rank` in ascending order, if any.
    #[must_use]
    pub fn nth(&self, rank: u32) -> Option<&ZMember> {
        self.tree.nth(rank).map(|id| self.tree.get(id))
    }

    /// Ascending iteration over every member.
    pub fn iter(&self) -> impl Iterator<Item = &ZMember> {
        self.tree.iter()
    }
}
