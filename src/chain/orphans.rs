//! Blocks waiting for their parent
//!
//! Bounded: once full, the oldest orphan is dropped to make room. A dropped
//! orphan is simply fetched again if a later head still needs it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::crypto::Hash;
use crate::types::Block;

#[derive(Debug)]
pub struct OrphanPool {
    capacity: usize,
    by_parent: HashMap<Hash, Vec<Block>>,
    known: HashSet<Hash>,
    /// (parent, block) in arrival order
    arrival: VecDeque<(Hash, Hash)>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_parent: HashMap::new(),
            known: HashSet::new(),
            arrival: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.known.contains(hash)
    }

    /// Returns false if the block was already held
    pub fn insert(&mut self, block: Block) -> bool {
        let hash = block.hash();
        if self.known.contains(&hash) {
            return false;
        }
        while self.known.len() >= self.capacity {
            let Some((parent, oldest)) = self.arrival.pop_front() else {
                break;
            };
            self.remove(&parent, &oldest);
        }
        let parent = *block.previous_hash();
        self.known.insert(hash);
        self.arrival.push_back((parent, hash));
        self.by_parent.entry(parent).or_default().push(block);
        true
    }

    fn remove(&mut self, parent: &Hash, hash: &Hash) {
        if !self.known.remove(hash) {
            return;
        }
        if let Some(children) = self.by_parent.get_mut(parent) {
            children.retain(|child| child.hash() != *hash);
            if children.is_empty() {
                self.by_parent.remove(parent);
            }
        }
    }

    /// Remove and return every orphan whose parent is `parent`
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        for child in &children {
            self.known.remove(&child.hash());
        }
        self.arrival.retain(|(p, _)| p != parent);
        children
    }

    pub fn clear(&mut self) {
        self.by_parent.clear();
        self.known.clear();
        self.arrival.clear();
    }
}
