//! Per-originator sequence tracking for duplicate suppression
//!
//! Used for broadcast data frames (mesh seqno) and for PREQ identifiers.
//! Memory is bounded: the least recently seen originator is evicted once
//! `capacity` originators are tracked.

use lru::LruCache;
use std::num::NonZeroUsize;

use hwmp_protocol::{is_newer, MeshAddress};

/// Highest sequence value seen per originator
#[derive(Debug)]
pub struct SequenceFilter {
    seen: LruCache<MeshAddress, u32>,
}

impl SequenceFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        SequenceFilter {
            seen: LruCache::new(capacity),
        }
    }

    /// Record `seq` for `originator` if it is newer than anything seen.
    ///
    /// Returns false for a repeat (equal or older value); the record is then
    /// left unchanged.
    pub fn observe(&mut self, originator: MeshAddress, seq: u32) -> bool {
        match self.seen.get_mut(&originator) {
            Some(last) if !is_newer(seq, *last) => false,
            Some(last) => {
                *last = seq;
                true
            }
            None => {
                self.seen.put(originator, seq);
                true
            }
        }
    }

    pub fn last_seen(&self, originator: &MeshAddress) -> Option<u32> {
        self.seen.peek(originator).copied()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
