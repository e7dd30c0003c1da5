//! The GNU-style symbol hash table (`.gnu.hash`), used by the loader for
//! fast symbol lookup.
//!
//! The table is carried opaquely: the editor never rehashes anything, it
//! only relocates the section and rewrites the DT_GNU_HASH pointer.

use crate::elf::ident::Class;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// The decoded `.gnu.hash` section
pub struct GnuHashTable {
    /// Index of the first symbol the buckets can reach
    pub symoffset: u32,
    /// Shift count applied to the second bloom hash
    pub bloom_shift: u32,
    /// Bloom filter words (one N-word each)
    pub bloom: Vec<u64>,
    /// Hash buckets
    pub buckets: Vec<u32>,
    /// Hash chain values
    pub chain: Vec<u32>,
}

impl GnuHashTable {
    /// Check if this table is absent
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.bloom.is_empty()
    }

    /// Size in bytes of this table for `class`
    ///
    /// 16 header bytes, one N-word per bloom entry, 4 bytes per bucket and
    /// per chain value.
    pub fn byte_count(&self, class: Class) -> u64 {
        16 + class.n_word_size() * self.bloom.len() as u64
            + 4 * (self.buckets.len() + self.chain.len()) as u64
    }
}
