// src/address.rs
//! Global addressing of inodes and blocks across volumes.
//!
//! A single integer names an inode (or a block) anywhere in the filesystem:
//! `volume = index / capacity`, `offset = index % capacity`. Inodes and blocks
//! use the same rule with their own per-volume capacities.

use crate::config::UNUSED_CHILD;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct GlobalIndex(pub u32);

/// Position of a global index inside one volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub volume: u32,
    pub offset: u32,
}

impl GlobalIndex {
    pub const ROOT: GlobalIndex = GlobalIndex(0);

    /// Marks a children slot that no longer references an inode.
    pub const UNUSED: GlobalIndex = GlobalIndex(UNUSED_CHILD);

    pub fn from_parts(volume: u32, offset: u32, capacity: u32) -> Self {
        debug_assert!(offset < capacity);
        GlobalIndex(volume * capacity + offset)
    }

    pub fn locate(self, capacity: u32) -> Location {
        Location {
            volume: self.0 / capacity,
            offset: self.0 % capacity,
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_unused(self) -> bool {
        self == Self::UNUSED
    }
}

impl fmt::Display for GlobalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_first_volume() {
        let loc = GlobalIndex(5).locate(16);
        assert_eq!(loc, Location { volume: 0, offset: 5 });
    }

    #[test]
    fn test_locate_crosses_volume_boundary() {
        assert_eq!(GlobalIndex(15).locate(16), Location { volume: 0, offset: 15 });
        assert_eq!(GlobalIndex(16).locate(16), Location { volume: 1, offset: 0 });
        assert_eq!(GlobalIndex(37).locate(16), Location { volume: 2, offset: 5 });
    }

    #[test]
    fn test_from_parts_inverts_locate() {
        for raw in [0u32, 1, 31, 32, 33, 32767, 32768, 98304 + 17] {
            let index = GlobalIndex(raw);
            let loc = index.locate(32768);
            assert_eq!(GlobalIndex::from_parts(loc.volume, loc.offset, 32768), index);
        }
    }

    #[test]
    fn test_inode_and_block_capacities_are_independent() {
        let index = GlobalIndex(40);
        assert_eq!(index.locate(16).volume, 2);
        assert_eq!(index.locate(64).volume, 0);
    }
}
