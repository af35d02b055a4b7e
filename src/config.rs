// src/config.rs
//! Layout constants and runtime configuration for SealFS.

/// Plaintext size of one data block.
pub const BLOCK_SIZE: usize = 4096;

/// Plaintext size of one encoded inode record (bincode, zero padded).
pub const INODE_RECORD_SIZE: usize = 2048;

/// ChaCha20-Poly1305 nonce length.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Length of the symmetric session key.
pub const KEY_SIZE: usize = 32;

/// Sealing overhead added to every persisted unit.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

pub const INODES_PER_VOLUME: u32 = 32768;
pub const BLOCKS_PER_VOLUME: u32 = 32768;

/// Hard upper bound on the number of volumes a superblock can describe.
pub const MAX_VOLUMES: u32 = 10;

/// Fixed on-disk size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 16384;

pub const MAX_CHILDREN: usize = 128;
pub const MAX_BLOCKS_PER_INODE: usize = 64;
pub const MAX_PATH_LENGTH: usize = 256;
pub const MAX_NAME_LENGTH: usize = 255;

/// Children slot marker for an entry that no longer references an inode.
pub const UNUSED_CHILD: u32 = u32::MAX;

/// Superblock paths with this prefix are fetched from remote storage.
pub const REMOTE_PREFIX: &str = "remote://";

/// Runtime parameters of a filesystem session.
///
/// Capacities only apply when a superblock is created; an existing superblock
/// keeps the geometry it was formatted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    pub block_size: usize,
    pub inodes_per_volume: u32,
    pub blocks_per_volume: u32,
    pub max_volumes: u32,
    /// Fail block reads whose Merkle verification disagrees with the root.
    pub strict_integrity: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            inodes_per_volume: INODES_PER_VOLUME,
            blocks_per_volume: BLOCKS_PER_VOLUME,
            max_volumes: MAX_VOLUMES,
            strict_integrity: true,
        }
    }
}

impl FsConfig {
    /// Creates a configuration with custom per-volume capacities.
    ///
    /// Capacities are rounded up to a multiple of 8 so each bitmap is a whole
    /// number of bytes.
    pub fn new(inodes_per_volume: u32, blocks_per_volume: u32, max_volumes: u32) -> Self {
        Self {
            inodes_per_volume: round_to_byte(inodes_per_volume),
            blocks_per_volume: round_to_byte(blocks_per_volume),
            max_volumes: max_volumes.clamp(1, MAX_VOLUMES),
            ..Self::default()
        }
    }

    /// Tiny geometry for tests: whole-tree rewrites stay cheap.
    pub fn small() -> Self {
        Self::new(16, 16, 4)
    }

    pub fn with_strict_integrity(mut self, strict: bool) -> Self {
        self.strict_integrity = strict;
        self
    }
}

fn round_to_byte(capacity: u32) -> u32 {
    capacity.max(8).div_ceil(8) * 8
}
