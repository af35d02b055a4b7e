// src/bitmap.rs
use crate::error::{FsError, Result};
use crate::storage;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Which of the two per-volume bit arrays an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitmapKind {
    Inode,
    Block,
}

/// Free/used bitmaps of one volume. A set bit means "in use".
///
/// Index 0 of both arrays is reserved: the root inode and the sentinel block
/// in volume 0, and an unused slot in every later volume.
/// On disk: inode bytes followed by block bytes. Bits past the configured
/// capacity only pad the last byte and are never handed out.
pub struct Bitmap {
    path: PathBuf,
    inodes: Vec<u8>,
    blocks: Vec<u8>,
    inode_capacity: u32,
    block_capacity: u32,
}

impl Bitmap {
    /// Fresh bitmap with only the reserved index 0 set, persisted to `path`.
    pub fn create(path: &Path, inode_capacity: u32, block_capacity: u32) -> Result<Self> {
        let mut bitmap = Bitmap {
            path: path.to_path_buf(),
            inodes: vec![0u8; byte_len(inode_capacity)],
            blocks: vec![0u8; byte_len(block_capacity)],
            inode_capacity,
            block_capacity,
        };
        set_bit(&mut bitmap.inodes, 0);
        set_bit(&mut bitmap.blocks, 0);
        bitmap.persist()?;
        Ok(bitmap)
    }

    pub fn load(path: &Path, inode_capacity: u32, block_capacity: u32) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let inode_len = byte_len(inode_capacity);
        let block_len = byte_len(block_capacity);
        if raw.len() != inode_len + block_len {
            return Err(FsError::InvalidFormat(format!(
                "bitmap {:?} is {} bytes, expected {}",
                path,
                raw.len(),
                inode_len + block_len
            )));
        }
        Ok(Bitmap {
            path: path.to_path_buf(),
            inodes: raw[..inode_len].to_vec(),
            blocks: raw[inode_len..].to_vec(),
            inode_capacity,
            block_capacity,
        })
    }

    pub fn persist(&self) -> Result<()> {
        let mut raw = Vec::with_capacity(self.inodes.len() + self.blocks.len());
        raw.extend_from_slice(&self.inodes);
        raw.extend_from_slice(&self.blocks);
        storage::write_file_atomic(&self.path, &raw)
    }

    fn bits(&self, kind: BitmapKind) -> &[u8] {
        match kind {
            BitmapKind::Inode => &self.inodes,
            BitmapKind::Block => &self.blocks,
        }
    }

    fn bits_mut(&mut self, kind: BitmapKind) -> &mut Vec<u8> {
        match kind {
            BitmapKind::Inode => &mut self.inodes,
            BitmapKind::Block => &mut self.blocks,
        }
    }

    pub fn capacity(&self, kind: BitmapKind) -> u32 {
        match kind {
            BitmapKind::Inode => self.inode_capacity,
            BitmapKind::Block => self.block_capacity,
        }
    }

    pub fn is_used(&self, kind: BitmapKind, index: u32) -> bool {
        index < self.capacity(kind) && test_bit(self.bits(kind), index)
    }

    pub fn used_count(&self, kind: BitmapKind) -> u32 {
        self.bits(kind).iter().map(|b| b.count_ones()).sum()
    }

    /// Claims the lowest clear bit at or above index 1 and persists.
    pub fn allocate(&mut self, kind: BitmapKind) -> Result<u32> {
        let capacity = self.capacity(kind);
        let found = (1..capacity).find(|&i| !test_bit(self.bits(kind), i));
        match found {
            Some(index) => {
                set_bit(self.bits_mut(kind), index);
                self.persist()?;
                debug!("Bitmap {:?}: allocated {:?} {}", self.path, kind, index);
                Ok(index)
            }
            None => Err(FsError::Exhausted(format!("no free {:?} in {:?}", kind, self.path))),
        }
    }

    /// Clears a bit and persists. The reserved index 0 is never cleared.
    pub fn free(&mut self, kind: BitmapKind, index: u32) -> Result<()> {
        if index == 0 {
            warn!("Bitmap {:?}: refusing to free reserved {:?} 0", self.path, kind);
            return Ok(());
        }
        if index >= self.capacity(kind) {
            return Err(FsError::InvalidFormat(format!(
                "{:?} index {} out of range",
                kind, index
            )));
        }
        clear_bit(self.bits_mut(kind), index);
        self.persist()?;
        debug!("Bitmap {:?}: freed {:?} {}", self.path, kind, index);
        Ok(())
    }
}

fn byte_len(capacity: u32) -> usize {
    (capacity as usize).div_ceil(8)
}

fn set_bit(bits: &mut [u8], index: u32) {
    bits[(index / 8) as usize] |= 1 << (index % 8);
}

fn clear_bit(bits: &mut [u8], index: u32) {
    bits[(index / 8) as usize] &= !(1 << (index % 8));
}

fn test_bit(bits: &[u8], index: u32) -> bool {
    bits[(index / 8) as usize] & (1 << (index % 8)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(inodes: u32, blocks: u32) -> (tempfile::TempDir, Bitmap) {
        let dir = tempfile::tempdir().unwrap();
        let bitmap = Bitmap::create(&dir.path().join("bmp_0.bin"), inodes, blocks).unwrap();
        (dir, bitmap)
    }

    #[test]
    fn test_index_zero_reserved() {
        let (_dir, bitmap) = scratch(16, 16);
        assert!(bitmap.is_used(BitmapKind::Inode, 0));
        assert!(bitmap.is_used(BitmapKind::Block, 0));
        assert_eq!(bitmap.used_count(BitmapKind::Block), 1);
    }

    #[test]
    fn test_allocate_is_linear_from_one() {
        let (_dir, mut bitmap) = scratch(16, 16);
        assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), 1);
        assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), 2);
        assert_eq!(bitmap.allocate(BitmapKind::Inode).unwrap(), 1);

        bitmap.free(BitmapKind::Block, 1).unwrap();
        assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), 1);
        assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), 3);
    }

    #[test]
    fn test_exhaustion() {
        let (_dir, mut bitmap) = scratch(8, 8);
        for expected in 1..8 {
            assert_eq!(bitmap.allocate(BitmapKind::Inode).unwrap(), expected);
        }
        assert!(matches!(bitmap.allocate(BitmapKind::Inode), Err(FsError::Exhausted(_))));
        // The block array is independent.
        assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), 1);
    }

    #[test]
    fn test_free_reserved_is_ignored() {
        let (_dir, mut bitmap) = scratch(8, 8);
        bitmap.free(BitmapKind::Inode, 0).unwrap();
        assert!(bitmap.is_used(BitmapKind::Inode, 0));
    }

    #[test]
    fn test_allocation_is_persisted() {
        let (dir, mut bitmap) = scratch(16, 24);
        bitmap.allocate(BitmapKind::Block).unwrap();
        bitmap.allocate(BitmapKind::Block).unwrap();
        bitmap.allocate(BitmapKind::Inode).unwrap();

        let path = dir.path().join("bmp_0.bin");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 + 3);

        let reloaded = Bitmap::load(&path, 16, 24).unwrap();
        assert!(reloaded.is_used(BitmapKind::Block, 2));
        assert!(!reloaded.is_used(BitmapKind::Block, 3));
        assert!(reloaded.is_used(BitmapKind::Inode, 1));
        assert_eq!(reloaded.used_count(BitmapKind::Block), 3);
    }

    #[test]
    fn test_capacity_not_multiple_of_eight() {
        let (dir, mut bitmap) = scratch(8, 10);
        assert_eq!(bitmap.capacity(BitmapKind::Block), 10);
        for expected in 1..10 {
            assert_eq!(bitmap.allocate(BitmapKind::Block).unwrap(), expected);
        }
        assert!(matches!(bitmap.allocate(BitmapKind::Block), Err(FsError::Exhausted(_))));
        assert!(!bitmap.is_used(BitmapKind::Block, 12));
        assert!(bitmap.free(BitmapKind::Block, 10).is_err());

        let reloaded = Bitmap::load(&dir.path().join("bmp_0.bin"), 8, 10).unwrap();
        assert_eq!(reloaded.capacity(BitmapKind::Block), 10);
        assert_eq!(reloaded.used_count(BitmapKind::Block), 10);
    }

    #[test]
    fn test_load_rejects_wrong_size() {
        let (dir, _bitmap) = scratch(16, 16);
        let result = Bitmap::load(&dir.path().join("bmp_0.bin"), 32, 16);
        assert!(matches!(result, Err(FsError::InvalidFormat(_))));
    }
}
