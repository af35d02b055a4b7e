// src/volume.rs
use crate::address::GlobalIndex;
use crate::bitmap::{Bitmap, BitmapKind};
use crate::config::{FsConfig, INODE_RECORD_SIZE, SUPERBLOCK_SIZE};
use crate::crypto::SealCipher;
use crate::error::{FsError, Result};
use crate::inode::{InodeRecord, InodeStore};
use crate::merkle::{self, MerkleTree};
use crate::storage;
use log::{debug, info, warn};
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SUPERBLOCK_MAGIC: &[u8; 8] = b"SEALFSSB";

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum VolumeType {
    Local,
    Remote,
}

/// Backing files and capacities of one volume.
///
/// File names are relative to the directory holding the superblock.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VolumeDescriptor {
    pub inode_file: PathBuf,
    pub bitmap_file: PathBuf,
    pub block_file: PathBuf,
    pub merkle_file: PathBuf,
    pub inode_capacity: u32,
    pub block_capacity: u32,
    #[serde(skip)]
    pub merkle: Option<MerkleTree>,
}

impl VolumeDescriptor {
    fn new(id: u32, inode_capacity: u32, block_capacity: u32) -> Self {
        Self {
            inode_file: PathBuf::from(format!("inodes_{}.bin", id)),
            bitmap_file: PathBuf::from(format!("bmp_{}.bin", id)),
            block_file: PathBuf::from(format!("volume_{}.bin", id)),
            merkle_file: PathBuf::from(format!("merkle_{}.bin", id)),
            inode_capacity,
            block_capacity,
            merkle: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Superblock {
    magic: [u8; 8],
    /// Random identifier shared by every volume of this filesystem.
    pub fs_id: [u8; 16],
    pub volume_count: u32,
    pub block_size: u32,
    pub inode_record_size: u32,
    pub inodes_per_volume: u32,
    pub blocks_per_volume: u32,
    pub volume_type: VolumeType,
    pub volumes: Vec<VolumeDescriptor>,
}

impl Superblock {
    fn new(config: &FsConfig) -> Self {
        let mut fs_id = [0u8; 16];
        thread_rng().fill_bytes(&mut fs_id);
        Self {
            magic: *SUPERBLOCK_MAGIC,
            fs_id,
            volume_count: 0,
            block_size: config.block_size as u32,
            inode_record_size: INODE_RECORD_SIZE as u32,
            inodes_per_volume: config.inodes_per_volume,
            blocks_per_volume: config.blocks_per_volume,
            volume_type: VolumeType::Local,
            volumes: Vec::new(),
        }
    }

    /// Serialize to a fixed-size record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = bincode::serialize(self)?;
        if bytes.len() > SUPERBLOCK_SIZE {
            return Err(FsError::InvalidFormat(format!(
                "superblock is {} bytes, limit is {}",
                bytes.len(),
                SUPERBLOCK_SIZE
            )));
        }
        bytes.resize(SUPERBLOCK_SIZE, 0);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SUPERBLOCK_SIZE {
            return Err(FsError::InvalidFormat(format!(
                "superblock is {} bytes, expected {}",
                bytes.len(),
                SUPERBLOCK_SIZE
            )));
        }
        let superblock: Self = bincode::deserialize(bytes)?;
        if &superblock.magic != SUPERBLOCK_MAGIC {
            return Err(FsError::InvalidFormat("bad superblock magic".into()));
        }
        if superblock.volume_count as usize != superblock.volumes.len() || superblock.volume_count == 0 {
            return Err(FsError::InvalidFormat(format!(
                "superblock lists {} volumes but counts {}",
                superblock.volumes.len(),
                superblock.volume_count
            )));
        }
        if superblock.inode_record_size as usize != INODE_RECORD_SIZE {
            return Err(FsError::InvalidFormat(format!(
                "inode record size {} is not supported",
                superblock.inode_record_size
            )));
        }
        if superblock.block_size == 0 || superblock.inodes_per_volume == 0 || superblock.blocks_per_volume == 0 {
            return Err(FsError::InvalidFormat("superblock has zero geometry".into()));
        }
        Ok(superblock)
    }
}

/// Owns the superblock, each volume's bitmap and its loaded Merkle tree.
///
/// Allocation walks the volumes in order and provisions a new volume once
/// every existing one is full.
pub struct VolumeManager {
    superblock_path: PathBuf,
    base_dir: PathBuf,
    superblock: Superblock,
    bitmaps: Vec<Bitmap>,
    max_volumes: u32,
}

impl VolumeManager {
    pub fn load_or_init(path: &Path, config: FsConfig, cipher: &SealCipher) -> Result<Self> {
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if path.exists() {
            let bytes = std::fs::read(path)?;
            let superblock = Superblock::from_bytes(&bytes)?;
            let mut manager = VolumeManager {
                superblock_path: path.to_path_buf(),
                base_dir,
                superblock,
                bitmaps: Vec::new(),
                max_volumes: config.max_volumes,
            };
            manager.load_volumes(cipher)?;
            manager.persist_superblock()?;
            info!(
                "Superblock {:?} mounted: fs {} with {} volume(s)",
                path,
                hex::encode(manager.superblock.fs_id),
                manager.superblock.volume_count
            );
            return Ok(manager);
        }

        info!("No superblock at {:?}; formatting a new filesystem", path);
        let mut manager = VolumeManager {
            superblock_path: path.to_path_buf(),
            base_dir,
            superblock: Superblock::new(&config),
            bitmaps: Vec::new(),
            max_volumes: config.max_volumes,
        };
        manager.provision_volume()?;

        let root = InodeRecord::root();
        InodeStore::new(&manager, cipher).write(GlobalIndex::ROOT, &root)?;
        manager.persist_superblock()?;
        info!(
            "Formatted fs {} ({} inodes, {} blocks per volume)",
            hex::encode(manager.superblock.fs_id),
            manager.superblock.inodes_per_volume,
            manager.superblock.blocks_per_volume
        );
        Ok(manager)
    }

    fn load_volumes(&mut self, cipher: &SealCipher) -> Result<()> {
        let inode_cap = self.superblock.inodes_per_volume;
        let block_cap = self.superblock.blocks_per_volume;
        for id in 0..self.superblock.volume_count {
            let bitmap_path = self.resolve(&self.superblock.volumes[id as usize].bitmap_file);
            self.bitmaps.push(Bitmap::load(&bitmap_path, inode_cap, block_cap)?);

            let merkle_path = self.resolve(&self.superblock.volumes[id as usize].merkle_file);
            let loaded = if merkle_path.exists() {
                match MerkleTree::load(&merkle_path) {
                    Ok(tree) => Some(tree),
                    Err(FsError::InvalidFormat(reason)) => {
                        warn!("Volume {}: {}, rebuilding", id, reason);
                        None
                    }
                    Err(e) => return Err(e),
                }
            } else {
                warn!("Volume {}: Merkle file {:?} missing, rebuilding", id, merkle_path);
                None
            };
            let tree = match loaded {
                Some(tree) => tree,
                None => {
                    let tree = self.rebuild_tree(id, cipher)?;
                    tree.save(&merkle_path)?;
                    tree
                }
            };
            debug!("Volume {}: Merkle root {}", id, tree.root_hex());
            self.superblock.volumes[id as usize].merkle = Some(tree);
        }
        Ok(())
    }

    /// Rebuilds a tree from the blocks that still decrypt. Free or unreadable
    /// slots get random placeholders.
    fn rebuild_tree(&self, volume: u32, cipher: &SealCipher) -> Result<MerkleTree> {
        let block_path = self.resolve(&self.superblock.volumes[volume as usize].block_file);
        let slot_size = SealCipher::sealed_len(self.block_size());
        let mut rng = thread_rng();
        let mut leaves = Vec::with_capacity(self.block_capacity() as usize);
        let mut recovered = 0u32;

        for offset in 0..self.block_capacity() {
            let plaintext = if self.bitmaps[volume as usize].is_used(BitmapKind::Block, offset) {
                storage::read_slot(&block_path, offset, slot_size)
                    .ok()
                    .and_then(|sealed| cipher.open(&sealed))
            } else {
                None
            };
            match plaintext {
                Some(block) => {
                    recovered += 1;
                    leaves.push(merkle::hash_block(&block));
                }
                None => {
                    let mut placeholder = [0u8; 32];
                    rng.fill_bytes(&mut placeholder);
                    leaves.push(placeholder);
                }
            }
        }
        info!("Volume {}: rebuilt Merkle tree from {} block(s)", volume, recovered);
        Ok(MerkleTree::build(&leaves))
    }

    /// Creates the next volume's files, tree and bitmap and registers it.
    fn provision_volume(&mut self) -> Result<u32> {
        let id = self.superblock.volume_count;
        let descriptor = VolumeDescriptor::new(
            id,
            self.superblock.inodes_per_volume,
            self.superblock.blocks_per_volume,
        );

        storage::create_empty(&self.resolve(&descriptor.inode_file))?;
        storage::create_empty(&self.resolve(&descriptor.block_file))?;

        let tree = MerkleTree::with_random_leaves(descriptor.block_capacity);
        tree.save(&self.resolve(&descriptor.merkle_file))?;

        let bitmap = Bitmap::create(
            &self.resolve(&descriptor.bitmap_file),
            descriptor.inode_capacity,
            descriptor.block_capacity,
        )?;

        self.bitmaps.push(bitmap);
        self.superblock.volumes.push(VolumeDescriptor { merkle: Some(tree), ..descriptor });
        self.superblock.volume_count += 1;
        info!("Volume {} provisioned", id);
        Ok(id)
    }

    /// Adds a volume once all existing ones are full.
    pub fn grow(&mut self) -> Result<u32> {
        if self.superblock.volume_count >= self.max_volumes {
            warn!("Cannot grow: already at {} volume(s)", self.max_volumes);
            return Err(FsError::Exhausted(format!(
                "volume limit of {} reached",
                self.max_volumes
            )));
        }
        let id = self.provision_volume()?;
        self.persist_superblock()?;
        Ok(id)
    }

    /// Allocates from the first volume with room, growing when all are full.
    pub fn allocate(&mut self, kind: BitmapKind) -> Result<GlobalIndex> {
        let capacity = self.capacity(kind);
        for (volume, bitmap) in self.bitmaps.iter_mut().enumerate() {
            match bitmap.allocate(kind) {
                Ok(offset) => return Ok(GlobalIndex::from_parts(volume as u32, offset, capacity)),
                Err(FsError::Exhausted(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let volume = self.grow()?;
        let offset = self.bitmaps[volume as usize].allocate(kind)?;
        Ok(GlobalIndex::from_parts(volume, offset, capacity))
    }

    pub fn free(&mut self, kind: BitmapKind, index: GlobalIndex) -> Result<()> {
        let loc = index.locate(self.capacity(kind));
        let bitmap = self.bitmaps.get_mut(loc.volume as usize).ok_or_else(|| {
            FsError::InvalidFormat(format!("{:?} {} lies in missing volume {}", kind, index, loc.volume))
        })?;
        bitmap.free(kind, loc.offset)
    }

    pub fn is_allocated(&self, kind: BitmapKind, index: GlobalIndex) -> bool {
        let loc = index.locate(self.capacity(kind));
        self.bitmaps
            .get(loc.volume as usize)
            .is_some_and(|b| b.is_used(kind, loc.offset))
    }

    /// Used slots across all volumes, reserved slots included.
    pub fn used_count(&self, kind: BitmapKind) -> u32 {
        self.bitmaps.iter().map(|b| b.used_count(kind)).sum()
    }

    pub fn capacity(&self, kind: BitmapKind) -> u32 {
        match kind {
            BitmapKind::Inode => self.superblock.inodes_per_volume,
            BitmapKind::Block => self.superblock.blocks_per_volume,
        }
    }

    pub fn inode_capacity(&self) -> u32 {
        self.superblock.inodes_per_volume
    }

    pub fn block_capacity(&self) -> u32 {
        self.superblock.blocks_per_volume
    }

    pub fn block_size(&self) -> usize {
        self.superblock.block_size as usize
    }

    pub fn volume_count(&self) -> u32 {
        self.superblock.volume_count
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn descriptor(&self, volume: u32) -> Result<&VolumeDescriptor> {
        self.superblock
            .volumes
            .get(volume as usize)
            .ok_or_else(|| FsError::InvalidFormat(format!("volume {} does not exist", volume)))
    }

    pub fn inode_path(&self, volume: u32) -> Result<PathBuf> {
        Ok(self.resolve(&self.descriptor(volume)?.inode_file))
    }

    pub fn block_path(&self, volume: u32) -> Result<PathBuf> {
        Ok(self.resolve(&self.descriptor(volume)?.block_file))
    }

    pub fn tree(&self, volume: u32) -> Result<&MerkleTree> {
        self.descriptor(volume)?
            .merkle
            .as_ref()
            .ok_or_else(|| FsError::InvalidFormat(format!("volume {} has no Merkle tree loaded", volume)))
    }

    pub fn tree_mut(&mut self, volume: u32) -> Result<&mut MerkleTree> {
        self.superblock
            .volumes
            .get_mut(volume as usize)
            .and_then(|d| d.merkle.as_mut())
            .ok_or_else(|| FsError::InvalidFormat(format!("volume {} has no Merkle tree loaded", volume)))
    }

    /// Rewrites the whole tree file of `volume`.
    pub fn save_tree(&self, volume: u32) -> Result<()> {
        let path = self.resolve(&self.descriptor(volume)?.merkle_file);
        self.tree(volume)?.save(&path)
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        self.base_dir.join(file)
    }

    fn persist_superblock(&self) -> Result<()> {
        let bytes = self.superblock.to_bytes()?;
        storage::write_file_atomic(&self.superblock_path, &bytes)?;
        debug!("Superblock persisted ({} volume(s))", self.superblock.volume_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;

    fn format(dir: &Path, config: FsConfig) -> (SealCipher, VolumeManager) {
        let cipher = SealCipher::new(&generate_key());
        let manager = VolumeManager::load_or_init(&dir.join("superblock.bin"), config, &cipher).unwrap();
        (cipher, manager)
    }

    #[test]
    fn test_init_creates_volume_zero() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (cipher, manager) = format(temp_dir.path(), FsConfig::small());

        for name in ["superblock.bin", "inodes_0.bin", "bmp_0.bin", "volume_0.bin", "merkle_0.bin"] {
            assert!(temp_dir.path().join(name).exists(), "{} missing", name);
        }
        assert_eq!(manager.volume_count(), 1);
        assert_eq!(
            std::fs::metadata(temp_dir.path().join("superblock.bin")).unwrap().len(),
            SUPERBLOCK_SIZE as u64
        );
        assert!(manager.is_allocated(BitmapKind::Inode, GlobalIndex::ROOT));
        assert!(manager.is_allocated(BitmapKind::Block, GlobalIndex(0)));
        assert_eq!(manager.tree(0).unwrap().leaf_count(), 16);

        let root = InodeStore::new(&manager, &cipher).read(GlobalIndex::ROOT).unwrap();
        assert!(root.valid && root.is_dir);
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_reload_existing_superblock() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("superblock.bin");
        let cipher = SealCipher::new(&generate_key());

        let fs_id = {
            let mut manager = VolumeManager::load_or_init(&path, FsConfig::small(), &cipher).unwrap();
            manager.allocate(BitmapKind::Block).unwrap();
            manager.superblock().fs_id
        };

        // Geometry comes from disk, not from the new config.
        let manager = VolumeManager::load_or_init(&path, FsConfig::default(), &cipher).unwrap();
        assert_eq!(manager.superblock().fs_id, fs_id);
        assert_eq!(manager.block_capacity(), 16);
        assert!(manager.is_allocated(BitmapKind::Block, GlobalIndex(1)));
        assert!(manager.tree(0).unwrap().is_consistent());
    }

    #[test]
    fn test_allocation_exhaustion_grows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_cipher, mut manager) = format(temp_dir.path(), FsConfig::small());

        let mut seen = Vec::new();
        for _ in 0..15 {
            seen.push(manager.allocate(BitmapKind::Block).unwrap());
        }
        assert_eq!(manager.volume_count(), 1);
        assert_eq!(seen.first(), Some(&GlobalIndex(1)));
        assert_eq!(seen.last(), Some(&GlobalIndex(15)));

        let next = manager.allocate(BitmapKind::Block).unwrap();
        assert_eq!(manager.volume_count(), 2);
        // Offset 0 of the new volume stays reserved.
        assert_eq!(next, GlobalIndex(17));
        assert!(temp_dir.path().join("merkle_1.bin").exists());
        assert!(manager.is_allocated(BitmapKind::Block, GlobalIndex(16)));
    }

    #[test]
    fn test_max_volumes_is_exhausted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_cipher, mut manager) = format(temp_dir.path(), FsConfig::new(8, 8, 2));

        for _ in 0..14 {
            manager.allocate(BitmapKind::Inode).unwrap();
        }
        assert_eq!(manager.volume_count(), 2);
        assert!(matches!(manager.allocate(BitmapKind::Inode), Err(FsError::Exhausted(_))));
        assert!(matches!(manager.grow(), Err(FsError::Exhausted(_))));
    }

    #[test]
    fn test_free_returns_slot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_cipher, mut manager) = format(temp_dir.path(), FsConfig::small());

        let a = manager.allocate(BitmapKind::Inode).unwrap();
        let _b = manager.allocate(BitmapKind::Inode).unwrap();
        manager.free(BitmapKind::Inode, a).unwrap();
        assert!(!manager.is_allocated(BitmapKind::Inode, a));
        assert_eq!(manager.allocate(BitmapKind::Inode).unwrap(), a);
    }

    #[test]
    fn test_missing_tree_is_rebuilt() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("superblock.bin");
        let cipher = SealCipher::new(&generate_key());
        VolumeManager::load_or_init(&path, FsConfig::small(), &cipher).unwrap();

        std::fs::remove_file(temp_dir.path().join("merkle_0.bin")).unwrap();
        let manager = VolumeManager::load_or_init(&path, FsConfig::small(), &cipher).unwrap();
        assert_eq!(manager.tree(0).unwrap().leaf_count(), 16);
        assert!(temp_dir.path().join("merkle_0.bin").exists());
    }

    #[test]
    fn test_stale_tree_is_rebuilt_from_blocks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("superblock.bin");
        let cipher = SealCipher::new(&generate_key());
        let block = vec![5u8; 4096];
        {
            let mut manager = VolumeManager::load_or_init(&path, FsConfig::small(), &cipher).unwrap();
            let index = manager.allocate(BitmapKind::Block).unwrap();
            let loc = index.locate(manager.block_capacity());
            let sealed = cipher.seal(&block).unwrap();
            storage::write_slot(&manager.block_path(loc.volume).unwrap(), loc.offset, sealed.len(), &sealed)
                .unwrap();
        }

        let merkle_path = temp_dir.path().join("merkle_0.bin");
        let mut dump = std::fs::read(&merkle_path).unwrap();
        dump[0] ^= 0xff;
        std::fs::write(&merkle_path, &dump).unwrap();

        let manager = VolumeManager::load_or_init(&path, FsConfig::small(), &cipher).unwrap();
        let tree = manager.tree(0).unwrap();
        assert!(tree.is_consistent());
        assert!(tree.verify(1, &block));
        assert!(MerkleTree::load(&merkle_path).is_ok());
    }

    #[test]
    fn test_superblock_rejects_bad_magic() {
        let mut bytes = Superblock::new(&FsConfig::small()).to_bytes().unwrap();
        bytes[0] ^= 0xff;
        assert!(Superblock::from_bytes(&bytes).is_err());
    }
}
