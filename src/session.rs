// src/session.rs
//! A mounted filesystem: the volume manager, the session key and open handles.
//!
//! Every operation runs to completion on the calling thread. Paths are
//! absolute and live directly under the root directory.

use crate::address::GlobalIndex;
use crate::bitmap::BitmapKind;
use crate::block_store::BlockStore;
use crate::config::{FsConfig, KEY_SIZE, MAX_BLOCKS_PER_INODE, MAX_CHILDREN, MAX_NAME_LENGTH, MAX_PATH_LENGTH};
use crate::crypto::SealCipher;
use crate::error::{FsError, Result};
use crate::inode::{self, InodeRecord, InodeStore, S_IFREG};
use crate::volume::VolumeManager;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;

/// File type bits of `st_mode`.
const S_IFMT: u32 = 0o170000;

pub struct Session {
    volumes: VolumeManager,
    cipher: SealCipher,
    config: FsConfig,
    handles: HashMap<u64, GlobalIndex>,
    next_handle: u64,
}

impl Session {
    /// Mounts the filesystem described by `superblock`, formatting it if absent.
    pub fn open(superblock: &Path, key: &[u8; KEY_SIZE], config: FsConfig) -> Result<Self> {
        let cipher = SealCipher::new(key);
        let volumes = VolumeManager::load_or_init(superblock, config, &cipher)?;
        // Fails fast on a wrong key instead of at the first lookup.
        InodeStore::new(&volumes, &cipher).read(GlobalIndex::ROOT)?;
        info!(
            "Session open: {} volume(s), strict integrity {}",
            volumes.volume_count(),
            config.strict_integrity
        );
        Ok(Self {
            volumes,
            cipher,
            config,
            handles: HashMap::new(),
            next_handle: 1,
        })
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    pub fn block_size(&self) -> usize {
        self.volumes.block_size()
    }

    fn inodes(&self) -> InodeStore<'_> {
        InodeStore::new(&self.volumes, &self.cipher)
    }

    fn blocks(&mut self) -> BlockStore<'_> {
        BlockStore::new(&mut self.volumes, &self.cipher, self.config.strict_integrity)
    }

    pub fn lookup(&self, path: &str) -> Result<GlobalIndex> {
        self.inodes().find_by_path(path)
    }

    pub fn getattr(&self, path: &str) -> Result<InodeRecord> {
        let index = self.lookup(path)?;
        self.inode(index)
    }

    /// Reads a live inode. Free or never-allocated indices are `NotFound`.
    pub fn inode(&self, index: GlobalIndex) -> Result<InodeRecord> {
        if !self.volumes.is_allocated(BitmapKind::Inode, index) {
            return Err(FsError::NotFound(format!("inode {}", index)));
        }
        let record = self.inodes().read(index)?;
        if !record.valid {
            return Err(FsError::NotFound(format!("inode {}", index)));
        }
        Ok(record)
    }

    /// Fails unless `path` is definitely free. Errors other than `NotFound`
    /// (an unreadable sibling, say) abort instead of passing as absence.
    fn ensure_absent(&self, path: &str) -> Result<()> {
        match self.lookup(path) {
            Ok(_) => Err(FsError::AlreadyExists(path.to_string())),
            Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Creates an empty regular file at `path`.
    pub fn create(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<InodeRecord> {
        check_path(path)?;
        self.ensure_absent(path)?;

        let mut root = self.inodes().read(GlobalIndex::ROOT)?;
        let free_slot = root.children.iter().position(|c| c.is_unused());
        if free_slot.is_none() && root.children.len() >= MAX_CHILDREN {
            return Err(FsError::Exhausted(format!("root directory holds {} entries", MAX_CHILDREN)));
        }

        let index = self.volumes.allocate(BitmapKind::Inode)?;
        let mode = if mode & S_IFMT == 0 { mode | S_IFREG } else { mode };
        let record = InodeRecord::new(index, path, mode, uid, gid);
        let written = self.inodes().write(index, &record);
        if let Err(e) = written {
            self.volumes.free(BitmapKind::Inode, index)?;
            return Err(e);
        }

        match free_slot {
            Some(slot) => root.children[slot] = index,
            None => root.children.push(index),
        }
        root.mtime = inode::now_secs();
        root.ctime = root.mtime;
        self.inodes().write(GlobalIndex::ROOT, &root)?;

        debug!("Created {} as inode {}", path, index);
        Ok(record)
    }

    pub fn read(&mut self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        let index = self.lookup(path)?;
        self.read_at(index, offset, size)
    }

    /// Reads up to `size` bytes at `offset`; short at end of file.
    pub fn read_at(&mut self, index: GlobalIndex, offset: u64, size: usize) -> Result<Vec<u8>> {
        let record = self.inode(index)?;
        if record.is_dir {
            return Err(FsError::IsDirectory(record.path));
        }
        if offset >= record.size || size == 0 {
            return Ok(Vec::new());
        }

        let block_size = self.block_size() as u64;
        let end = (offset + size as u64).min(record.size);
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let slot = (pos / block_size) as usize;
            let within = (pos % block_size) as usize;
            let take = ((block_size - within as u64).min(end - pos)) as usize;
            let block_index = *record.blocks.get(slot).ok_or_else(|| {
                FsError::InvalidFormat(format!("{} has size {} but only {} blocks", record.path, record.size, record.blocks.len()))
            })?;
            let block = self.blocks().read(block_index)?;
            out.extend_from_slice(&block[within..within + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let index = self.lookup(path)?;
        self.write_at(index, offset, data)
    }

    /// Writes `data` at `offset`, extending the file as needed.
    ///
    /// New blocks are all allocated before any block is written and are only
    /// attached to the inode once every write succeeded.
    pub fn write_at(&mut self, index: GlobalIndex, offset: u64, data: &[u8]) -> Result<usize> {
        let mut record = self.inode(index)?;
        if record.is_dir {
            return Err(FsError::IsDirectory(record.path));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let block_size = self.block_size();
        let end = offset + data.len() as u64;
        let needed = blocks_for(end, block_size);
        if needed > MAX_BLOCKS_PER_INODE {
            return Err(FsError::FileTooLarge(format!(
                "{} would need {} blocks, limit is {}",
                record.path, needed, MAX_BLOCKS_PER_INODE
            )));
        }

        let existing = record.blocks.len();
        let planned = self.allocate_blocks(needed.saturating_sub(existing))?;
        let layout: Vec<GlobalIndex> = record.blocks.iter().chain(planned.iter()).copied().collect();

        if let Err(e) = self.fill_blocks(&layout, existing, offset, data) {
            self.release_blocks(&planned);
            return Err(e);
        }

        record.blocks = layout;
        record.size = record.size.max(end);
        record.mtime = inode::now_secs();
        record.ctime = record.mtime;
        self.inodes().write(index, &record)?;
        debug!("Wrote {} bytes at {} to {}", data.len(), offset, record.path);
        Ok(data.len())
    }

    /// Writes the blocks of `layout` touched by `data`, plus zeroes into any
    /// fresh block (index >= `existing`) that `data` skips over.
    fn fill_blocks(&mut self, layout: &[GlobalIndex], existing: usize, offset: u64, data: &[u8]) -> Result<()> {
        let block_size = self.block_size() as u64;
        let first = (offset / block_size) as usize;

        for &fresh in layout.iter().take(first).skip(existing) {
            self.blocks().write(fresh, &[])?;
        }

        let mut written = 0usize;
        let mut pos = offset;
        while written < data.len() {
            let slot = (pos / block_size) as usize;
            let within = (pos % block_size) as usize;
            let take = (block_size as usize - within).min(data.len() - written);
            let whole = within == 0 && take == block_size as usize;

            let mut block = if slot < existing && !whole {
                self.blocks().read(layout[slot])?
            } else {
                vec![0u8; block_size as usize]
            };
            block[within..within + take].copy_from_slice(&data[written..written + take]);
            self.blocks().write(layout[slot], &block)?;

            written += take;
            pos += take as u64;
        }
        Ok(())
    }

    /// Allocates `count` blocks, or none at all.
    fn allocate_blocks(&mut self, count: usize) -> Result<Vec<GlobalIndex>> {
        let mut planned = Vec::with_capacity(count);
        for _ in 0..count {
            match self.volumes.allocate(BitmapKind::Block) {
                Ok(index) => planned.push(index),
                Err(e) => {
                    warn!("Block allocation failed after {} of {}: {}", planned.len(), count, e);
                    self.release_blocks(&planned);
                    return Err(e);
                }
            }
        }
        Ok(planned)
    }

    fn release_blocks(&mut self, blocks: &[GlobalIndex]) {
        for &block in blocks {
            if let Err(e) = self.volumes.free(BitmapKind::Block, block) {
                warn!("Could not release block {}: {}", block, e);
            }
        }
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let index = self.lookup(path)?;
        self.truncate_at(index, size)
    }

    /// Shrinks or extends a file to `size` bytes.
    ///
    /// Shrinking frees the blocks past the new end and zeroes the tail of the
    /// last partial block. Extending adds zero blocks.
    pub fn truncate_at(&mut self, index: GlobalIndex, size: u64) -> Result<()> {
        let mut record = self.inode(index)?;
        if record.is_dir {
            return Err(FsError::IsDirectory(record.path));
        }

        let block_size = self.block_size();
        let needed = blocks_for(size, block_size);
        if needed > MAX_BLOCKS_PER_INODE {
            return Err(FsError::FileTooLarge(format!(
                "{} would need {} blocks, limit is {}",
                record.path, needed, MAX_BLOCKS_PER_INODE
            )));
        }

        if size < record.size {
            let dropped = record.blocks.split_off(needed.min(record.blocks.len()));
            let tail = (size % block_size as u64) as usize;
            if tail != 0 {
                if let Some(&last) = record.blocks.last() {
                    let mut block = self.blocks().read(last)?;
                    block[tail..].fill(0);
                    self.blocks().write(last, &block)?;
                }
            }
            for block in &dropped {
                self.volumes.free(BitmapKind::Block, *block)?;
            }
            debug!("Truncated {} to {} bytes, freed {} block(s)", record.path, size, dropped.len());
        } else if needed > record.blocks.len() {
            let planned = self.allocate_blocks(needed - record.blocks.len())?;
            for &block in &planned {
                let zeroed = self.blocks().write(block, &[]);
                if let Err(e) = zeroed {
                    self.release_blocks(&planned);
                    return Err(e);
                }
            }
            record.blocks.extend(planned);
        }

        record.size = size;
        record.mtime = inode::now_secs();
        record.ctime = record.mtime;
        self.inodes().write(index, &record)
    }

    /// Removes a regular file and releases its inode and blocks.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let index = self.lookup(path)?;
        let record = self.inode(index)?;
        if record.is_dir {
            return Err(FsError::IsDirectory(record.path));
        }

        for &block in &record.blocks {
            self.volumes.free(BitmapKind::Block, block)?;
        }
        self.inodes().write(index, &InodeRecord::empty())?;
        self.volumes.free(BitmapKind::Inode, index)?;

        let mut root = self.inodes().read(GlobalIndex::ROOT)?;
        for child in root.children.iter_mut().filter(|c| **c == index) {
            *child = GlobalIndex::UNUSED;
        }
        root.mtime = inode::now_secs();
        root.ctime = root.mtime;
        self.inodes().write(GlobalIndex::ROOT, &root)?;

        self.handles.retain(|_, open| *open != index);
        debug!("Unlinked {} (inode {}, {} block(s))", path, index, record.blocks.len());
        Ok(())
    }

    /// Renames `from` to `to` in place. The inode keeps its index and its
    /// parent's children slot. Renaming a file onto its own path is a no-op;
    /// any other existing `to` is `AlreadyExists`.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        check_path(to)?;
        let index = self.lookup(from)?;
        if index == GlobalIndex::ROOT {
            return Err(FsError::IsDirectory(from.to_string()));
        }
        if from == to {
            return Ok(());
        }
        self.ensure_absent(to)?;

        let mut record = self.inode(index)?;
        record.rename_to(to);
        self.inodes().write(index, &record)?;
        debug!("Renamed {} to {}", from, to);
        Ok(())
    }

    /// Live entries of a directory, in children order.
    pub fn readdir(&self, path: &str) -> Result<Vec<InodeRecord>> {
        let index = self.lookup(path)?;
        self.readdir_at(index)
    }

    pub fn readdir_at(&self, index: GlobalIndex) -> Result<Vec<InodeRecord>> {
        let dir = self.inode(index)?;
        if !dir.is_dir {
            return Err(FsError::NotDirectory(dir.path));
        }
        let store = self.inodes();
        let mut entries = Vec::new();
        for &child in dir.children.iter().filter(|c| !c.is_unused()) {
            let record = store.read(child)?;
            if record.valid {
                entries.push(record);
            }
        }
        Ok(entries)
    }

    /// Updates permission bits and ownership. File type bits are kept.
    pub fn set_attributes(
        &mut self,
        index: GlobalIndex,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<InodeRecord> {
        let mut record = self.inode(index)?;
        if let Some(mode) = mode {
            record.mode = (record.mode & S_IFMT) | (mode & !S_IFMT);
        }
        if let Some(uid) = uid {
            record.uid = uid;
        }
        if let Some(gid) = gid {
            record.gid = gid;
        }
        record.ctime = inode::now_secs();
        self.inodes().write(index, &record)?;
        Ok(record)
    }

    pub fn open_file(&mut self, path: &str) -> Result<u64> {
        let index = self.lookup(path)?;
        self.open_index(index)
    }

    /// Registers an open handle for a live inode.
    pub fn open_index(&mut self, index: GlobalIndex) -> Result<u64> {
        self.inode(index)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, index);
        Ok(handle)
    }

    pub fn handle(&self, handle: u64) -> Option<GlobalIndex> {
        self.handles.get(&handle).copied()
    }

    pub fn release(&mut self, handle: u64) {
        self.handles.remove(&handle);
    }

    /// Decrypts a block and checks it against the Merkle root.
    pub fn verify_block(&mut self, block: GlobalIndex) -> Result<bool> {
        let store = BlockStore::new(&mut self.volumes, &self.cipher, false);
        let plaintext = store.read(block)?;
        store.verify(block, &plaintext)
    }
}

fn blocks_for(size: u64, block_size: usize) -> usize {
    size.div_ceil(block_size as u64) as usize
}

/// Accepts only absolute, length-bounded paths directly under the root.
fn check_path(path: &str) -> Result<()> {
    if path.len() >= MAX_PATH_LENGTH {
        return Err(FsError::NameTooLong(path.to_string()));
    }
    let name = path
        .strip_prefix('/')
        .ok_or_else(|| FsError::NotFound(path.to_string()))?;
    if name.is_empty() {
        return Err(FsError::AlreadyExists(path.to_string()));
    }
    if name.contains('/') {
        return Err(FsError::NotFound(path.to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(FsError::NameTooLong(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INODE_RECORD_SIZE;
    use crate::crypto::generate_key;
    use crate::inode::S_IFDIR;
    use std::os::unix::fs::FileExt;

    fn mount() -> (tempfile::TempDir, Session) {
        let temp_dir = tempfile::tempdir().unwrap();
        let session =
            Session::open(&temp_dir.path().join("superblock.bin"), &generate_key(), FsConfig::small()).unwrap();
        (temp_dir, session)
    }

    #[test]
    fn test_root_attributes() {
        let (_dir, session) = mount();
        let root = session.getattr("/").unwrap();
        assert!(root.is_dir);
        assert_eq!(root.mode & S_IFDIR, S_IFDIR);
    }

    #[test]
    fn test_create_and_lookup() {
        let (_dir, mut session) = mount();
        let record = session.create("/a.txt", 0o644, 1000, 1000).unwrap();
        assert_eq!(record.mode, S_IFREG | 0o644);
        assert_eq!(session.lookup("/a.txt").unwrap(), record.index);
        assert!(matches!(session.create("/a.txt", 0o644, 0, 0), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_create_rejects_bad_paths() {
        let (_dir, mut session) = mount();
        assert!(matches!(session.create("/dir/a", 0o644, 0, 0), Err(FsError::NotFound(_))));
        let long = format!("/{}", "x".repeat(MAX_NAME_LENGTH + 1));
        assert!(matches!(session.create(&long, 0o644, 0, 0), Err(FsError::NameTooLong(_))));
    }

    #[test]
    fn test_wrong_key_fails_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("superblock.bin");
        Session::open(&path, &generate_key(), FsConfig::small()).unwrap();
        let result = Session::open(&path, &generate_key(), FsConfig::small());
        assert!(matches!(result, Err(FsError::Crypto { .. })));
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let (_dir, mut session) = mount();
        session.create("/sparse", 0o644, 0, 0).unwrap();
        session.write("/sparse", 9000, b"tail").unwrap();

        let record = session.getattr("/sparse").unwrap();
        assert_eq!(record.size, 9004);
        assert_eq!(record.blocks.len(), 3);

        let data = session.read("/sparse", 0, 10_000).unwrap();
        assert_eq!(data.len(), 9004);
        assert!(data[..9000].iter().all(|&b| b == 0));
        assert_eq!(&data[9000..], b"tail");
    }

    #[test]
    fn test_overwrite_inside_block() {
        let (_dir, mut session) = mount();
        session.create("/f", 0o644, 0, 0).unwrap();
        session.write("/f", 0, b"hello world").unwrap();
        session.write("/f", 6, b"rusty").unwrap();
        assert_eq!(session.read("/f", 0, 64).unwrap(), b"hello rusty");
        assert_eq!(session.getattr("/f").unwrap().blocks.len(), 1);
    }

    #[test]
    fn test_write_too_large() {
        let (_dir, mut session) = mount();
        session.create("/big", 0o644, 0, 0).unwrap();
        let offset = (MAX_BLOCKS_PER_INODE * 4096) as u64;
        assert!(matches!(session.write("/big", offset, b"x"), Err(FsError::FileTooLarge(_))));
    }

    #[test]
    fn test_failed_plan_releases_blocks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut session =
            Session::open(&temp_dir.path().join("sb.bin"), &generate_key(), FsConfig::new(8, 8, 1)).unwrap();
        session.create("/f", 0o644, 0, 0).unwrap();

        // Seven free blocks in a single volume; eight are needed.
        let result = session.write("/f", 0, &vec![1u8; 8 * 4096]);
        assert!(matches!(result, Err(FsError::Exhausted(_))));
        assert_eq!(session.volumes().used_count(BitmapKind::Block), 1);
        assert_eq!(session.getattr("/f").unwrap().size, 0);
    }

    #[test]
    fn test_truncate_extend_reads_zeroes() {
        let (_dir, mut session) = mount();
        session.create("/t", 0o644, 0, 0).unwrap();
        session.write("/t", 0, b"abc").unwrap();
        session.truncate("/t", 5000).unwrap();

        let data = session.read("/t", 0, 6000).unwrap();
        assert_eq!(data.len(), 5000);
        assert_eq!(&data[..3], b"abc");
        assert!(data[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_truncate_shrink_zeroes_tail() {
        let (_dir, mut session) = mount();
        session.create("/t", 0o644, 0, 0).unwrap();
        session.write("/t", 0, b"0123456789").unwrap();
        session.truncate("/t", 4).unwrap();
        session.truncate("/t", 10).unwrap();
        assert_eq!(session.read("/t", 0, 10).unwrap(), b"0123\0\0\0\0\0\0");
    }

    #[test]
    fn test_rename_keeps_index() {
        let (_dir, mut session) = mount();
        let index = session.create("/old.txt", 0o644, 0, 0).unwrap().index;
        session.create("/taken", 0o644, 0, 0).unwrap();

        assert!(matches!(session.rename("/old.txt", "/taken"), Err(FsError::AlreadyExists(_))));
        session.rename("/old.txt", "/new.md").unwrap();

        assert!(matches!(session.lookup("/old.txt"), Err(FsError::NotFound(_))));
        let record = session.getattr("/new.md").unwrap();
        assert_eq!(record.index, index);
        assert_eq!(record.name, "new.md");
        assert_eq!(record.file_type, "md");
    }

    #[test]
    fn test_rename_onto_itself_is_noop() {
        let (_dir, mut session) = mount();
        let index = session.create("/same", 0o644, 0, 0).unwrap().index;
        session.rename("/same", "/same").unwrap();
        assert_eq!(session.lookup("/same").unwrap(), index);
        assert!(matches!(session.rename("/gone", "/gone"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_unreadable_sibling_blocks_create_and_rename() {
        let (dir, mut session) = mount();
        let a = session.create("/a", 0o644, 0, 0).unwrap().index;
        session.create("/b", 0o644, 0, 0).unwrap();

        let slot = SealCipher::sealed_len(INODE_RECORD_SIZE) as u64;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("inodes_0.bin"))
            .unwrap();
        let pos = slot * a.get() as u64 + 100;
        let mut byte = [0u8; 1];
        file.read_exact_at(&mut byte, pos).unwrap();
        file.write_all_at(&[byte[0] ^ 0xff], pos).unwrap();

        assert!(matches!(session.create("/b", 0o644, 0, 0), Err(FsError::Crypto { .. })));
        assert!(matches!(session.create("/c", 0o644, 0, 0), Err(FsError::Crypto { .. })));
        assert!(matches!(session.rename("/b", "/d"), Err(FsError::Crypto { .. })));
        assert_eq!(session.inodes().read(GlobalIndex::ROOT).unwrap().children.len(), 2);
    }

    #[test]
    fn test_readdir_lists_live_children() {
        let (_dir, mut session) = mount();
        session.create("/a", 0o644, 0, 0).unwrap();
        session.create("/b", 0o644, 0, 0).unwrap();
        session.unlink("/a").unwrap();

        let names: Vec<String> = session.readdir("/").unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["b".to_string()]);
        assert!(matches!(session.readdir("/b"), Err(FsError::NotDirectory(_))));
    }

    #[test]
    fn test_unlink_root_is_directory() {
        let (_dir, mut session) = mount();
        assert!(matches!(session.unlink("/"), Err(FsError::IsDirectory(_))));
        assert!(matches!(session.unlink("/missing"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_set_attributes_keeps_type() {
        let (_dir, mut session) = mount();
        let index = session.create("/m", 0o644, 0, 0).unwrap().index;
        let record = session.set_attributes(index, Some(0o600), Some(42), None).unwrap();
        assert_eq!(record.mode, S_IFREG | 0o600);
        assert_eq!(record.uid, 42);
        assert_eq!(session.inode(index).unwrap().uid, 42);
    }

    #[test]
    fn test_handles() {
        let (_dir, mut session) = mount();
        let index = session.create("/h", 0o644, 0, 0).unwrap().index;
        let fh = session.open_file("/h").unwrap();
        assert_eq!(session.handle(fh), Some(index));
        session.release(fh);
        assert_eq!(session.handle(fh), None);
        assert!(session.open_file("/nope").is_err());
    }

    #[test]
    fn test_verify_block_after_write() {
        let (_dir, mut session) = mount();
        session.create("/v", 0o644, 0, 0).unwrap();
        session.write("/v", 0, &[9u8; 100]).unwrap();
        let block = session.getattr("/v").unwrap().blocks[0];
        assert!(session.verify_block(block).unwrap());
    }
}
