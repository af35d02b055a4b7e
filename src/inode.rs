// src/inode.rs
use crate::address::GlobalIndex;
use crate::config::INODE_RECORD_SIZE;
use crate::crypto::SealCipher;
use crate::error::{FsError, Result, Unit};
use crate::storage;
use crate::volume::VolumeManager;
use log::error;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Directory bit of the `st_mode` file type field.
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Metadata of one file or directory. Timestamps are seconds since the epoch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct InodeRecord {
    pub valid: bool,
    pub index: GlobalIndex,
    pub path: String,
    pub name: String,
    pub mode: u32,
    pub is_dir: bool,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub btime: u64,
    pub size: u64,
    pub blocks: Vec<GlobalIndex>,
    pub parent: GlobalIndex,
    /// Child inode indices; `GlobalIndex::UNUSED` marks a vacated slot.
    pub children: Vec<GlobalIndex>,
    pub nlink: u32,
    /// File extension, empty when the name has none.
    pub file_type: String,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl InodeRecord {
    pub fn new(index: GlobalIndex, path: &str, mode: u32, uid: u32, gid: u32) -> Self {
        let now = now_secs();
        let name = base_name(path).to_string();
        let file_type = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();
        Self {
            valid: true,
            index,
            path: path.to_string(),
            name,
            mode,
            is_dir: mode & S_IFDIR == S_IFDIR,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
            btime: now,
            size: 0,
            blocks: Vec::new(),
            parent: GlobalIndex::ROOT,
            children: Vec::new(),
            nlink: 1,
            file_type,
        }
    }

    /// The root directory at index 0, owned by the mounting user.
    pub fn root() -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        let mut root = Self::new(GlobalIndex::ROOT, "/", S_IFDIR | 0o755, uid, gid);
        root.name = String::new();
        root.nlink = 2;
        root
    }

    /// A free slot: what unlink leaves behind.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Points `path` and `name` at a new location.
    pub fn rename_to(&mut self, path: &str) {
        self.path = path.to_string();
        self.name = base_name(path).to_string();
        self.file_type = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();
        self.ctime = now_secs();
    }

    /// Bincode encoding zero-padded to `INODE_RECORD_SIZE`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = bincode::serialize(self)?;
        if bytes.len() > INODE_RECORD_SIZE {
            return Err(FsError::InvalidFormat(format!(
                "inode record for {} encodes to {} bytes",
                self.path,
                bytes.len()
            )));
        }
        bytes.resize(INODE_RECORD_SIZE, 0);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Final component of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Sealed inode slots spread across the volumes' inode files.
pub struct InodeStore<'a> {
    volumes: &'a VolumeManager,
    cipher: &'a SealCipher,
}

impl<'a> InodeStore<'a> {
    pub fn new(volumes: &'a VolumeManager, cipher: &'a SealCipher) -> Self {
        Self { volumes, cipher }
    }

    fn slot_size() -> usize {
        SealCipher::sealed_len(INODE_RECORD_SIZE)
    }

    pub fn read(&self, index: GlobalIndex) -> Result<InodeRecord> {
        let loc = index.locate(self.volumes.inode_capacity());
        let path = self.volumes.inode_path(loc.volume)?;
        let sealed = storage::read_slot(&path, loc.offset, Self::slot_size())?;
        let plaintext = self.cipher.open(&sealed).ok_or_else(|| {
            error!("Inode {} (volume {}, slot {}) failed authentication", index, loc.volume, loc.offset);
            FsError::Crypto { unit: Unit::Inode, volume: loc.volume, offset: loc.offset }
        })?;
        InodeRecord::from_bytes(&plaintext)
    }

    pub fn write(&self, index: GlobalIndex, record: &InodeRecord) -> Result<()> {
        let loc = index.locate(self.volumes.inode_capacity());
        let path = self.volumes.inode_path(loc.volume)?;
        let sealed = self.cipher.seal(&record.to_bytes()?)?;
        storage::write_slot(&path, loc.offset, Self::slot_size(), &sealed)
    }

    /// Resolves a path among the root's direct children.
    pub fn find_by_path(&self, path: &str) -> Result<GlobalIndex> {
        if path == "/" {
            return Ok(GlobalIndex::ROOT);
        }
        let root = self.read(GlobalIndex::ROOT)?;
        for &child in root.children.iter().filter(|c| !c.is_unused()) {
            let record = self.read(child)?;
            if record.valid && record.path == path {
                return Ok(child);
            }
        }
        Err(FsError::NotFound(path.to_string()))
    }
}
