// src/fuse_fs.rs
use crate::address::GlobalIndex;
use crate::error::{FsError, Result};
use crate::inode::InodeRecord;
use crate::session::Session;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::EINVAL;
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);

/// FUSE numbers inodes from 1; global index 0 is the root.
fn to_index(ino: u64) -> Option<GlobalIndex> {
    ino.checked_sub(1)
        .and_then(|i| u32::try_from(i).ok())
        .map(GlobalIndex)
}

fn to_ino(index: GlobalIndex) -> u64 {
    index.get() as u64 + 1
}

fn to_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn to_attr(record: &InodeRecord, block_size: usize) -> FileAttr {
    FileAttr {
        ino: to_ino(record.index),
        size: record.size,
        blocks: record.blocks.len() as u64 * (block_size as u64 / 512),
        atime: to_time(record.atime),
        mtime: to_time(record.mtime),
        ctime: to_time(record.ctime),
        crtime: to_time(record.btime),
        kind: if record.is_dir { FileType::Directory } else { FileType::RegularFile },
        perm: (record.mode & 0o7777) as u16,
        nlink: record.nlink,
        uid: record.uid,
        gid: record.gid,
        rdev: 0,
        flags: 0,
        blksize: block_size as u32,
    }
}

/// Kernel-facing adapter over a [`Session`].
///
/// Only the root directory holds entries, so every `(parent, name)` pair
/// resolves to the path `/name` under FUSE inode 1.
pub struct SealFs {
    session: Session,
}

impl SealFs {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name
            .to_str()
            .ok_or_else(|| FsError::InvalidName(format!("{:?}", name)))?;
        let index = to_index(parent).ok_or_else(|| FsError::NotFound(format!("ino {}", parent)))?;
        if index != GlobalIndex::ROOT {
            let record = self.session.inode(index)?;
            if !record.is_dir {
                return Err(FsError::NotDirectory(record.path));
            }
            return Err(FsError::NotFound(format!("{}/{}", record.path, name)));
        }
        Ok(format!("/{}", name))
    }

    fn index(ino: u64) -> Result<GlobalIndex> {
        to_index(ino).ok_or_else(|| FsError::NotFound(format!("ino {}", ino)))
    }

    fn attr(&self, record: &InodeRecord) -> FileAttr {
        to_attr(record, self.session.block_size())
    }
}

fn errno(op: &str, err: &FsError) -> i32 {
    match err {
        FsError::NotFound(_) | FsError::AlreadyExists(_) => debug!("{}: {}", op, err),
        _ => warn!("{}: {}", op, err),
    }
    err.to_errno()
}

impl Filesystem for SealFs {
    fn destroy(&mut self) {
        info!("Filesystem unmounted");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = self
            .child_path(parent, name)
            .and_then(|path| self.session.getattr(&path));
        match result {
            Ok(record) => reply.entry(&TTL, &self.attr(&record), 0),
            Err(e) => reply.error(errno("lookup", &e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match Self::index(ino).and_then(|i| self.session.inode(i)) {
            Ok(record) => reply.attr(&TTL, &self.attr(&record)),
            Err(e) => reply.error(errno("getattr", &e)),
        }
    }

    fn setattr(&mut self, _req: &Request, ino: u64, mode: Option<u32>, uid: Option<u32>, gid: Option<u32>, size: Option<u64>, _a: Option<TimeOrNow>, _m: Option<TimeOrNow>, _c: Option<SystemTime>, _fh: Option<u64>, _cr: Option<SystemTime>, _ch: Option<SystemTime>, _bk: Option<SystemTime>, _fl: Option<u32>, reply: ReplyAttr) {
        let result = Self::index(ino).and_then(|index| {
            if let Some(size) = size {
                self.session.truncate_at(index, size)?;
            }
            if mode.is_some() || uid.is_some() || gid.is_some() {
                self.session.set_attributes(index, mode, uid, gid)
            } else {
                self.session.inode(index)
            }
        });
        match result {
            Ok(record) => reply.attr(&TTL, &self.attr(&record)),
            Err(e) => reply.error(errno("setattr", &e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match Self::index(ino).and_then(|i| self.session.open_index(i)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("open", &e)),
        }
    }

    fn release(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        self.session.release(fh);
        reply.ok();
    }

    fn read(&mut self, _req: &Request, ino: u64, fh: u64, offset: i64, size: u32, _fl: i32, _l: Option<u64>, reply: ReplyData) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let index = match self.session.handle(fh).map(Ok).unwrap_or_else(|| Self::index(ino)) {
            Ok(index) => index,
            Err(e) => {
                reply.error(errno("read", &e));
                return;
            }
        };
        match self.session.read_at(index, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &e)),
        }
    }

    fn write(&mut self, _req: &Request, ino: u64, fh: u64, offset: i64, data: &[u8], _w: u32, _f: i32, _l: Option<u64>, reply: ReplyWrite) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let index = match self.session.handle(fh).map(Ok).unwrap_or_else(|| Self::index(ino)) {
            Ok(index) => index,
            Err(e) => {
                reply.error(errno("write", &e));
                return;
            }
        };
        match self.session.write_at(index, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno("write", &e)),
        }
    }

    fn create(&mut self, req: &Request, parent: u64, name: &OsStr, mode: u32, umask: u32, _f: i32, reply: ReplyCreate) {
        let result = self.child_path(parent, name).and_then(|path| {
            let record = self.session.create(&path, mode & !umask, req.uid(), req.gid())?;
            let fh = self.session.open_index(record.index)?;
            Ok((record, fh))
        });
        match result {
            Ok((record, fh)) => reply.created(&TTL, &self.attr(&record), 0, fh, 0),
            Err(e) => reply.error(errno("create", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.child_path(parent, name).and_then(|path| self.session.unlink(&path)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", &e)),
        }
    }

    fn rename(&mut self, _req: &Request, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|from| {
            let to = self.child_path(newparent, newname)?;
            self.session.rename(&from, &to)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", &e)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match Self::index(ino).and_then(|i| self.session.readdir_at(i)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", &e));
                return;
            }
        };

        let mut listing = vec![
            (ino, FileType::Directory, ".".to_string()),
            (to_ino(GlobalIndex::ROOT), FileType::Directory, "..".to_string()),
        ];
        listing.extend(entries.into_iter().map(|r| {
            let kind = if r.is_dir { FileType::Directory } else { FileType::RegularFile };
            (to_ino(r.index), kind, r.name)
        }));

        for (i, (child_ino, kind, name)) in listing.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Blocks, inodes and trees are persisted as they are written.
        match Self::index(ino).and_then(|i| self.session.inode(i)) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno("flush", &e)),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match Self::index(ino).and_then(|i| self.session.inode(i)) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno("fsync", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::crypto::generate_key;
    use crate::inode::S_IFREG;
    use std::os::unix::ffi::OsStrExt;

    fn mounted() -> (tempfile::TempDir, SealFs) {
        let temp_dir = tempfile::tempdir().unwrap();
        let session =
            Session::open(&temp_dir.path().join("superblock.bin"), &generate_key(), FsConfig::small()).unwrap();
        (temp_dir, SealFs::new(session))
    }

    #[test]
    fn test_inode_number_mapping() {
        assert_eq!(to_ino(GlobalIndex::ROOT), 1);
        assert_eq!(to_index(1), Some(GlobalIndex::ROOT));
        assert_eq!(to_index(18), Some(GlobalIndex(17)));
        assert_eq!(to_index(0), None);
    }

    #[test]
    fn test_attr_conversion() {
        let mut record = InodeRecord::new(GlobalIndex(4), "/x.log", S_IFREG | 0o640, 10, 20);
        record.size = 5000;
        record.blocks = vec![GlobalIndex(1), GlobalIndex(2)];
        let attr = to_attr(&record, 4096);
        assert_eq!(attr.ino, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.size, 5000);
        assert_eq!(attr.blocks, 16);
        assert_eq!((attr.uid, attr.gid), (10, 20));
    }

    #[test]
    fn test_child_path_under_root() {
        let (_dir, fs) = mounted();
        assert_eq!(fs.child_path(1, OsStr::new("notes.txt")).unwrap(), "/notes.txt");
    }

    #[test]
    fn test_child_path_rejects_other_parents() {
        let (_dir, mut fs) = mounted();
        let file = fs.session.create("/plain", 0o644, 0, 0).unwrap();
        let file_ino = to_ino(file.index);

        let err = fs.child_path(file_ino, OsStr::new("x")).unwrap_err();
        assert!(matches!(err, FsError::NotDirectory(_)));
        assert_eq!(err.to_errno(), libc::ENOTDIR);

        assert!(matches!(fs.child_path(0, OsStr::new("x")), Err(FsError::NotFound(_))));
        assert!(matches!(fs.child_path(100, OsStr::new("x")), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_child_path_rejects_non_utf8_name() {
        let (_dir, fs) = mounted();
        let err = fs.child_path(1, OsStr::from_bytes(b"bad\xff")).unwrap_err();
        assert!(matches!(err, FsError::InvalidName(_)));
        assert_eq!(err.to_errno(), EINVAL);
    }
}
