// src/error.rs
//! Error type shared by every SealFS layer.
//!
//! Each variant maps to exactly one POSIX errno through [`FsError::to_errno`],
//! which is what the FUSE adapter replies with.

use std::fmt;
use thiserror::Error;

/// The kind of sealed unit a crypto or integrity fault was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Inode,
    Block,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Inode => write!(f, "inode"),
            Unit::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// No free inode, block, child slot or volume slot is left.
    #[error("out of space: {0}")]
    Exhausted(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Authenticated decryption failed: corruption, tampering or a wrong key.
    #[error("authentication failed for {unit} {offset} in volume {volume}")]
    Crypto { unit: Unit, volume: u32, offset: u32 },

    /// Merkle verification disagrees with the stored root hash.
    #[error("integrity mismatch for block {offset} in volume {volume}")]
    IntegrityMismatch { volume: u32, offset: u32 },

    /// A name the filesystem cannot store, such as one that is not UTF-8.
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("invalid on-disk format: {0}")]
    InvalidFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl FsError {
    /// POSIX errno reported to the kernel for this error.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            FsError::Io(_) => libc::EIO,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::Exhausted(_) => libc::ENOSPC,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::Crypto { .. } => libc::EIO,
            FsError::IntegrityMismatch { .. } => libc::EIO,
            FsError::InvalidName(_) => libc::EINVAL,
            FsError::NameTooLong(_) => libc::ENAMETOOLONG,
            FsError::FileTooLarge(_) => libc::EFBIG,
            FsError::InvalidFormat(_) => libc::EIO,
            FsError::Serialization(_) => libc::EIO,
            FsError::InvalidKey(_) => libc::EINVAL,
            FsError::Unsupported(_) => libc::ENOTSUP,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

impl From<tempfile::PersistError> for FsError {
    fn from(err: tempfile::PersistError) -> Self {
        FsError::Io(err.error)
    }
}
