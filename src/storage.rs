// src/storage.rs
//! File helpers shared by the on-disk stores.
//!
//! Whole-file state (superblock, bitmaps, Merkle trees, key files) is
//! replaced atomically through a temporary file. Sealed inode and block
//! slots are positional reads and writes into preexisting files.

use crate::error::{FsError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tempfile::Builder;

/// Writes a file atomically: the target is either fully replaced or untouched.
pub fn write_atomically<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp_file = Builder::new()
        .prefix(".sealfs")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    write_fn(temp_file.as_file_mut())?;
    temp_file.as_file_mut().sync_all()?;

    temp_file.persist(path)?;
    Ok(())
}

pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_atomically(path, |file| file.write_all(data))
}

/// Creates an empty backing file, truncating anything already there.
pub fn create_empty(path: &Path) -> Result<()> {
    File::create(path)?;
    Ok(())
}

/// Reads slot `index` of `slot_size` bytes.
///
/// A slot past the end of the file was never written and reads as
/// `InvalidFormat`.
pub fn read_slot(path: &Path, index: u32, slot_size: usize) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let offset = index as u64 * slot_size as u64;
    let mut buf = vec![0u8; slot_size];
    file.read_exact_at(&mut buf, offset).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FsError::InvalidFormat(format!(
                "slot {} of {} was never written",
                index,
                path.display()
            ))
        } else {
            FsError::Io(e)
        }
    })?;
    Ok(buf)
}

/// Writes `data` into slot `index`, extending the file when needed.
pub fn write_slot(path: &Path, index: u32, slot_size: usize, data: &[u8]) -> Result<()> {
    if data.len() != slot_size {
        return Err(FsError::InvalidFormat(format!(
            "slot payload is {} bytes, expected {}",
            data.len(),
            slot_size
        )));
    }
    let file = OpenOptions::new().write(true).open(path)?;
    file.write_all_at(data, index as u64 * slot_size as u64)?;
    Ok(())
}
