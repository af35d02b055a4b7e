// src/block_store.rs
use crate::address::GlobalIndex;
use crate::crypto::SealCipher;
use crate::error::{FsError, Result, Unit};
use crate::storage;
use crate::volume::VolumeManager;
use log::{debug, error};

/// Sealed data blocks, each checked against its volume's Merkle tree.
///
/// Every write rewrites the owning volume's tree file.
pub struct BlockStore<'a> {
    volumes: &'a mut VolumeManager,
    cipher: &'a SealCipher,
    strict: bool,
}

impl<'a> BlockStore<'a> {
    pub fn new(volumes: &'a mut VolumeManager, cipher: &'a SealCipher, strict: bool) -> Self {
        Self { volumes, cipher, strict }
    }

    fn slot_size(&self) -> usize {
        SealCipher::sealed_len(self.volumes.block_size())
    }

    fn pad(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block_size = self.volumes.block_size();
        if data.len() > block_size {
            return Err(FsError::InvalidFormat(format!(
                "block payload of {} bytes exceeds block size {}",
                data.len(),
                block_size
            )));
        }
        let mut block = data.to_vec();
        block.resize(block_size, 0);
        Ok(block)
    }

    /// Returns the full plaintext block.
    pub fn read(&self, index: GlobalIndex) -> Result<Vec<u8>> {
        let loc = index.locate(self.volumes.block_capacity());
        let path = self.volumes.block_path(loc.volume)?;
        let sealed = storage::read_slot(&path, loc.offset, self.slot_size())?;
        let plaintext = self.cipher.open(&sealed).ok_or_else(|| {
            error!("Block {} (volume {}, slot {}) failed authentication", index, loc.volume, loc.offset);
            FsError::Crypto { unit: Unit::Block, volume: loc.volume, offset: loc.offset }
        })?;

        if !self.volumes.tree(loc.volume)?.verify(loc.offset, &plaintext) {
            error!(
                "Integrity fault: block {} (volume {}, slot {}) does not match Merkle root",
                index, loc.volume, loc.offset
            );
            if self.strict {
                return Err(FsError::IntegrityMismatch { volume: loc.volume, offset: loc.offset });
            }
        }
        Ok(plaintext)
    }

    /// Seals `data` zero-padded to a full block, then updates and persists the tree.
    pub fn write(&mut self, index: GlobalIndex, data: &[u8]) -> Result<()> {
        let block = self.pad(data)?;
        let loc = index.locate(self.volumes.block_capacity());
        let path = self.volumes.block_path(loc.volume)?;
        let sealed = self.cipher.seal(&block)?;
        storage::write_slot(&path, loc.offset, self.slot_size(), &sealed)?;

        self.volumes.tree_mut(loc.volume)?.update_leaf(loc.offset, &block)?;
        self.volumes.save_tree(loc.volume)?;
        debug!("Block {} written (volume {}, slot {})", index, loc.volume, loc.offset);
        Ok(())
    }

    /// Checks `data` against the Merkle root without touching the disk.
    pub fn verify(&self, index: GlobalIndex, data: &[u8]) -> Result<bool> {
        let block = self.pad(data)?;
        let loc = index.locate(self.volumes.block_capacity());
        Ok(self.volumes.tree(loc.volume)?.verify(loc.offset, &block))
    }
}
