// src/merkle.rs
//! Per-volume Merkle tree over data-block slots.
//!
//! Nodes live in an arena (`Vec<MerkleNode>`); parent and child links are
//! arena positions. Leaves hash the padded plaintext of one block with
//! SHA-256. An internal node hashes `left ∥ right`, or `child ∥ child` when an
//! odd-sized level left it with a single child.
//!
//! On disk the tree is a pre-order dump, one 38-byte record per node:
//! `hash(32) ∥ block_index(i32 LE, -1 for internal) ∥ has_left(u8) ∥ has_right(u8)`.
//! Ranges are not stored; they are rebuilt from the children on load.

use crate::error::{FsError, Result};
use crate::storage;
use log::debug;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};
use std::path::Path;

pub type Hash = [u8; 32];

const RECORD_LEN: usize = 32 + 4 + 1 + 1;

/// Deepest tree a well-formed dump can describe (2^32 leaves).
const MAX_DEPTH: usize = 40;

pub fn hash_block(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub hash: Hash,
    pub min_index: u32,
    pub max_index: u32,
    /// Block slot for a leaf, -1 for internal nodes.
    pub block_index: i32,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub parent: Option<usize>,
}

impl MerkleNode {
    fn leaf(block_index: u32, hash: Hash) -> Self {
        Self {
            hash,
            min_index: block_index,
            max_index: block_index,
            block_index: block_index as i32,
            left: None,
            right: None,
            parent: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.block_index >= 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    root: Option<usize>,
}

impl MerkleTree {
    /// Builds a tree whose leaf `i` carries `leaves[i]`.
    pub fn build(leaves: &[Hash]) -> Self {
        let mut tree = MerkleTree::default();
        let mut level: Vec<usize> = leaves
            .iter()
            .enumerate()
            .map(|(i, hash)| tree.push(MerkleNode::leaf(i as u32, *hash)))
            .collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied();
                next.push(tree.join(left, right));
            }
            level = next;
        }

        tree.root = level.first().copied();
        tree
    }

    /// Tree over `count` slots holding random placeholder hashes.
    pub fn with_random_leaves(count: u32) -> Self {
        let mut rng = thread_rng();
        let leaves: Vec<Hash> = (0..count)
            .map(|_| {
                let mut hash = [0u8; 32];
                rng.fill_bytes(&mut hash);
                hash
            })
            .collect();
        Self::build(&leaves)
    }

    fn push(&mut self, node: MerkleNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn join(&mut self, left: usize, right: Option<usize>) -> usize {
        let max_index = right.map_or(self.nodes[left].max_index, |r| self.nodes[r].max_index);
        let parent = self.push(MerkleNode {
            hash: [0u8; 32],
            min_index: self.nodes[left].min_index,
            max_index,
            block_index: -1,
            left: Some(left),
            right,
            parent: None,
        });
        self.nodes[left].parent = Some(parent);
        if let Some(r) = right {
            self.nodes[r].parent = Some(parent);
        }
        self.nodes[parent].hash = self.combine(parent);
        parent
    }

    /// Hash an internal node should carry given its children's current hashes.
    fn combine(&self, index: usize) -> Hash {
        let node = &self.nodes[index];
        match (node.left, node.right) {
            (Some(l), Some(r)) => hash_pair(&self.nodes[l].hash, &self.nodes[r].hash),
            (Some(c), None) | (None, Some(c)) => hash_pair(&self.nodes[c].hash, &self.nodes[c].hash),
            (None, None) => node.hash,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn root_hash(&self) -> Option<Hash> {
        self.root.map(|r| self.nodes[r].hash)
    }

    pub fn root_hex(&self) -> String {
        self.root_hash().map(hex::encode).unwrap_or_default()
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn node(&self, index: usize) -> Option<&MerkleNode> {
        self.nodes.get(index)
    }

    /// Locates the leaf for `block_index` by range-guided descent.
    pub fn find_leaf(&self, block_index: u32) -> Option<usize> {
        let mut current = self.root?;
        loop {
            let node = &self.nodes[current];
            if block_index < node.min_index || block_index > node.max_index {
                return None;
            }
            if node.is_leaf() {
                return Some(current);
            }
            current = match (node.left, node.right) {
                (Some(l), _) if block_index <= self.nodes[l].max_index => l,
                (_, Some(r)) => r,
                _ => return None,
            };
        }
    }

    /// Replaces the leaf hash of `block_index` and recomputes its path to the root.
    pub fn update_leaf(&mut self, block_index: u32, plaintext: &[u8]) -> Result<()> {
        let leaf = self.find_leaf(block_index).ok_or_else(|| {
            FsError::InvalidFormat(format!("no Merkle leaf for block {}", block_index))
        })?;
        self.nodes[leaf].hash = hash_block(plaintext);

        let mut current = self.nodes[leaf].parent;
        while let Some(index) = current {
            self.nodes[index].hash = self.combine(index);
            current = self.nodes[index].parent;
        }
        Ok(())
    }

    /// Recomputes the root from `H(plaintext)` along the leaf's sibling path.
    pub fn verify(&self, block_index: u32, plaintext: &[u8]) -> bool {
        let (Some(leaf), Some(root)) = (self.find_leaf(block_index), self.root_hash()) else {
            return false;
        };

        let mut hash = hash_block(plaintext);
        let mut current = leaf;
        while let Some(parent) = self.nodes[current].parent {
            let node = &self.nodes[parent];
            hash = if node.left == Some(current) {
                match node.right {
                    Some(r) => hash_pair(&hash, &self.nodes[r].hash),
                    None => hash_pair(&hash, &hash),
                }
            } else {
                match node.left {
                    Some(l) => hash_pair(&self.nodes[l].hash, &hash),
                    None => hash_pair(&hash, &hash),
                }
            };
            current = parent;
        }
        hash == root
    }

    /// True when every internal hash matches its children.
    pub fn is_consistent(&self) -> bool {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_leaf())
            .all(|(i, n)| self.combine(i) == n.hash)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.nodes.len() * RECORD_LEN);
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            out.extend_from_slice(&node.hash);
            out.extend_from_slice(&node.block_index.to_le_bytes());
            out.push(node.left.is_some() as u8);
            out.push(node.right.is_some() as u8);
            // Right pushed first so the left subtree is emitted first.
            if let Some(r) = node.right {
                stack.push(r);
            }
            if let Some(l) = node.left {
                stack.push(l);
            }
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut tree = MerkleTree::default();
        if data.is_empty() {
            return Ok(tree);
        }
        let mut cursor = 0usize;
        let root = tree.read_node(data, &mut cursor, None, 0)?;
        if cursor != data.len() {
            return Err(FsError::InvalidFormat(format!(
                "{} trailing bytes after Merkle dump",
                data.len() - cursor
            )));
        }
        tree.root = Some(root);
        Ok(tree)
    }

    fn read_node(
        &mut self,
        data: &[u8],
        cursor: &mut usize,
        parent: Option<usize>,
        depth: usize,
    ) -> Result<usize> {
        if depth > MAX_DEPTH {
            return Err(FsError::InvalidFormat("Merkle dump nests too deep".into()));
        }
        let record = data
            .get(*cursor..*cursor + RECORD_LEN)
            .ok_or_else(|| FsError::InvalidFormat("truncated Merkle dump".into()))?;
        *cursor += RECORD_LEN;

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&record[..32]);
        let block_index = i32::from_le_bytes([record[32], record[33], record[34], record[35]]);
        let has_left = record[36] != 0;
        let has_right = record[37] != 0;

        let index = self.push(MerkleNode {
            hash,
            min_index: 0,
            max_index: 0,
            block_index,
            left: None,
            right: None,
            parent,
        });

        if block_index >= 0 {
            if has_left || has_right {
                return Err(FsError::InvalidFormat(format!(
                    "Merkle leaf {} has children",
                    block_index
                )));
            }
            self.nodes[index].min_index = block_index as u32;
            self.nodes[index].max_index = block_index as u32;
            return Ok(index);
        }
        if !has_left && !has_right {
            return Err(FsError::InvalidFormat("Merkle internal node without children".into()));
        }

        let left = if has_left {
            Some(self.read_node(data, cursor, Some(index), depth + 1)?)
        } else {
            None
        };
        let right = if has_right {
            Some(self.read_node(data, cursor, Some(index), depth + 1)?)
        } else {
            None
        };

        if let (Some(l), Some(r)) = (left, right) {
            if self.nodes[l].max_index >= self.nodes[r].min_index {
                return Err(FsError::InvalidFormat(format!(
                    "Merkle leaves out of order: {} before {}",
                    self.nodes[l].max_index, self.nodes[r].min_index
                )));
            }
        }

        let first = left.or(right).unwrap_or(index);
        let last = right.or(left).unwrap_or(index);
        let min_index = self.nodes[first].min_index;
        let max_index = self.nodes[last].max_index;
        let node = &mut self.nodes[index];
        node.left = left;
        node.right = right;
        node.min_index = min_index;
        node.max_index = max_index;
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::write_file_atomic(path, &self.to_bytes())?;
        debug!("Merkle tree saved to {:?} (root {})", path, self.root_hex());
        Ok(())
    }

    /// Reads a dump and rejects it unless every internal hash matches its
    /// children.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let tree = Self::from_bytes(&data)?;
        if !tree.is_consistent() {
            return Err(FsError::InvalidFormat(format!(
                "Merkle tree {:?} has stale internal hashes",
                path
            )));
        }
        debug!("Merkle tree loaded from {:?}: {} nodes, root {}", path, tree.len(), tree.root_hex());
        Ok(tree)
    }
}
