// src/lib.rs
//! SealFS: an encrypted, multi-volume filesystem.
//!
//! Every inode record and data block is sealed with ChaCha20-Poly1305, and
//! each volume keeps a SHA-256 Merkle tree over its block slots. [`Session`]
//! is the engine entry point; [`SealFs`] exposes it over FUSE.

pub mod address;
pub mod bitmap;
pub mod block_store;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fuse_fs;
pub mod inode;
pub mod merkle;
pub mod session;
pub mod storage;
pub mod volume;

pub use address::GlobalIndex;
pub use config::FsConfig;
pub use error::{FsError, Result};
pub use fuse_fs::SealFs;
pub use session::Session;
