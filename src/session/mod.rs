//! Credential persistence
//!
//! - Storage: the durable key-value collaborator (file-backed or in-memory)
//! - Store: the single writer of the credential bundle and client identity

pub mod storage;
pub mod store;

pub use storage::{FileStorage, MemoryStorage, SecureStorage, StorageError};
pub use store::SessionStore;
