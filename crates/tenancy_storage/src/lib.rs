#![forbid(unsafe_code)]

pub mod memory;
pub mod repo;
pub mod row;

pub use memory::InMemoryVerificationStore;
pub use repo::{StorageError, VerificationStore};
pub use row::DecodePolicy;
