pub mod error;
pub mod fs_storage;

pub use error::StorageError;
pub use fs_storage::FsStorage;

use async_trait::async_trait;

/// Byte-range access to the files served by the daemon.
///
/// Sessions only ever read or write one block at a time, so implementations
/// are free to reopen the file on every call.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads at most `max_len` bytes of `name` starting at `offset`.
    /// Reading at or past the end of the file yields an empty buffer.
    async fn read(&self, name: &str, offset: u64, max_len: usize) -> Result<Vec<u8>, StorageError>;

    /// Writes `data` into `name` at `offset`, creating the file if needed.
    /// A write at offset 0 starts the file over.
    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> Result<(), StorageError>;
}
