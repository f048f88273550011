use crate::core_storage::{Storage, StorageError};
use crate::helpers::sanitize_file_name;
use async_trait::async_trait;
use log::{debug, error};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Serves files from a directory on the local filesystem.
///
/// Every name is resolved under `root`; names that would leave it are
/// refused with `StorageError::AccessDenied`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        match sanitize_file_name(name) {
            Some(relative) => Ok(self.root.join(relative)),
            None => {
                error!("Path is outside of the served root: {:?}", name);
                Err(StorageError::AccessDenied(name.to_string()))
            }
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, name: &str, offset: u64, max_len: usize) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::from_io(name, e))?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StorageError::from_io(name, e))?;

        // A single read may return less than asked for; keep going until the
        // block is full or the file ends.
        let mut buffer = Vec::with_capacity(max_len);
        file.take(max_len as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| StorageError::from_io(name, e))?;

        debug!("Read {} bytes of {:?} at offset {}", buffer.len(), path, offset);
        Ok(buffer)
    }

    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(offset == 0)
            .open(&path)
            .await
            .map_err(|e| StorageError::from_io(name, e))?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StorageError::from_io(name, e))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::from_io(name, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::from_io(name, e))?;

        debug!("Wrote {} bytes to {:?} at offset {}", data.len(), path, offset);
        Ok(())
    }
}
