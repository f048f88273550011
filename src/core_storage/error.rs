// Storage errors, converted into TftpError at the session boundary
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Classifies an I/O error raised while touching `name`.
    pub fn from_io(name: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            std::io::ErrorKind::PermissionDenied => StorageError::AccessDenied(name.to_string()),
            _ => StorageError::Io {
                name: name.to_string(),
                source,
            },
        }
    }
}
