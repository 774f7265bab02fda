use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("log i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("log is closed")]
    Closed,

    #[error("cannot pop an empty log")]
    EmptyLog,

    #[error("log is corrupt: {0}")]
    Corrupt(String),

    #[error("payload of {size} bytes at {position} does not fit the data region")]
    DataRegionFull { position: u32, size: usize },

    #[error("superblock needs {needed} bytes, only {available} available")]
    SuperblockOverflow { needed: usize, available: usize },
}
