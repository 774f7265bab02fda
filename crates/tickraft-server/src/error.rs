use thiserror::Error;
use tickraft_core::{ConfigError, PeerConfig};
use tickraft_storage::StorageError;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server is already initialized")]
    AlreadyInitialized,

    #[error("server is not initialized")]
    NotInitialized,

    #[error("server has been shut down")]
    ShutDown,

    #[error("not the leader (leader hint: {hint:?})")]
    NotLeader { hint: Option<PeerConfig> },
}
