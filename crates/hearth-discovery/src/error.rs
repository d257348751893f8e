//! Discovery error types

use hearth_core::EntityIdError;
use thiserror::Error;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("malformed discovery payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported component '{0}'")]
    UnsupportedComponent(String),

    #[error("cannot derive an entity id: {0}")]
    EntityId(#[from] EntityIdError),
}
