use thiserror::Error;

use crate::wallet_ops::WalletOpsError;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("wallet service error: {0}")]
    Service(#[from] WalletOpsError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
