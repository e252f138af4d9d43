//! Errors surfaced by the sync coordinator and its network client adapters.

use thiserror::Error;

use vault_db::error::VaultError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("network connection failed: {0}")]
    Connection(String),

    #[error("network protocol error: {0}")]
    Protocol(String),

    #[error("no vault is open")]
    NoVaultOpen,

    #[error("not connected to a network peer")]
    NotConnected,

    #[error("transaction is missing signatures")]
    TxUnsigned,

    #[error("transaction depends on another transaction that is missing signatures")]
    DependencyUnsigned,
}

impl From<electrum_client::Error> for SyncError {
    fn from(e: electrum_client::Error) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

impl From<vault_db::error::StoreError> for SyncError {
    fn from(e: vault_db::error::StoreError) -> Self {
        SyncError::Vault(e.into())
    }
}
