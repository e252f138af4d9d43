//! Tagged error taxonomy: one `thiserror` enum per component, composed
//! into a top-level [`VaultError`] that callers match on by variant. Every
//! variant keeps a stable discriminant independent of its `Display` text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultLifecycleError {
    #[error("wrong schema version: stored {stored}, expected {expected}")]
    WrongSchemaVersion { stored: u32, expected: u32 },
    #[error("wrong network: store has {stored}, opened as {requested}")]
    WrongNetwork { stored: String, requested: String },
    #[error("schema migration required: stored {stored}, current {current}")]
    NeedsSchemaMigration { stored: u32, current: u32 },
    #[error("failed to open database: {0}")]
    FailedToOpenDatabase(String),
}

#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("keychain not found: {0}")]
    NotFound(String),
    #[error("keychain already exists: {0}")]
    AlreadyExists(String),
    #[error("keychain is not private: {0}")]
    IsNotPrivate(String),
    #[error("keychain private key is locked: {0}")]
    PrivateKeyLocked(String),
    #[error("failed to unlock private key for keychain: {0}")]
    PrivateKeyUnlockFailed(String),
    #[error("invalid private key material for keychain: {0}")]
    InvalidPrivateKey(String),
    #[error("chain code is locked: {0}")]
    ChainCodeLocked(String),
    #[error("invalid keychain name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("account already exists: {0}")]
    AlreadyExists(String),
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: u64,
        available: u64,
        username: Option<String>,
    },
    #[error("cannot issue a signing script from the change bin")]
    CannotIssueChangeScript,
}

#[derive(Error, Debug)]
pub enum AccountBinError {
    #[error("account bin not found: {0}")]
    NotFound(String),
    #[error("account bin already exists: {0}")]
    AlreadyExists(String),
    #[error("account bin out of unused scripts")]
    OutOfScripts,
}

#[derive(Error, Debug)]
pub enum TxError {
    #[error("transaction not found")]
    NotFound,
    #[error("invalid inputs: {0}")]
    InvalidInputs(String),
    #[error("invalid outputs: {0}")]
    InvalidOutputs(String),
    #[error("outputs exceed inputs")]
    OutputsExceedInputs,
    #[error("output not found")]
    OutputNotFound,
    #[error("transaction mismatch: {0}")]
    Mismatch(String),
    #[error("transaction is not fully signed")]
    NotSigned,
    #[error("output script is not in the user's whitelist")]
    OutputScriptNotInUserWhitelist,
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("block header not found")]
    BlockHeaderNotFound,
    #[error("merkle block invalid: {0}")]
    MerkleBlockInvalid(String),
    #[error("merkle transaction inserted out of order")]
    MerkleTxBadInsertionOrder,
    #[error("merkle transaction mismatch: {0}")]
    MerkleTxMismatch(String),
    #[error("merkle block failed to connect to an existing header")]
    MerkleTxFailedToConnect,
    #[error("merkle block has invalid height")]
    MerkleTxInvalidHeight,
}

#[derive(Error, Debug)]
pub enum MiscError {
    #[error("signing script not found")]
    SigningScriptNotFound,
    #[error("contact not found: {0}")]
    ContactNotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),
    #[error("invalid username: {0}")]
    InvalidUsername(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("operation attempted outside an open transaction")]
    NotInTransaction,
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Lifecycle(#[from] VaultLifecycleError),
    #[error(transparent)]
    Keychain(#[from] KeychainError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    AccountBin(#[from] AccountBinError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Misc(#[from] MiscError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Store(StoreError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_keep_stable_discriminants_regardless_of_display() {
        let e = VaultError::Account(AccountError::InsufficientFunds {
            requested: 60_010_000,
            available: 50_000_000,
            username: None,
        });
        match e {
            VaultError::Account(AccountError::InsufficientFunds { requested, available, .. }) => {
                assert_eq!(requested, 60_010_000);
                assert_eq!(available, 50_000_000);
            }
            _ => panic!("wrong variant"),
        }
    }
}
