//! The keychain manager: BIP32 derivation, the unlock-key session
//! cache, encryption at rest, and BIP32 import/export/merge.

pub mod manager;
pub mod session;

pub use manager::KeychainManager;
pub use session::SessionContext;
