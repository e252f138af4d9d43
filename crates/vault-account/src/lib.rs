//! Account and account-bin manager: signing-script pool lookahead,
//! refill, and issuance.

pub mod manager;

pub use manager::AccountManager;
