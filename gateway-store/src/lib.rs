//! Encrypted credential store for the chat gateway: providers, accounts,
//! singleton config, and logs, all in one SQLite file.

mod cipher;
mod store;

pub use cipher::{Cipher, CipherError, KeyBackend};
pub use store::{Store, StoreError};
