//! Authentication module for the repository session.
//!
//! This module provides:
//! - `Credential`: the session cookies, parsed from the login step's output
//! - `CredentialCache`: lazily logs in once per process and shares the result
//! - `LoginStore`: the encrypted, machine-bound copy of a remembered login
//! - `LoginProvider`: the interactive login step (`CommandLogin` shells out)
//!
//! The saved login is encrypted with a key derived from this machine's
//! hardware address. That keeps the file from being copied to another
//! machine or read casually; it is not protection against anyone who can
//! run code as the same user.

pub mod cache;
pub mod credential;
pub mod error;
pub mod login;
pub mod machine;
pub mod store;

pub use cache::CredentialCache;
pub use credential::{Cookie, Credential};
pub use error::{AuthenticationError, CacheError};
pub use login::{CommandLogin, LoginOutcome, LoginProvider};
pub use machine::MachineKey;
pub use store::{login_path, KeySource, LoginStore, SavedLogin};
