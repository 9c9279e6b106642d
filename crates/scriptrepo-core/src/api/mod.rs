//! HTTP client module for the script repository.
//!
//! This module provides the `RepositoryClient` for listing a scripter's
//! published scripts and uploading new script archives.
//!
//! The repository authenticates with browser session cookies obtained
//! through the interactive login in `crate::auth`.

pub mod client;
pub mod error;

pub use client::RepositoryClient;
pub use error::RepositoryError;
