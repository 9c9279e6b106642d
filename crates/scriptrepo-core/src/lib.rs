//! Core library for scriptrepo.
//!
//! Talks to the TRiBot script repository on behalf of a scripter: logs in
//! through an external prompt, keeps the session cookies (optionally saved
//! to disk, encrypted to this machine), lists published scripts and uploads
//! new script archives.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod version;

pub use api::{RepositoryClient, RepositoryError};
pub use auth::{AuthenticationError, CredentialCache};
pub use config::Config;
pub use models::RepoScript;
pub use version::VersionPolicy;
