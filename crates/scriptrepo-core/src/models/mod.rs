//! Data models for repository entities.
//!
//! - `RepoScript`: a published script as the repository reports it
//! - `ScriptListing`: the DataTables-style envelope the listing arrives in

pub mod script;

pub use script::{RepoScript, ScriptListing};
