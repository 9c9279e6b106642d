use serde::{Deserialize, Serialize};

/// A script published to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoScript {
    pub id: String,
    pub name: String,
    /// Usually numeric ("1.05") but the repository does not enforce it.
    pub version: String,
}

/// Listing response. The scripter panel serves DataTables JSON, so the rows
/// live under `aaData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptListing {
    #[serde(rename = "aaData")]
    pub scripts: Vec<RepoScript>,
}
