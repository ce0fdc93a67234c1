use serde::{Deserialize, Serialize};

use crate::model::{ListingItem, Source};

/// Query string shared by list, view and download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathQuery {
    pub path: String,
    #[serde(default)]
    pub source: Source,
}

/// Directory listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub path: String,
    pub source: Source,
    pub items: Vec<ListingItem>,
}

/// Delete request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
    #[serde(default)]
    pub source: Source,
}

/// Delete response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub path: String,
}

/// Shell command request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRequest {
    pub command: String,
}

/// Shell command response. `output` is stdout followed by stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellResponse {
    pub command: String,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}
