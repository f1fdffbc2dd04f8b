//! Snapshot info file handling.
//!
//! A program snapshot is accompanied by `<snapshot>.info.json`, which maps
//! function and class names to their symbolic offsets inside the snapshot
//! and records the snapshot's hash for verification.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SessionError;

/// Name → symbolic offset tables read from the snapshot info file.
#[derive(Debug, Clone, Deserialize)]
pub struct NameOffsetMapping {
    pub snapshot_hash: u32,
    #[serde(default)]
    pub function_offsets: HashMap<String, u32>,
    #[serde(default)]
    pub class_offsets: HashMap<String, u32>,
}

/// The info file path for a snapshot: `<snapshot>.info.json`.
pub fn info_file_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".info.json");
    snapshot.with_file_name(name)
}

/// Load and decode a snapshot info file.
pub fn load_name_offsets(path: &Path) -> Result<NameOffsetMapping, SessionError> {
    let data = std::fs::read(path)
        .map_err(|_| SessionError::InfoFileNotFound(path.to_path_buf()))?;
    serde_json::from_slice(&data).map_err(|e| SessionError::MalformedInfoFile(e.to_string()))
}
