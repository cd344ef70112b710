use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot is corrupted: {0}")]
    CorruptData(String),
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Writes `value` to `path` as base64-wrapped JSON, replacing any previous snapshot.
pub fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }
    let json =
        serde_json::to_vec(value).map_err(|e| PersistenceError::CorruptData(e.to_string()))?;
    fs::write(path, STANDARD.encode(json))?;
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let encoded = fs::read_to_string(path)?;
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PersistenceError::CorruptData(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| PersistenceError::CorruptData(format!("invalid JSON: {e}")))
}
