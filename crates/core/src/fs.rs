//! Reading and writing JSON and TOML documents.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Read a whole file as UTF-8.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] if the file cannot be read.
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
}

/// Read and deserialize a JSON document.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] or [`Error::JsonParseFailed`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_to_string(path)?;
    debug!(path = %path.display(), bytes = text.len(), "Parsing JSON");
    serde_json::from_str(&text).map_err(|e| Error::json_parse_failed(path, e.to_string()))
}

/// Read and deserialize a TOML document.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] or [`Error::TomlParseFailed`].
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_to_string(path)?;
    debug!(path = %path.display(), bytes = text.len(), "Parsing TOML");
    toml::from_str(&text).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

/// Serialize a value as pretty JSON.
///
/// # Errors
///
/// Returns [`Error::JsonEncodeFailed`] if the value cannot be encoded.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::json_encode_failed(e.to_string()))
}

/// Serialize a value as pretty JSON and write it to `path`.
///
/// # Errors
///
/// Returns [`Error::JsonEncodeFailed`] or [`Error::FileWriteFailed`].
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = to_json_pretty(value)?;
    std::fs::write(path, text).map_err(|e| Error::file_write_failed(path, e.to_string()))
}
