//! Result type definition and extension trait.

use crate::error::Error;

/// The standard Result type for fabsync file and document operations.
///
/// # Examples
///
/// ```ignore
/// fn load(path: &Path) -> Result<AppConfig> {
///     let config: AppConfig = fabsync_core::fs::read_toml(path)?;
///     config.validate()?;
///     Ok(config)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for results of decoding foreign documents.
pub trait ResultExt<T> {
    /// Map the error into an invalid record error, prefixed with `context`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] carrying the original message.
    fn invalid_record(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn invalid_record(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::invalid_record(format!("{context}: {e}")))
    }
}
