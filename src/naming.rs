use crate::error::{DatasetError, DatasetResult};

pub const DEFAULT_VERSION: &str = "1";

/// Splits a logical filename at its last `.` into base name and extension.
pub fn split_extension(filename: &str) -> DatasetResult<(&str, &str)> {
    filename
        .rsplit_once('.')
        .ok_or_else(|| DatasetError::InvalidFilename {
            filename: filename.to_string(),
            reason: "missing extension".to_string(),
        })
}

/// Maps a logical filename and version tag to the physical blob key,
/// `{base}_v{version}.{ext}`.
///
/// Only the final extension is treated specially: `data.backup.csv` at
/// version `1` becomes `data.backup_v1.csv`. The version is used verbatim.
pub fn versioned_key(filename: &str, version: &str) -> DatasetResult<String> {
    let (base, ext) = split_extension(filename)?;
    Ok(format!("{}_v{}.{}", base, version, ext))
}
