//! Utility functions for download directories and file names

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Make sure `dir` exists, is a directory, and accepts new files
///
/// Missing directories (and their parents) are created. Writability is
/// checked by creating and removing a scratch file, since permission bits alone
/// do not account for ACLs or read-only mounts.
///
/// # Errors
///
/// Returns [`Error::Config`] if `dir` exists but is not a directory, and
/// [`Error::Io`] if it cannot be created or written to.
///
/// # Examples
///
/// ```no_run
/// use cmr_fetch::utils::ensure_download_dir;
/// use std::path::Path;
///
/// # fn main() -> cmr_fetch::Result<()> {
/// ensure_download_dir(Path::new("/data/granules"))?;
/// # Ok(())
/// # }
/// ```
pub fn ensure_download_dir(dir: &Path) -> Result<()> {
    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(Error::Config {
                message: format!("{} exists and is not a directory", dir.display()),
                key: Some("destination".to_string()),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "creating download directory");
            std::fs::create_dir_all(dir)?;
        }
        Err(e) => return Err(e.into()),
    }

    // the scratch file is removed on drop
    tempfile::Builder::new()
        .prefix(".write-check.")
        .tempfile_in(dir)?;
    Ok(())
}

/// File name for a download URL: the last non-empty path segment
///
/// Only percent-encoding is decoded; `&`, `=`, `;` and `+` are kept as
/// written. Returns `None` for URLs without a usable final segment (e.g.
/// `https://host/` or `..`) or whose segment is not valid UTF-8 once decoded.
///
/// # Examples
///
/// ```
/// use cmr_fetch::utils::filename_from_url;
///
/// assert_eq!(
///     filename_from_url("https://data.example.com/path/granule%201.nc?x=1").as_deref(),
///     Some("granule 1.nc")
/// );
/// assert_eq!(filename_from_url("https://data.example.com/"), None);
/// ```
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    if decoded == "." || decoded == ".." || decoded.contains(['/', '\\']) {
        return None;
    }
    Some(decoded)
}

/// Destination path for `url` inside `dir`
pub fn destination_for(url: &str, dir: &Path) -> Option<PathBuf> {
    filename_from_url(url).map(|name| dir.join(name))
}
