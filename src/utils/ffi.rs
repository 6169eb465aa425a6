//! Conversions from Rust strings and paths to engine-facing C strings.

use crate::core::error::{Error, Result};
use std::ffi::CString;
use std::path::Path;

/// Convert `value` to a C string, rejecting interior NUL bytes.
pub fn to_cstring(value: &str, what: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| Error::invalid_argument(format!("{} contains a NUL byte", what)))
}

/// Convert a namespace label, which must also be non-empty.
pub fn namespace_cstring(namespace: &str) -> Result<CString> {
    if namespace.is_empty() {
        return Err(Error::invalid_argument("namespace must not be empty"));
    }
    to_cstring(namespace, "namespace")
}

/// Convert a filesystem path to the exact bytes the engine will open.
#[cfg(unix)]
pub fn path_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::invalid_argument(format!("path contains a NUL byte: {}", path.display()))
    })
}

/// Convert a filesystem path to the exact bytes the engine will open.
#[cfg(not(unix))]
pub fn path_cstring(path: &Path) -> Result<CString> {
    let s = path.to_str().ok_or_else(|| {
        Error::invalid_argument(format!("path is not valid UTF-8: {}", path.display()))
    })?;
    to_cstring(s, "path")
}
