//! Archive attribute handling
//!
//! Backup tools on Windows mark changed files with the archive attribute.
//! Pairs can clear it on originals whose encrypted copy is current. Other
//! platforms have no such attribute.

use std::io;
use std::path::Path;

/// Clear the archive attribute of `path`
///
/// Returns whether the attribute was set before the call.
#[cfg(windows)]
#[allow(unsafe_code)]
pub fn clear_archive_attribute(path: &Path) -> io::Result<bool> {
    use windows::core::HSTRING;
    use windows::Win32::Storage::FileSystem::{
        GetFileAttributesW, SetFileAttributesW, FILE_ATTRIBUTE_ARCHIVE,
        FILE_FLAGS_AND_ATTRIBUTES, INVALID_FILE_ATTRIBUTES,
    };

    let wide = HSTRING::from(path.as_os_str());
    // SAFETY: `wide` is a valid NUL-terminated UTF-16 string for both calls
    let attributes = unsafe { GetFileAttributesW(&wide) };
    if attributes == INVALID_FILE_ATTRIBUTES {
        return Err(io::Error::last_os_error());
    }
    if attributes & FILE_ATTRIBUTE_ARCHIVE.0 == 0 {
        return Ok(false);
    }

    let cleared = FILE_FLAGS_AND_ATTRIBUTES(attributes & !FILE_ATTRIBUTE_ARCHIVE.0);
    unsafe { SetFileAttributesW(&wide, cleared) }
        .map_err(|e| io::Error::from_raw_os_error(e.code().0))?;
    Ok(true)
}

/// Clear the archive attribute of `path`
///
/// There is no archive attribute here; the file only has to exist.
#[cfg(not(windows))]
pub fn clear_archive_attribute(path: &Path) -> io::Result<bool> {
    std::fs::symlink_metadata(path)?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(clear_archive_attribute(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_clearing_twice() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        clear_archive_attribute(&file).unwrap();
        assert!(!clear_archive_attribute(&file).unwrap());
    }
}
