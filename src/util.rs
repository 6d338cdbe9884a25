//! Miscellaneous filesystem utilities.

use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;

/// Atomically write a file: write to a fresh temporary file in the same
/// directory, then rename it over `path`. Concurrent readers of `path`
/// never observe a partial write.
///
/// # Panics
///
/// Panics if `path` has no containing directory.
pub fn write_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().expect("'path' must be a file, so it must have a parent");
    fs::create_dir_all(dir)?;

    let mut tmp_file = tempfile::Builder::new().tempfile_in(dir)?;
    tmp_file.as_file_mut().write_all(contents)?;
    let _ = tmp_file.persist(path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.org.signing")).unwrap();
        write_file(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn write_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("nested/example.org.signing")).unwrap();
        write_file(&path, b"").unwrap();
        assert!(path.exists());
    }
}
