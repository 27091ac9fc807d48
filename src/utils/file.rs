//! Plain-text file helpers.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Read a whole file into a string.
pub fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

/// Overwrite a file with `contents`, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)
}

/// Append `contents` to a file, creating it if it does not exist.
pub fn append_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log");

        assert!(!file_exists(&path));
        append_file(&path, "1\n").unwrap();
        append_file(&path, "2\n").unwrap();
        assert_eq!(read_file(&path).unwrap(), "1\n2\n");

        write_file(&path, "7").unwrap();
        assert_eq!(read_file(&path).unwrap(), "7");
        assert!(file_exists(&path));
    }
}
