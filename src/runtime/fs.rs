//! File system operations (read, write, streaming, directory checks).

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn read_to_string_impl(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_impl(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    #[tracing::instrument(skip(self, contents))]
    pub(crate) fn write_impl(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_file_impl(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_file_impl(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_dir_impl(&self, path: &Path) -> bool {
        path.is_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_file_impl(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_file_operations() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let file_path = dir.path().join("key.json");

        // write / read back
        runtime.write(&file_path, b"{}").unwrap();
        assert_eq!(runtime.read_to_string(&file_path).unwrap(), "{}");
        assert_eq!(runtime.read(&file_path).unwrap(), b"{}");

        assert!(runtime.is_file(&file_path));
        assert!(!runtime.is_dir(&file_path));
        assert!(runtime.is_dir(dir.path()));
        assert!(!runtime.is_file(&dir.path().join("missing")));
    }

    #[test]
    fn test_real_runtime_streams_and_removes_files() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let file_path = dir.path().join("download.bin");

        let mut file = runtime.create_file(&file_path).unwrap();
        file.write_all(b"first ").unwrap();
        file.write_all(b"chunk").unwrap();
        file.flush().unwrap();
        drop(file);
        assert_eq!(runtime.read(&file_path).unwrap(), b"first chunk");

        // truncates on re-create
        let mut file = runtime.create_file(&file_path).unwrap();
        file.write_all(b"x").unwrap();
        drop(file);
        assert_eq!(runtime.read(&file_path).unwrap(), b"x");

        runtime.remove_file(&file_path).unwrap();
        assert!(!runtime.is_file(&file_path));
        assert!(runtime.remove_file(&file_path).is_err());
    }

    #[test]
    fn test_real_runtime_read_missing_file() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        assert!(runtime.read_to_string(&dir.path().join("nope")).is_err());
    }
}
