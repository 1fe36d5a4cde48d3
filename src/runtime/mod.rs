//! Runtime abstraction for system operations.
//!
//! Everything the library does outside of HTTP (reading key files, writing
//! downloads, checking configured directories, sleeping between retries)
//! goes through [`Runtime`] so it can be mocked in tests.
//!
//! # Structure
//!
//! - `env` - Environment variables
//! - `fs` - File system operations (read, write, streaming, directory checks)
//! - `clock` - Blocking sleeps

mod clock;
mod env;
mod fs;

use std::env as std_env;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;

    // File System
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    /// Create or truncate `path` for streamed writes.
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;

    // Clock
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.read_to_string_impl(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.read_impl(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.write_impl(path, contents)
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        self.create_file_impl(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.remove_file_impl(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.is_dir_impl(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.is_file_impl(path)
    }

    fn sleep(&self, duration: Duration) {
        self.sleep_impl(duration)
    }
}
