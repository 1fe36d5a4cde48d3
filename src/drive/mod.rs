//! Google Drive: service handle, file operations and folder helpers.

mod client;
mod file;
mod operations;

pub use client::{DRIVE_API_BASE, DRIVE_SCOPES, DriveConnector, DriveService};
pub use file::{File, Folder};
pub use operations::{DriveFile, FOLDER_MIME_TYPE, Role, SPREADSHEET_MIME_TYPE};
