//! Drive file operations. Each remote call runs through the retry executor
//! and resets the handle before retrying.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::client::DriveService;
use crate::error::{GapiError, Result};
use crate::runtime::Runtime;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

const FILES: &str = "drive/v3/files";
const UPLOADS: &str = "upload/drive/v3/files";

/// File metadata as returned by Drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Permission role granted when sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Commenter,
    Writer,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Commenter => "commenter",
            Role::Writer => "writer",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Role::Reader),
            "commenter" => Ok(Role::Commenter),
            "writer" => Ok(Role::Writer),
            "owner" => Ok(Role::Owner),
            other => Err(format!(
                "invalid role '{}', expected reader, commenter, writer or owner",
                other
            )),
        }
    }
}

/// Quotes a value for a Drive `q` expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| GapiError::Unexpected(format!("{} has no file name", path.display())))
}

impl<R: Runtime> DriveService<R> {
    /// Uploads a local file into `folder_id` and returns the new file's ID.
    ///
    /// A new file is created even if one with the same name already exists.
    #[tracing::instrument(skip(self))]
    pub fn upload_file(&self, path: &Path, folder_id: &str, mime_type: &str) -> Result<String> {
        let media = self.handle.runtime().read(path)?;
        let metadata = json!({
            "name": file_name(path)?,
            "parents": [folder_id],
        });
        let created: Created = self.handle.call(|client| {
            client.upload_multipart(
                Method::POST,
                UPLOADS,
                &[("uploadType", "multipart"), ("fields", "id")],
                &metadata,
                &media,
                mime_type,
            )
        })?;
        Ok(created.id)
    }

    /// Uploads a local file as a new revision of `file_id`.
    #[tracing::instrument(skip(self))]
    pub fn update_file(&self, path: &Path, file_id: &str, mime_type: &str) -> Result<String> {
        let media = self.handle.runtime().read(path)?;
        let updated: Created = self.handle.call(|client| {
            client.upload_multipart(
                Method::PATCH,
                &format!("{}/{}", UPLOADS, file_id),
                &[("uploadType", "multipart"), ("fields", "id")],
                &json!({}),
                &media,
                mime_type,
            )
        })?;
        Ok(updated.id)
    }

    /// Creates an empty file (or folder, or Google Workspace document) in
    /// `folder_id` and returns its ID.
    #[tracing::instrument(skip(self))]
    pub fn insert_file(&self, name: &str, folder_id: &str, mime_type: &str) -> Result<String> {
        let metadata = json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [folder_id],
        });
        let created: Created = self.handle.call(|client| {
            client.send_json(Method::POST, FILES, &[("fields", "id")], &metadata)
        })?;
        Ok(created.id)
    }

    /// Streams the content of `file_id` into `destination`. A retried
    /// attempt starts the file over.
    #[tracing::instrument(skip(self))]
    pub fn download_file(&self, file_id: &str, destination: &Path) -> Result<PathBuf> {
        let runtime = self.handle.runtime();
        let path = format!("{}/{}", FILES, file_id);
        self.handle.call(|client| {
            let mut file = runtime.create_file(destination)?;
            client.download(&path, &[("alt", "media")], &mut *file)?;
            file.flush()?;
            Ok(())
        })?;
        Ok(destination.to_path_buf())
    }

    /// Grants `role` on `file_id` to `user`.
    #[tracing::instrument(skip(self))]
    pub fn share_file(&self, file_id: &str, user: &str, role: Role, notify: bool) -> Result<()> {
        let body = json!({
            "role": role.as_str(),
            "type": "user",
            "emailAddress": user,
        });
        let notify = notify.to_string();
        self.handle.call(|client| {
            client.send_json::<_, serde_json::Value>(
                Method::POST,
                &format!("{}/{}/permissions", FILES, file_id),
                &[("sendNotificationEmail", notify.as_str())],
                &body,
            )
        })?;
        Ok(())
    }

    /// Makes `user` the owner of `file_id`.
    #[tracing::instrument(skip(self))]
    pub fn transfer_ownership(&self, file_id: &str, user: &str) -> Result<()> {
        let body = json!({
            "role": Role::Owner.as_str(),
            "type": "user",
            "emailAddress": user,
        });
        self.handle.call(|client| {
            client.send_json::<_, serde_json::Value>(
                Method::POST,
                &format!("{}/{}/permissions", FILES, file_id),
                &[("transferOwnership", "true")],
                &body,
            )
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        self.handle.call(|client| {
            client.send_empty(Method::DELETE, &format!("{}/{}", FILES, file_id), &[])
        })
    }

    /// Copies `file_id` under a new name, optionally into another folder.
    #[tracing::instrument(skip(self))]
    pub fn copy_file(&self, file_id: &str, name: &str, folder_id: Option<&str>) -> Result<DriveFile> {
        let mut body = json!({ "name": name });
        if let Some(folder_id) = folder_id {
            body["parents"] = json!([folder_id]);
        }
        self.handle.call(|client| {
            client.send_json(
                Method::POST,
                &format!("{}/{}/copy", FILES, file_id),
                &[("fields", "id,name,mimeType")],
                &body,
            )
        })
    }

    /// Files named `name` directly inside `parent_id`.
    #[tracing::instrument(skip(self))]
    pub fn find_files(&self, name: &str, parent_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("name = {} and {} in parents", quote(name), quote(parent_id));
        let list: FileList = self.handle.call(|client| {
            client.get_json(
                FILES,
                &[("q", query.as_str()), ("fields", "files(id,name,mimeType)")],
            )
        })?;
        Ok(list.files)
    }

    /// Every file directly inside `parent_id`, following pagination.
    #[tracing::instrument(skip(self))]
    pub fn list_files(&self, parent_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("{} in parents", quote(parent_id));
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: FileList = self.handle.call(|client| {
                let mut params = vec![
                    ("q", query.as_str()),
                    ("fields", "nextPageToken,files(id,name,mimeType)"),
                ];
                if let Some(token) = page_token.as_deref() {
                    params.push(("pageToken", token));
                }
                client.get_json(FILES, &params)
            })?;

            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(logger = %self.handle.logger(), "Found {} files in {}", files.len(), parent_id);
        Ok(files)
    }
}
