use std::path::{Path, PathBuf};

use tracing::info;

use super::client::DriveService;
use super::operations::{DriveFile, FOLDER_MIME_TYPE, Role};
use crate::error::Result;
use crate::runtime::Runtime;

/// A Drive file known by ID.
///
/// `name` is a local label and may differ from the name on the drive.
pub struct File<'a, R: Runtime> {
    pub name: String,
    pub id: String,
    service: &'a DriveService<R>,
}

impl<'a, R: Runtime> File<'a, R> {
    /// Binds a file to a service, which may be a delegated one.
    pub fn new(name: impl Into<String>, id: impl Into<String>, service: &'a DriveService<R>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            service,
        }
    }

    pub fn service(&self) -> &'a DriveService<R> {
        self.service
    }

    pub fn share(&self, user: &str, role: Role, notify: bool) -> Result<&Self> {
        self.service.share_file(&self.id, user, role, notify)?;
        Ok(self)
    }

    pub fn transfer_ownership(&self, user: &str) -> Result<&Self> {
        self.service.transfer_ownership(&self.id, user)?;
        Ok(self)
    }

    pub fn delete(self) -> Result<()> {
        self.service.delete_file(&self.id)
    }
}

/// A Drive folder; every file operation is scoped to its direct children.
pub struct Folder<'a, R: Runtime> {
    file: File<'a, R>,
}

impl<'a, R: Runtime> std::ops::Deref for Folder<'a, R> {
    type Target = File<'a, R>;

    fn deref(&self) -> &Self::Target {
        &self.file
    }
}

impl<'a, R: Runtime> Folder<'a, R> {
    pub fn new(name: impl Into<String>, id: impl Into<String>, service: &'a DriveService<R>) -> Self {
        Self {
            file: File::new(name, id, service),
        }
    }

    fn logger(&self) -> String {
        self.service.handle().logger()
    }

    /// First file named `name` in this folder. When several match, which one
    /// is returned is up to Drive.
    pub fn find_file(&self, name: &str) -> Result<Option<DriveFile>> {
        info!(
            logger = %self.logger(),
            "Searching for file {} in {} ({})...",
            name,
            self.name,
            self.id
        );
        Ok(self.service.find_files(name, &self.id)?.into_iter().next())
    }

    pub fn list(&self) -> Result<Vec<DriveFile>> {
        info!(logger = %self.logger(), "Retrieving files in {} ({})...", self.name, self.id);
        self.service.list_files(&self.id)
    }

    /// Downloads the file named `name`. Returns `None` when no such file
    /// exists in this folder.
    pub fn download_file(&self, name: &str, destination: &Path) -> Result<Option<PathBuf>> {
        let Some(file) = self.find_file(name)? else {
            return Ok(None);
        };
        info!(
            logger = %self.logger(),
            "Downloading file {} from {} ({})...",
            name,
            self.name,
            self.id
        );
        self.service.download_file(&file.id, destination).map(Some)
    }

    /// Uploads a local file and returns its Drive ID.
    ///
    /// With `update`, a file of the same name already in the folder gets a new
    /// revision instead of a sibling copy.
    pub fn upload_file(&self, path: &Path, mime_type: &str, update: bool) -> Result<String> {
        if update {
            if let Some(name) = path.file_name() {
                if let Some(existing) = self.find_file(&name.to_string_lossy())? {
                    info!(
                        logger = %self.logger(),
                        "Uploading file {} as new revision into {} ({})...",
                        path.display(),
                        self.name,
                        self.id
                    );
                    return self.service.update_file(path, &existing.id, mime_type);
                }
            }
        }
        info!(
            logger = %self.logger(),
            "Uploading file {} as new file into {} ({})...",
            path.display(),
            self.name,
            self.id
        );
        self.service.upload_file(path, &self.id, mime_type)
    }

    /// Creates an empty file, e.g. a spreadsheet, even if the name is taken.
    pub fn insert_file(&self, name: &str, mime_type: &str) -> Result<File<'a, R>> {
        let id = self.service.insert_file(name, &self.id, mime_type)?;
        Ok(File::new(name, id, self.service))
    }

    pub fn create_folder(&self, name: &str) -> Result<Folder<'a, R>> {
        let id = self.service.insert_file(name, &self.id, FOLDER_MIME_TYPE)?;
        Ok(Folder::new(name, id, self.service))
    }

    /// Returns `destination` if it already exists locally, downloading the
    /// file named `name` first otherwise.
    pub fn has_file(&self, name: &str, destination: &Path) -> Result<Option<PathBuf>> {
        if self.service.handle().runtime().is_file(destination) {
            return Ok(Some(destination.to_path_buf()));
        }
        self.download_file(name, destination)
    }
}
