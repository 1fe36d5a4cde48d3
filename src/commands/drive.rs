use anyhow::{Context, Result};
use log::debug;
use std::path::Path;

use super::Config;
use crate::{
    drive::{DriveService, Folder, Role},
    runtime::Runtime,
};

fn service<R: Runtime>(config: Config<R>, user: Option<&str>) -> DriveService<R> {
    let root = DriveService::new(config.runtime, config.tokens);
    root.configure(config.service);
    match user {
        Some(user) => {
            debug!("Acting on behalf of {}", user);
            root.for_user(user)
        }
        None => root,
    }
}

/// Print the files of a folder, one `id<TAB>name` line each
#[tracing::instrument(skip(config))]
pub fn list<R: Runtime>(config: Config<R>, folder_id: &str, user: Option<&str>) -> Result<()> {
    let drive = service(config, user);
    let files = drive
        .list_files(folder_id)
        .with_context(|| format!("Failed to list folder {}", folder_id))?;

    if files.is_empty() {
        println!("No files in {}.", folder_id);
        return Ok(());
    }
    for file in files {
        println!("{}\t{}", file.id, file.name.unwrap_or_default());
    }
    Ok(())
}

/// Upload a local file into a folder and print its ID
#[tracing::instrument(skip(config))]
pub fn upload<R: Runtime>(
    config: Config<R>,
    folder_id: &str,
    path: &Path,
    mime_type: &str,
    update: bool,
    user: Option<&str>,
) -> Result<()> {
    let drive = service(config, user);
    let folder = Folder::new(folder_id, folder_id, &drive);
    let id = folder
        .upload_file(path, mime_type, update)
        .with_context(|| format!("Failed to upload {}", path.display()))?;
    println!("{}", id);
    Ok(())
}

/// Download a file's content to a local path
#[tracing::instrument(skip(config))]
pub fn download<R: Runtime>(
    config: Config<R>,
    file_id: &str,
    destination: &Path,
    user: Option<&str>,
) -> Result<()> {
    let drive = service(config, user);
    let path = drive
        .download_file(file_id, destination)
        .with_context(|| format!("Failed to download {}", file_id))?;
    println!("{}", path.display());
    Ok(())
}

/// Grant a role on a file to another user
#[tracing::instrument(skip(config))]
pub fn share<R: Runtime>(
    config: Config<R>,
    file_id: &str,
    email: &str,
    role: Role,
    notify: bool,
    user: Option<&str>,
) -> Result<()> {
    let drive = service(config, user);
    let shared = if role == Role::Owner {
        drive.transfer_ownership(file_id, email)
    } else {
        drive.share_file(file_id, email, role, notify)
    };
    shared.with_context(|| format!("Failed to share {} with {}", file_id, email))?;
    println!("Shared {} with {} as {}.", file_id, email, role);
    Ok(())
}

#[tracing::instrument(skip(config))]
pub fn delete<R: Runtime>(config: Config<R>, file_id: &str, user: Option<&str>) -> Result<()> {
    let drive = service(config, user);
    drive
        .delete_file(file_id)
        .with_context(|| format!("Failed to delete {}", file_id))?;
    println!("Deleted {}.", file_id);
    Ok(())
}
