//! File and directory operations relative to a sandbox root.
//!
//! Every path passes through the confiner first. Content crosses the
//! boundary as text: either utf-8 or base64-encoded binary.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use super::paths;
use super::{DirectoryEntry, Encoding, EntryType, FileContent, ListDirectoryResult};
use crate::error::SandboxError;

/// Writes file content under the sandbox root and returns the freshly
/// read-back description, for consistency with [`read_file`].
///
/// With `create_directories` missing parents are created; otherwise a
/// missing parent fails with `NotFound`.
pub async fn write_file(
    root: &Path,
    path: &str,
    content: &str,
    encoding: Encoding,
    create_directories: bool,
) -> Result<FileContent, SandboxError> {
    let target = paths::resolve(root, path)?;
    let relative = paths::display_relative(path)?;

    let bytes = match encoding {
        Encoding::Utf8 => content.as_bytes().to_vec(),
        Encoding::Base64 => BASE64
            .decode(content)
            .map_err(|e| SandboxError::storage(format!("invalid base64 content: {e}")))?,
    };

    if let Some(parent) = target.parent() {
        if create_directories {
            fs::create_dir_all(parent).await?;
        } else if !fs::try_exists(parent).await? {
            return Err(SandboxError::not_found(format!(
                "parent directory of {relative}"
            )));
        }
    }

    fs::write(&target, &bytes).await?;
    debug!("Wrote {} bytes to {relative}", bytes.len());

    read_file(root, &relative, encoding).await
}

/// Reads file content under the sandbox root in the requested encoding.
pub async fn read_file(
    root: &Path,
    path: &str,
    encoding: Encoding,
) -> Result<FileContent, SandboxError> {
    let target = paths::resolve(root, path)?;
    let relative = paths::display_relative(path)?;

    let metadata = match fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SandboxError::not_found(relative));
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        return Err(SandboxError::not_a_file(relative));
    }

    let bytes = fs::read(&target).await?;
    let content = match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
        Encoding::Base64 => BASE64.encode(&bytes),
    };

    Ok(FileContent {
        path: relative,
        encoding,
        content,
        size_bytes: metadata.len(),
        modified_at: modified_time(&metadata),
    })
}

/// Removes a file, or a directory and everything beneath it.
/// Deleting a nonexistent path is not an error.
pub async fn delete_path(root: &Path, path: &str) -> Result<(), SandboxError> {
    let target = paths::resolve(root, path)?;

    let metadata = match fs::symlink_metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(&target).await?;
    } else {
        fs::remove_file(&target).await?;
    }

    Ok(())
}

/// Creates a directory (and missing parents) under the sandbox root.
/// Idempotent; an existing non-directory at the path is `NotADirectory`.
pub async fn make_directory(root: &Path, path: &str) -> Result<(), SandboxError> {
    let target = paths::resolve(root, path)?;
    let relative = paths::display_relative(path)?;

    if let Ok(metadata) = fs::metadata(&target).await {
        if !metadata.is_dir() {
            return Err(SandboxError::not_a_directory(relative));
        }
    }

    fs::create_dir_all(&target).await?;
    Ok(())
}

/// Lists the children of a directory under the sandbox root.
///
/// Non-recursive by default; `recursive` walks the whole tree applying
/// the same entry-mapping rule. Entry order is whatever the filesystem
/// returns.
pub async fn list_directory(
    root: &Path,
    path: &str,
    recursive: bool,
) -> Result<ListDirectoryResult, SandboxError> {
    let target = paths::resolve(root, path)?;
    let relative = paths::display_relative(path)?;

    let metadata = match fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SandboxError::not_found(relative));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_dir() {
        return Err(SandboxError::not_a_directory(relative));
    }

    let mut entries = Vec::new();
    // Iterative walk; one level deep unless recursive.
    let mut pending = vec![(target, relative.clone())];
    while let Some((dir, prefix)) = pending.pop() {
        let mut reader = fs::read_dir(&dir).await?;
        while let Some(dir_entry) = reader.next_entry().await? {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let entry_path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = dir_entry.file_type().await?;
            let entry_type = if file_type.is_symlink() {
                EntryType::Symlink
            } else if file_type.is_dir() {
                EntryType::Directory
            } else {
                EntryType::File
            };

            let entry_metadata = dir_entry.metadata().await?;
            entries.push(DirectoryEntry {
                name,
                path: entry_path.clone(),
                entry_type,
                size_bytes: match entry_type {
                    EntryType::File => Some(entry_metadata.len()),
                    _ => None,
                },
                modified_at: modified_time(&entry_metadata),
            });

            if recursive && entry_type == EntryType::Directory {
                pending.push((dir_entry.path(), entry_path));
            }
        }
    }

    Ok(ListDirectoryResult {
        path: relative,
        entries,
    })
}

fn modified_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
