// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result archive creation and cleanup.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::UploadError;

const COPY_BUFFER: usize = 64 * 1024;

fn archive_error(err: zip::result::ZipError) -> UploadError {
    UploadError::Archive(err.to_string())
}

/// Zip `dir` into `target`, splitting into parts of at most `split_size` bytes.
///
/// Entries are stored under the directory's own name. Without splitting, or
/// when the archive fits, the result is the single file `target`. Otherwise
/// the parts are `target.z01`, `target.z02`, ... followed by `target` holding
/// the final bytes; concatenating them in order restores the archive.
pub fn compress_and_split(
    dir: &Path,
    target: &Path,
    split_size: Option<u64>,
) -> Result<Vec<PathBuf>, UploadError> {
    let root = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::Archive(format!("Not a directory: {}", dir.display())))?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(target)?));

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| UploadError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| UploadError::Archive(e.to_string()))?;
        let mut name = PathBuf::from(&root);
        name.push(relative);
        let name = name.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(archive_error)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(archive_error)?;
            let mut file = File::open(entry.path())?;
            std::io::copy(&mut file, &mut zip)?;
        }
    }

    let mut writer = zip.finish().map_err(archive_error)?;
    writer.flush()?;
    drop(writer);

    match split_size {
        Some(limit) if limit > 0 && std::fs::metadata(target)?.len() > limit => {
            split(target, limit)
        }
        _ => Ok(vec![target.to_path_buf()]),
    }
}

fn part_path(target: &Path, index: usize) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(format!(".z{:02}", index));
    PathBuf::from(name)
}

fn split(target: &Path, limit: u64) -> Result<Vec<PathBuf>, UploadError> {
    let size = std::fs::metadata(target)?.len();
    let mut source = File::open(target)?;
    let mut parts = Vec::new();
    let mut remaining = size;
    let mut buffer = vec![0u8; COPY_BUFFER];

    // Every part but the last goes to a numbered file.
    while remaining > limit {
        let path = part_path(target, parts.len() + 1);
        let mut out = BufWriter::new(File::create(&path)?);
        let mut left = limit;
        while left > 0 {
            let want = left.min(buffer.len() as u64) as usize;
            source.read_exact(&mut buffer[..want])?;
            out.write_all(&buffer[..want])?;
            left -= want as u64;
        }
        out.flush()?;
        remaining -= limit;
        parts.push(path);
    }

    let mut tail = Vec::with_capacity(remaining as usize);
    source.read_to_end(&mut tail)?;
    drop(source);
    std::fs::write(target, &tail)?;
    parts.push(target.to_path_buf());

    debug!(target = %target.display(), parts = parts.len(), "Archive split");
    Ok(parts)
}

/// Owns a temporary archive path and deletes it, with all its parts, on drop.
#[derive(Debug)]
pub struct ArchiveGuard {
    target: PathBuf,
}

impl ArchiveGuard {
    /// Take ownership of `target` and any `target.zNN` parts.
    pub fn new(target: PathBuf) -> Self {
        Self { target }
    }

    /// The archive path.
    pub fn path(&self) -> &Path {
        &self.target
    }

    fn owned_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let (Some(parent), Some(name)) = (self.target.parent(), self.target.file_name()) else {
            return files;
        };
        let name = name.to_string_lossy();
        let Ok(entries) = std::fs::read_dir(parent) else {
            return files;
        };
        for entry in entries.flatten() {
            let entry_name = entry.file_name();
            let entry_name = entry_name.to_string_lossy();
            if entry_name == name
                || entry_name
                    .strip_prefix(name.as_ref())
                    .is_some_and(|rest| rest.starts_with(".z"))
            {
                files.push(entry.path());
            }
        }
        files
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        for path in self.owned_files() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed temporary archive"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove temporary archive")
                }
            }
        }
    }
}
