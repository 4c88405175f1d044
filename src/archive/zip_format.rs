//! Zip container for the legacy flat layout
//!
//! Objects under the legacy layout are zip files with one entry per file,
//! directory and symlink, named by `/`-separated relative path. The same
//! pruning, duplicate and no-overwrite rules as tar apply.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{
    check_no_symlink_ancestors, check_symlink_in_archive, read_error, sanitize_entry_path,
    ArchiveError, EntryKind, PackPlan, UnpackSummary,
};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Write `plan` as a zip archive into `writer`.
pub(super) fn write_zip<W: Write + Seek>(plan: &PackPlan, writer: W) -> Result<(), ArchiveError> {
    let mut zip = ZipWriter::new(writer);

    for entry in &plan.entries {
        let name = zip_name(&entry.rel_path)?;
        match &entry.kind {
            EntryKind::Directory => {
                zip.add_directory(name, entry_options(0o755))
                    .map_err(zip_error)?;
            }
            EntryKind::File { mode, .. } => {
                zip.start_file(name, entry_options(*mode)).map_err(zip_error)?;
                io::copy(&mut BufReader::new(File::open(&entry.path)?), &mut zip)?;
            }
            EntryKind::Symlink { target } => {
                let target = zip_name(target)?;
                zip.add_symlink(name, target, entry_options(0o777))
                    .map_err(zip_error)?;
            }
        }
    }

    let mut inner = zip.finish().map_err(zip_error)?;
    inner.flush()?;
    Ok(())
}

/// Unpack a zip archive into `dest_dir`, never overwriting existing files.
pub(super) fn unpack_zip<R: Read + Seek>(
    reader: R,
    dest_dir: &Path,
) -> Result<UnpackSummary, ArchiveError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = ZipArchive::new(reader).map_err(zip_error)?;
    let mut summary = UnpackSummary::default();

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(zip_error)?;
        let raw_name = PathBuf::from(file.name());
        if file.enclosed_name().is_none() {
            return Err(ArchiveError::UnsafeEntry { name: raw_name });
        }
        let rel_path = sanitize_entry_path(&raw_name)?;
        if rel_path.as_os_str().is_empty() {
            continue;
        }

        check_no_symlink_ancestors(dest_dir, &rel_path)?;
        let dest = dest_dir.join(&rel_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if file.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if fs::symlink_metadata(&dest).is_ok() {
            summary.skipped_existing += 1;
            continue;
        }

        let mode = file.unix_mode().unwrap_or(0o644);
        if mode & S_IFMT == S_IFLNK {
            let mut target = String::new();
            file.read_to_string(&mut target).map_err(read_error)?;
            let target = PathBuf::from(target);
            check_symlink_in_archive(&rel_path, &target)?;
            if !create_symlink(&target, &dest)? {
                debug!(name = %raw_name.display(), "symlinks unsupported here, entry skipped");
                continue;
            }
        } else {
            let mut out = OpenOptions::new().write(true).create_new(true).open(&dest)?;
            io::copy(&mut file, &mut out).map_err(read_error)?;
            set_executable(&dest, mode)?;
        }
        summary.extracted += 1;
    }

    Ok(summary)
}

/// Fixed timestamp and normalized permissions keep the bytes reproducible.
fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(mode)
}

/// `/`-joined entry name; zip names must be UTF-8.
fn zip_name(path: &Path) -> Result<String, ArchiveError> {
    let parts = path
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ArchiveError::NonUtf8Name {
            path: path.to_path_buf(),
        })?;
    Ok(parts.join("/"))
}

fn zip_error(err: ZipError) -> ArchiveError {
    match err {
        ZipError::Io(e) => read_error(e),
        other => ArchiveError::Format(other.to_string()),
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<bool> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(true)
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, _link: &Path) -> io::Result<bool> {
    Ok(false)
}

#[cfg(unix)]
fn set_executable(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode & 0o111 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
