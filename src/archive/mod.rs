//! Artifact archiving
//!
//! Packs one or more directory trees into a single canonical archive for
//! transport to the remote tier, and unpacks it back. Two container formats
//! are supported: tar for the nested key layout and zip for objects shared
//! with the flat legacy layout.
//!
//! Packing rules:
//! - hidden entries (base name starting with `.`) are pruned with their subtree
//! - entries are named by their path relative to the source root
//! - entries are written in sorted order with timestamps and ownership zeroed
//!   and modes normalized (0644, 0755 for executables and directories), so
//!   the same tree always produces the same bytes
//! - when several sources are packed, a relative path already added by an
//!   earlier source is skipped, not an error
//! - symlinks are preserved; absolute targets or targets leaving the root
//!   are rejected
//!
//! Unpacking rules:
//! - intermediate directories are created as needed
//! - an entry is extracted only if nothing exists at its destination yet;
//!   existing files are never overwritten
//! - absolute or `..` entry names, escaping symlinks and entries that would
//!   be written through a symlink already under the destination are rejected

mod exclude;
mod zip_format;

pub use exclude::{is_hidden, ExcludeError, ExcludeRules};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Errors for archive operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Corrupt archive: {0}")]
    Format(String),

    #[error("Unsafe archive entry: {name}")]
    UnsafeEntry { name: PathBuf },

    #[error("Symlink escapes archive root: {path}")]
    SymlinkEscapesRoot { path: PathBuf },

    #[error("Entry name is not valid UTF-8: {path}")]
    NonUtf8Name { path: PathBuf },

    #[error("Exclude rules error: {0}")]
    Exclude(#[from] ExcludeError),
}

/// Container format of an archive file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Tar,
    Zip,
}

impl ArchiveFormat {
    /// Scratch file name used when moving an archive through an object store.
    pub fn file_name(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "framework.tar",
            ArchiveFormat::Zip => "framework.zip",
        }
    }

    /// `.zip` files are zip, anything else is tar.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => ArchiveFormat::Zip,
            _ => ArchiveFormat::Tar,
        }
    }
}

/// Result of packing a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    /// Entries written (files, directories, symlinks)
    pub entries: usize,
    /// Entries skipped because the name was already in the archive
    pub skipped_duplicates: usize,
    /// Archive size in bytes
    pub bytes: u64,
    /// SHA-256 of the archive bytes
    pub sha256: String,
}

/// Result of unpacking an archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Files and symlinks extracted
    pub extracted: usize,
    /// Files and symlinks left alone because the destination already existed
    pub skipped_existing: usize,
}

/// Packs and unpacks artifact directories.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    exclude: ExcludeRules,
    format: ArchiveFormat,
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exclude(mut self, exclude: ExcludeRules) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_format(mut self, format: ArchiveFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Pack `source_dir` into a new archive file at `archive_path`.
    pub fn pack(&self, source_dir: &Path, archive_path: &Path) -> Result<PackSummary, ArchiveError> {
        self.pack_all(&[source_dir], archive_path)
    }

    /// Pack several source directories into one archive file.
    ///
    /// Sources are walked in order; a relative path that an earlier source
    /// already contributed is skipped and counted in
    /// [`PackSummary::skipped_duplicates`].
    pub fn pack_all(
        &self,
        sources: &[&Path],
        archive_path: &Path,
    ) -> Result<PackSummary, ArchiveError> {
        let file = File::create(archive_path)?;
        let summary = match self.format {
            ArchiveFormat::Tar => self.pack_all_to_writer(sources, BufWriter::new(file))?,
            ArchiveFormat::Zip => {
                let plan = self.plan(sources)?;
                zip_format::write_zip(&plan, BufWriter::new(file))?;
                let (bytes, sha256) = digest_file(archive_path)?;
                PackSummary {
                    entries: plan.entries.len(),
                    skipped_duplicates: plan.skipped_duplicates,
                    bytes,
                    sha256,
                }
            }
        };
        debug!(
            sources = sources.len(),
            archive = %archive_path.display(),
            entries = summary.entries,
            skipped_duplicates = summary.skipped_duplicates,
            bytes = summary.bytes,
            "packed archive"
        );
        Ok(summary)
    }

    /// Pack `source_dir` as a tar stream into `writer`.
    pub fn pack_to_writer<W: Write>(
        &self,
        source_dir: &Path,
        writer: W,
    ) -> Result<PackSummary, ArchiveError> {
        self.pack_all_to_writer(&[source_dir], writer)
    }

    /// Pack several source directories as one tar stream into `writer`.
    pub fn pack_all_to_writer<W: Write>(
        &self,
        sources: &[&Path],
        writer: W,
    ) -> Result<PackSummary, ArchiveError> {
        let plan = self.plan(sources)?;

        let mut builder = Builder::new(DigestWriter::new(writer));
        builder.follow_symlinks(false);

        for entry in &plan.entries {
            match &entry.kind {
                EntryKind::Symlink { target } => {
                    let mut header = canonical_header(EntryType::Symlink, 0o777, 0);
                    builder.append_link(&mut header, &entry.rel_path, target)?;
                }
                EntryKind::Directory => {
                    let mut header = canonical_header(EntryType::Directory, 0o755, 0);
                    builder.append_data(&mut header, &entry.rel_path, io::empty())?;
                }
                EntryKind::File { mode, len } => {
                    let mut header = canonical_header(EntryType::Regular, *mode, *len);
                    let data = BufReader::new(File::open(&entry.path)?);
                    builder.append_data(&mut header, &entry.rel_path, data)?;
                }
            }
        }

        let mut digest_writer = builder.into_inner()?;
        digest_writer.flush()?;
        let (bytes, sha256) = digest_writer.finish();

        Ok(PackSummary {
            entries: plan.entries.len(),
            skipped_duplicates: plan.skipped_duplicates,
            bytes,
            sha256,
        })
    }

    /// Walk `sources` and decide what goes into the archive.
    fn plan(&self, sources: &[&Path]) -> Result<PackPlan, ArchiveError> {
        // Relative path -> whether the entry already taken is a directory
        let mut seen: HashMap<PathBuf, bool> = HashMap::new();
        let mut plan = PackPlan::default();

        for source_dir in sources {
            let metadata = fs::metadata(source_dir)?;
            if !metadata.is_dir() {
                return Err(ArchiveError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a directory: {}", source_dir.display()),
                )));
            }
            let canonical_root = source_dir.canonicalize()?;

            let mut walker = WalkDir::new(source_dir)
                .follow_links(false)
                .sort_by(|a, b| a.file_name().cmp(b.file_name()))
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || e.path()
                            .strip_prefix(source_dir)
                            .map(|rel| !self.exclude.is_excluded(rel))
                            .unwrap_or(false)
                });

            while let Some(entry) = walker.next() {
                let entry = entry?;
                if entry.depth() == 0 {
                    continue;
                }
                let path = entry.path().to_path_buf();
                let rel_path = path
                    .strip_prefix(source_dir)
                    .map_err(|_| ArchiveError::UnsafeEntry { name: path.clone() })?
                    .to_path_buf();
                let file_type = entry.file_type();

                if let Some(&existing_is_dir) = seen.get(&rel_path) {
                    debug!(name = %rel_path.display(), "duplicate archive entry skipped");
                    plan.skipped_duplicates += 1;
                    // Two directories merge; anything else keeps the first
                    // entry and drops the later subtree.
                    if file_type.is_dir() && !existing_is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                seen.insert(rel_path.clone(), file_type.is_dir());

                let kind = if file_type.is_symlink() {
                    let target = fs::read_link(&path)?;
                    check_symlink_on_disk(&path, &rel_path, &target, &canonical_root)?;
                    EntryKind::Symlink { target }
                } else if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    let metadata = entry.metadata()?;
                    let mode = if is_executable(&metadata) { 0o755 } else { 0o644 };
                    EntryKind::File {
                        mode,
                        len: metadata.len(),
                    }
                };
                plan.entries.push(PlannedEntry {
                    path,
                    rel_path,
                    kind,
                });
            }
        }

        Ok(plan)
    }

    /// Unpack the archive at `archive_path` into `dest_dir`.
    ///
    /// With `remove_archive`, the archive file is deleted after a successful
    /// unpack.
    pub fn unpack(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        remove_archive: bool,
    ) -> Result<UnpackSummary, ArchiveError> {
        let file = BufReader::new(File::open(archive_path)?);
        let summary = match self.format {
            ArchiveFormat::Tar => self.unpack_from_reader(file, dest_dir)?,
            ArchiveFormat::Zip => zip_format::unpack_zip(file, dest_dir)?,
        };
        if remove_archive {
            fs::remove_file(archive_path)?;
        }
        debug!(
            archive = %archive_path.display(),
            dest = %dest_dir.display(),
            extracted = summary.extracted,
            skipped = summary.skipped_existing,
            "unpacked archive"
        );
        Ok(summary)
    }

    /// Unpack a tar stream into `dest_dir`, never overwriting existing files.
    pub fn unpack_from_reader<R: Read>(
        &self,
        reader: R,
        dest_dir: &Path,
    ) -> Result<UnpackSummary, ArchiveError> {
        fs::create_dir_all(dest_dir)?;

        let mut archive = tar::Archive::new(reader);
        // Extracted files get fresh mtimes; the archive stores them zeroed.
        archive.set_preserve_mtime(false);
        let mut summary = UnpackSummary::default();

        for entry in archive.entries().map_err(format_error)? {
            let mut entry = entry.map_err(format_error)?;
            let raw_name = entry.path().map_err(format_error)?.into_owned();
            let rel_path = sanitize_entry_path(&raw_name)?;
            if rel_path.as_os_str().is_empty() {
                continue;
            }

            check_no_symlink_ancestors(dest_dir, &rel_path)?;
            let dest = dest_dir.join(&rel_path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }

            if entry_type.is_symlink() {
                let target = entry
                    .link_name()
                    .map_err(format_error)?
                    .ok_or_else(|| {
                        ArchiveError::Format(format!("symlink without target: {}", raw_name.display()))
                    })?
                    .into_owned();
                check_symlink_in_archive(&rel_path, &target)?;
            } else if !entry_type.is_file() {
                debug!(name = %raw_name.display(), "skipping unsupported archive entry type");
                continue;
            }

            if fs::symlink_metadata(&dest).is_ok() {
                summary.skipped_existing += 1;
                continue;
            }

            if !entry.unpack_in(dest_dir).map_err(read_error)? {
                return Err(ArchiveError::UnsafeEntry { name: raw_name });
            }
            summary.extracted += 1;
        }

        Ok(summary)
    }
}

/// What gets written for one source path.
#[derive(Debug)]
enum EntryKind {
    Directory,
    File { mode: u32, len: u64 },
    Symlink { target: PathBuf },
}

#[derive(Debug)]
struct PlannedEntry {
    /// Location on disk
    path: PathBuf,
    /// Archive name, relative to the source root
    rel_path: PathBuf,
    kind: EntryKind,
}

#[derive(Debug, Default)]
struct PackPlan {
    entries: Vec<PlannedEntry>,
    skipped_duplicates: usize,
}

fn canonical_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header
}

/// Strip `.` components and reject anything that could leave the destination.
fn sanitize_entry_path(name: &Path) -> Result<PathBuf, ArchiveError> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafeEntry {
                    name: name.to_path_buf(),
                })
            }
        }
    }
    Ok(clean)
}

/// Reject `rel_path` if any existing directory between `dest_dir` and the
/// entry is a symlink. An earlier entry may have planted one pointing
/// anywhere, and writing through it would leave `dest_dir`.
fn check_no_symlink_ancestors(dest_dir: &Path, rel_path: &Path) -> Result<(), ArchiveError> {
    let Some(parent) = rel_path.parent() else {
        return Ok(());
    };
    let mut current = dest_dir.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(ArchiveError::UnsafeEntry {
                    name: rel_path.to_path_buf(),
                })
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Lexically resolve `target` relative to the directory holding `link`
/// (both relative to the archive root). `None` if it leaves the root.
fn resolve_within_root(link: &Path, target: &Path) -> Option<PathBuf> {
    if target.is_absolute() {
        return None;
    }
    let mut resolved: Vec<&std::ffi::OsStr> = link
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str()).collect())
        .unwrap_or_default();
    for component in target.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved.iter().collect())
}

fn check_symlink_in_archive(link: &Path, target: &Path) -> Result<(), ArchiveError> {
    match resolve_within_root(link, target) {
        Some(_) => Ok(()),
        None => Err(ArchiveError::UnsafeEntry {
            name: link.to_path_buf(),
        }),
    }
}

fn check_symlink_on_disk(
    path: &Path,
    rel_path: &Path,
    target: &Path,
    canonical_root: &Path,
) -> Result<(), ArchiveError> {
    let escapes = if target.is_absolute() {
        true
    } else {
        let resolved = path.parent().unwrap_or(path).join(target);
        // Dangling links can't be canonicalized; fall back to the lexical check.
        match resolved.canonicalize() {
            Ok(canonical) => !canonical.starts_with(canonical_root),
            Err(_) => resolve_within_root(rel_path, target).is_none(),
        }
    };

    if escapes {
        return Err(ArchiveError::SymlinkEscapesRoot {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn format_error(err: io::Error) -> ArchiveError {
    ArchiveError::Format(err.to_string())
}

/// Short or garbled entry data is a corrupt archive; anything else is local I/O.
fn read_error(err: io::Error) -> ArchiveError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => format_error(err),
        _ => ArchiveError::Io(err),
    }
}

fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut writer = DigestWriter::new(io::sink());
    io::copy(&mut BufReader::new(File::open(path)?), &mut writer)?;
    Ok(writer.finish())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Writer adapter that counts and hashes everything written through it.
struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        (self.bytes, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
