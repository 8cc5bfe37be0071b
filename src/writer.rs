//! Atomic, idempotent writes under a node home.
//!
//! Every file is replaced through a temp file in the same directory followed
//! by a rename, so a reader observes either the old or the new bytes. Config
//! files are patched line by line: the first uncommented `key = ...` line is
//! rewritten in place and every other line is preserved.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::{WriteError, WriteResult};
use crate::patch::{CanonicalKey, ConfigFile, ConfigPatch, PatchEntry};

pub const CONFIG_DIR: &str = "config";
pub const GENESIS_FILE: &str = "genesis.json";
pub const ADDRBOOK_FILE: &str = "addrbook.json";
pub const SIDECAR_FILE: &str = "monoctl.patch";

pub fn config_dir(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR)
}

pub fn genesis_path(home: &Path) -> PathBuf {
    config_dir(home).join(GENESIS_FILE)
}

pub fn addrbook_path(home: &Path) -> PathBuf {
    config_dir(home).join(ADDRBOOK_FILE)
}

pub fn sidecar_path(home: &Path) -> PathBuf {
    config_dir(home).join(SIDECAR_FILE)
}

pub fn config_file_path(home: &Path, file: ConfigFile) -> PathBuf {
    config_dir(home).join(file.file_name())
}

/// Reject relative homes and homes that climb out through `..`.
pub fn check_home(home: &Path) -> WriteResult<()> {
    let escapes = home
        .components()
        .any(|component| matches!(component, Component::ParentDir));
    if !home.is_absolute() || escapes {
        return Err(WriteError::PathTraversal {
            path: home.to_path_buf(),
        });
    }
    Ok(())
}

/// Write `<home>/config/genesis.json`. In dry-run mode only the path is returned.
pub fn write_genesis(home: &Path, bytes: &[u8], dry_run: bool) -> WriteResult<PathBuf> {
    check_home(home)?;
    let path = genesis_path(home);
    if dry_run {
        info!(target: "monoctl::writer", path = %path.display(), bytes = bytes.len(), "dry run: would write genesis");
        return Ok(path);
    }
    let changed = atomic_write(&path, bytes)?;
    info!(target: "monoctl::writer", path = %path.display(), changed, "genesis written");
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchWrite {
    pub sidecar: PathBuf,
    pub rendered: String,
    pub files: Vec<PathBuf>,
}

/// Apply every entry of `patch` to its target file and record the patch in the sidecar.
pub fn write_patch(home: &Path, patch: &ConfigPatch, dry_run: bool) -> WriteResult<PatchWrite> {
    check_home(home)?;
    let files = apply_entries(home, patch.entries(), dry_run)?;
    let sidecar = sidecar_path(home);
    let rendered = patch.render();
    if dry_run {
        info!(target: "monoctl::writer", path = %sidecar.display(), "dry run: would record patch");
    } else {
        write_sidecar(home, patch)?;
    }
    Ok(PatchWrite {
        sidecar,
        rendered,
        files,
    })
}

/// Record `patch` in `<home>/config/monoctl.patch`.
pub fn write_sidecar(home: &Path, patch: &ConfigPatch) -> WriteResult<PathBuf> {
    check_home(home)?;
    let path = sidecar_path(home);
    let changed = atomic_write(&path, patch.render().as_bytes())?;
    debug!(target: "monoctl::writer", path = %path.display(), changed, "patch recorded");
    Ok(path)
}

/// Rewrite the given entries in place. Returns the target files, in write order.
pub fn apply_entries(
    home: &Path,
    entries: &[PatchEntry],
    dry_run: bool,
) -> WriteResult<Vec<PathBuf>> {
    check_home(home)?;
    let mut touched = Vec::new();
    for file in ConfigFile::all() {
        let scoped: Vec<&PatchEntry> = entries
            .iter()
            .filter(|entry| entry.key.file() == *file)
            .collect();
        if scoped.is_empty() {
            continue;
        }

        let path = config_file_path(home, *file);
        let original = read_optional(&path)?.unwrap_or_default();
        let patched = patch_document(&original, &scoped);
        if dry_run {
            info!(
                target: "monoctl::writer",
                path = %path.display(),
                keys = scoped.len(),
                changed = patched != original,
                "dry run: would patch config file"
            );
        } else {
            let changed = atomic_write(&path, patched.as_bytes())?;
            info!(target: "monoctl::writer", path = %path.display(), keys = scoped.len(), changed, "config file patched");
        }
        touched.push(path);
    }
    Ok(touched)
}

/// Remove the peer address book. Returns whether a file was (or would be) removed.
pub fn clear_addrbook(home: &Path, dry_run: bool) -> WriteResult<bool> {
    check_home(home)?;
    let path = addrbook_path(home);
    if !path.exists() {
        debug!(target: "monoctl::writer", path = %path.display(), "no address book to clear");
        return Ok(false);
    }
    if dry_run {
        info!(target: "monoctl::writer", path = %path.display(), "dry run: would clear address book");
        return Ok(true);
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            info!(target: "monoctl::writer", path = %path.display(), "address book cleared");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(WriteError::io(path, err)),
    }
}

pub fn read_optional(path: &Path) -> WriteResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WriteError::io(path, err)),
    }
}

/// Right-hand side of the first uncommented `toml_key = ...` line.
pub fn read_key<'a>(contents: &'a str, toml_key: &str) -> Option<&'a str> {
    contents
        .lines()
        .filter_map(assignment)
        .find(|(key, _)| *key == toml_key)
        .map(|(_, raw)| raw)
}

/// Line-oriented patch of a TOML document.
///
/// Existing assignments are replaced where they stand, keeping their
/// indentation. Missing keys are appended to their table, which is created
/// at the end of the document when absent. Commented lines are never touched.
/// A document using CRLF line endings keeps them.
pub fn patch_document(original: &str, entries: &[&PatchEntry]) -> String {
    let newline = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    for entry in entries {
        let toml_key = entry.key.toml_key();
        let existing = lines
            .iter()
            .position(|line| matches!(assignment(line), Some((key, _)) if key == toml_key));
        match existing {
            Some(index) => {
                let indent_len = lines[index].len() - lines[index].trim_start().len();
                let indent = lines[index][..indent_len].to_string();
                lines[index] = format!("{indent}{}", entry.line());
            }
            None => insert_missing(&mut lines, entry.key, entry.line()),
        }
    }

    let mut out = lines.join(newline);
    out.push_str(newline);
    out
}

fn insert_missing(lines: &mut Vec<String>, key: CanonicalKey, line: String) {
    match key.section() {
        None => {
            let first_header = lines
                .iter()
                .position(|line| header(line).is_some())
                .unwrap_or(lines.len());
            let position = last_content_line(lines, 0, first_header)
                .map(|index| index + 1)
                .unwrap_or(0);
            if position == first_header && first_header < lines.len() {
                lines.insert(position, String::new());
            }
            lines.insert(position, line);
        }
        Some(section) => {
            let start = lines.iter().position(|line| header(line) == Some(section));
            match start {
                Some(start) => {
                    let end = lines[start + 1..]
                        .iter()
                        .position(|line| header(line).is_some())
                        .map(|offset| start + 1 + offset)
                        .unwrap_or(lines.len());
                    let position = last_content_line(lines, start + 1, end)
                        .map(|index| index + 1)
                        .unwrap_or(start + 1);
                    lines.insert(position, line);
                }
                None => {
                    if lines.last().is_some_and(|last| !last.trim().is_empty()) {
                        lines.push(String::new());
                    }
                    lines.push(format!("[{section}]"));
                    lines.push(line);
                }
            }
        }
    }
}

fn last_content_line(lines: &[String], start: usize, end: usize) -> Option<usize> {
    (start..end)
        .rev()
        .find(|index| !lines[*index].trim().is_empty())
}

fn assignment(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with('[') {
        return None;
    }
    let (key, raw) = trimmed.split_once('=')?;
    Some((key.trim().trim_matches('"'), raw.trim()))
}

fn header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let inner = trimmed.trim_start_matches('[');
    let end = inner.find(']')?;
    Some(inner[..end].trim())
}

/// Replace `path` with `bytes` via temp file + fsync + rename.
/// Returns `false` without touching disk when the content is already identical.
fn atomic_write(path: &Path, bytes: &[u8]) -> WriteResult<bool> {
    let existing = match fs::read(path) {
        Ok(existing) => Some(existing),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(WriteError::io(path, err)),
    };
    if existing.as_deref() == Some(bytes) {
        return Ok(false);
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|err| WriteError::io(parent, err))?;
    temp.write_all(bytes)
        .map_err(|err| WriteError::io(temp.path(), err))?;
    set_permissions(temp.as_file(), path, existing.is_some())?;
    temp.as_file()
        .sync_all()
        .map_err(|err| WriteError::io(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| WriteError::io(path, err.error))?;
    sync_dir(parent)?;
    Ok(true)
}

fn ensure_dir(dir: &Path) -> WriteResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir).map_err(|err| WriteError::io(dir, err))
}

#[cfg(unix)]
fn set_permissions(file: &fs::File, target: &Path, target_exists: bool) -> WriteResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = if target_exists {
        fs::metadata(target)
            .map_err(|err| WriteError::io(target, err))?
            .permissions()
    } else {
        fs::Permissions::from_mode(0o644)
    };
    file.set_permissions(permissions)
        .map_err(|err| WriteError::io(target, err))
}

#[cfg(not(unix))]
fn set_permissions(_file: &fs::File, _target: &Path, _target_exists: bool) -> WriteResult<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> WriteResult<()> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| WriteError::io(dir, err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> WriteResult<()> {
    Ok(())
}
