//! Collision-safe relocation into outcome folders
//!
//! A relocated file never overwrites anything already in the destination.
//! On a name clash the file is stored as `{timestamp}_{name}` where the
//! timestamp is RFC 3339 UTC with `:` replaced by `.` so names still sort
//! chronologically.

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Folder for files whose record could not be written
pub const NOT_RECORDED_FOLDER: &str = "not_recorded";

/// Default folder for successfully persisted files
pub const PROCESSED_FOLDER: &str = "processed";

/// Default folder for malformed files
pub const CORRUPTED_FOLDER: &str = "corrupted";

/// Attempts per timestamp before giving up on finding a free name
const MAX_ATTEMPTS: usize = 64;

/// Move `file` into `dest_dir`, creating the folder if needed
///
/// Returns the final path of the file.
pub fn relocate(file: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| Error::Config(format!("{} has no file name", file.display())))?;

    fs::create_dir_all(dest_dir).map_err(|e| Error::io(dest_dir, e))?;

    let plain = dest_dir.join(name);
    if move_no_clobber(file, &plain).map_err(|e| Error::io(file, e))? {
        return Ok(plain);
    }

    let stamp = timestamp_prefix();
    let name = name.to_string_lossy();
    for attempt in 0..MAX_ATTEMPTS {
        let candidate = if attempt == 0 {
            dest_dir.join(format!("{}_{}", stamp, name))
        } else {
            dest_dir.join(format!("{}_{}_{}", stamp, attempt, name))
        };
        if move_no_clobber(file, &candidate).map_err(|e| Error::io(file, e))? {
            debug!("{} already present, stored as {}", plain.display(), candidate.display());
            return Ok(candidate);
        }
    }

    Err(Error::io(
        file,
        io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name left in {}", dest_dir.display()),
        ),
    ))
}

/// Move `from` to `to` unless `to` exists
///
/// Returns `Ok(false)` when the target name is taken.
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            unlink_source(from, to)?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        // Cross-device or no hard link support
        Err(_) => copy_no_clobber(from, to),
    }
}

fn copy_no_clobber(from: &Path, to: &Path) -> io::Result<bool> {
    let mut target = match OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    let copied = fs::File::open(from).and_then(|mut source| io::copy(&mut source, &mut target));
    if let Err(e) = copied.and_then(|_| target.sync_all()) {
        drop(target);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    unlink_source(from, to)?;
    Ok(true)
}

/// Remove `from` once `to` holds the file
///
/// On failure the new copy is removed so the file stays only at `from`.
fn unlink_source(from: &Path, to: &Path) -> io::Result<()> {
    fs::remove_file(from).map_err(|e| {
        let _ = fs::remove_file(to);
        e
    })
}

fn timestamp_prefix() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
        .replace(':', ".")
}

/// Move files left in `{watch_dir}/not_recorded` back into `watch_dir`
///
/// The watcher then sees them as new arrivals and retries them. The folder
/// is removed once empty. Returns the number of files restored.
pub fn restore_not_recorded(watch_dir: &Path) -> Result<usize> {
    let folder = watch_dir.join(NOT_RECORDED_FOLDER);
    if !folder.is_dir() {
        return Ok(0);
    }

    let mut restored = 0;
    for entry in WalkDir::new(&folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read {}: {}", folder.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match relocate(entry.path(), watch_dir) {
            Ok(_) => restored += 1,
            Err(e) => warn!("Failed to restore {}: {}", entry.path().display(), e),
        }
    }

    if let Err(e) = fs::remove_dir(&folder) {
        debug!("{} was not removed: {}", folder.display(), e);
    }
    if restored > 0 {
        info!("Restored {} unrecorded file(s) into {}", restored, watch_dir.display());
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_relocate_creates_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.xml");
        write(&src, "one");

        let dest = relocate(&src, &temp.path().join("processed")).unwrap();

        assert_eq!(dest, temp.path().join("processed/a.xml"));
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dest).unwrap(), "one");
    }

    #[test]
    fn test_relocate_collision_keeps_both() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("processed");
        let src = temp.path().join("a.xml");

        write(&src, "first");
        relocate(&src, &out).unwrap();
        write(&src, "second");
        let second = relocate(&src, &out).unwrap();

        assert_ne!(second, out.join("a.xml"));
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_a.xml"));
        assert!(!name.contains(':'));
        assert_eq!(fs::read_to_string(out.join("a.xml")).unwrap(), "first");
        assert_eq!(fs::read_to_string(&second).unwrap(), "second");
    }

    #[test]
    fn test_relocate_many_collisions_never_overwrite() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("corrupted");
        let src = temp.path().join("b.xml");

        for i in 0..5 {
            write(&src, &i.to_string());
            relocate(&src, &out).unwrap();
        }

        let mut bodies: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        bodies.sort();
        assert_eq!(bodies, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_relocate_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = relocate(&temp.path().join("gone.xml"), temp.path()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_failed_unlink_rolls_back_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("processed_a.xml");
        write(&target, "copy");

        let err = unlink_source(&temp.path().join("already_gone.xml"), &target).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!target.exists());
    }

    #[test]
    fn test_restore_not_recorded() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join(NOT_RECORDED_FOLDER);
        fs::create_dir_all(&folder).unwrap();
        write(&folder.join("a.xml"), "a");
        write(&folder.join("b.xml"), "b");

        assert_eq!(restore_not_recorded(temp.path()).unwrap(), 2);
        assert!(temp.path().join("a.xml").exists());
        assert!(temp.path().join("b.xml").exists());
        assert!(!folder.exists());
    }

    #[test]
    fn test_restore_without_folder() {
        let temp = TempDir::new().unwrap();
        assert_eq!(restore_not_recorded(temp.path()).unwrap(), 0);
    }
}
