use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Prefix given to every in-flight file. Anything carrying it is incomplete.
pub const PARTIAL_PREFIX: &str = ".partial-";

/// Represents errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// Wrapper for standard IO errors.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Error for empty path input.
    #[error("Path is empty")]
    EmptyPath,
    /// Error when the home directory cannot be determined.
    #[error("Home directory not found")]
    HomeDirNotFound,
    /// Error for unsupported user expansion in paths (e.g., ~user).
    #[error("User expansion (~user) not supported")]
    UserExpansionNotSupported,
}

/// Creates a directory (and its parents) if it does not exist.
///
/// # Arguments
///
/// * `dir` - Path to the directory to create. A leading `~` is expanded.
///
/// # Errors
///
/// Returns `FilesystemError` if the path is empty or the directory cannot be created.
pub fn create_if_not_exists<P: AsRef<Path>>(dir: P) -> Result<PathBuf, FilesystemError> {
    let raw_path = dir.as_ref().to_str().ok_or(FilesystemError::EmptyPath)?;
    if raw_path.is_empty() {
        return Err(FilesystemError::EmptyPath);
    }
    let path = try_expand_home(raw_path)?;

    if !path.is_dir() {
        fs::create_dir_all(&path)?;
    }

    Ok(path)
}

/// Returns the size of a file, or `None` if it does not exist.
pub fn file_len<P: AsRef<Path>>(file: P) -> Option<u64> {
    fs::metadata(file).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Creates a named temporary file next to `target`, carrying the partial prefix.
///
/// The file is removed when dropped unless it is persisted with [`persist`].
pub fn partial_file_for(target: &Path) -> Result<tempfile::NamedTempFile, FilesystemError> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(parent)?;
    Ok(file)
}

/// Atomically moves a finished partial file onto its final path.
pub fn persist(partial: tempfile::NamedTempFile, target: &Path) -> Result<(), FilesystemError> {
    partial.persist(target).map_err(|e| FilesystemError::Io(e.error))?;
    Ok(())
}

/// Copies a file from `src` to `dst` through a partial file, so `dst` is
/// either absent or complete.
///
/// # Arguments
///
/// * `src` - Source file path.
/// * `dst` - Destination file path. Parent directories are created.
/// * `overwrite` - If false and destination exists, returns an error.
///
/// # Returns
///
/// The number of bytes copied.
pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    overwrite: bool,
) -> Result<u64, FilesystemError> {
    let dst_path = dst.as_ref();
    if dst_path.exists() && !overwrite {
        return Err(FilesystemError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "Destination file exists and overwrite is false",
        )));
    }

    let mut partial = partial_file_for(dst_path)?;
    let mut source = fs::File::open(src)?;
    let copied = io::copy(&mut source, partial.as_file_mut())?;
    partial.as_file_mut().flush()?;
    persist(partial, dst_path)?;
    Ok(copied)
}

/// Removes a file at the given path if it exists.
pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> Result<(), FilesystemError> {
    let p = path.as_ref();
    if p.is_file() {
        fs::remove_file(p)?;
    }
    Ok(())
}

/// Writes content to a file through a partial file.
pub fn write_file<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<(), FilesystemError> {
    let p = path.as_ref();
    let mut partial = partial_file_for(p)?;
    partial.as_file_mut().write_all(content)?;
    partial.as_file_mut().flush()?;
    persist(partial, p)
}

/// Recursively deletes leftover partial files below `root`.
///
/// A killed process can leave these behind; they are never valid artifacts.
///
/// # Returns
///
/// The number of files removed.
pub fn sweep_partial_files<P: AsRef<Path>>(root: P) -> Result<usize, FilesystemError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if entry
                .file_name()
                .to_string_lossy()
                .starts_with(PARTIAL_PREFIX)
            {
                debug!("Removing partial file {}", path.display());
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
    }

    Ok(removed)
}

/// Expands a path that starts with `~` to the user's home directory.
///
/// # Arguments
///
/// * `path` - Path string, possibly starting with `~`.
///
/// # Returns
///
/// The expanded `PathBuf`, or empty if expansion fails.
pub fn expand_home(path: &str) -> PathBuf {
    try_expand_home(path).unwrap_or_default()
}

fn try_expand_home(path: &str) -> Result<PathBuf, FilesystemError> {
    if path.is_empty() {
        return Err(FilesystemError::EmptyPath);
    }
    if !path.starts_with('~') {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(FilesystemError::HomeDirNotFound)?;
    if path == "~" {
        return Ok(home);
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        return Ok(home.join(rest));
    }
    Err(FilesystemError::UserExpansionNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_nested_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let created = create_if_not_exists(&nested).unwrap();
        assert_eq!(created, nested);
        assert!(nested.is_dir());
        // second call is a no-op
        assert!(create_if_not_exists(&nested).is_ok());
    }

    #[test]
    fn rejects_empty_directory_path() {
        assert!(matches!(
            create_if_not_exists(""),
            Err(FilesystemError::EmptyPath)
        ));
    }

    #[test]
    fn copies_file_and_refuses_overwrite_when_asked() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.jar");
        let dst = dir.path().join("out").join("dst.jar");
        fs::write(&src, b"jar bytes").unwrap();

        assert_eq!(copy_file(&src, &dst, false).unwrap(), 9);
        assert_eq!(fs::read(&dst).unwrap(), b"jar bytes");
        assert!(copy_file(&src, &dst, false).is_err());
        assert!(copy_file(&src, &dst, true).is_ok());
    }

    #[test]
    fn dropped_partial_file_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mod.jar");
        {
            let mut partial = partial_file_for(&target).unwrap();
            partial.as_file_mut().write_all(b"half").unwrap();
        }
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sweeps_partial_files_recursively() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("1.21.5").join("mods");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(".partial-abc123"), b"x").unwrap();
        fs::write(dir.path().join(".partial-zzz"), b"x").unwrap();
        fs::write(nested.join("kept.jar"), b"x").unwrap();

        assert_eq!(sweep_partial_files(dir.path()).unwrap(), 2);
        assert!(nested.join("kept.jar").exists());
        assert_eq!(sweep_partial_files(dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn write_file_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_file(&path, b"one").unwrap();
        write_file(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(file_len(&path), Some(3));
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn expands_plain_and_home_paths() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home(""), PathBuf::new());
        assert_eq!(expand_home("~someone/x"), PathBuf::new());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/cache"), home.join("cache"));
        }
    }
}
