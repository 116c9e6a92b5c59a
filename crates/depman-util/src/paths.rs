use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

/// Normalize a path by resolving `.` and `..` components lexically, without
/// touching the filesystem (unlike [`std::fs::canonicalize`]). Used to
/// compare import-path-derived filesystem locations without requiring the
/// path to exist yet.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().copied() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// True if `child` is lexically contained within `parent` after normalization.
pub fn is_inside(parent: &Path, child: &Path) -> bool {
    normalize_path(child).starts_with(normalize_path(parent))
}

/// Remove a directory tree, tolerating read-only files on Windows and a
/// missing root (already-removed trees are not an error).
pub fn remove_dir_all(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    clear_read_only(path)?;
    fs::remove_dir_all(path).with_context(|| format!("failed to remove directory `{}`", path.display()))
}

fn clear_read_only(path: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if let Ok(meta) = entry.metadata() {
            if meta.permissions().readonly() {
                let mut perms = meta.permissions();
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
    Ok(())
}

/// True if `a` and `b` resolve to the same file on disk (same device and
/// inode on Unix, same file index on Windows), tolerating either path not
/// existing by falling back to a lexical comparison.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    same_file::is_same_file(a, b).unwrap_or_else(|_| normalize_path(a) == normalize_path(b))
}

/// Create `path` and all missing parent directories, same as
/// [`fs::create_dir_all`] but with a descriptive error on failure.
pub fn create_dir_all(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create directory `{}`", path.display()))
}

/// Atomically replace `dest` with `src` (same-filesystem rename), falling
/// back to copy-then-remove if the rename fails because they live on
/// different filesystems (common for tmp dirs mounted separately from a
/// cache root).
pub fn persist(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_all(src, dest)?;
            remove_dir_all(src)?;
            Ok(())
        }
    }
}

fn copy_dir_all(src: &Path, dest: &Path) -> anyhow::Result<()> {
    create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let to = dest.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_all(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_dot() {
        assert_eq!(
            normalize_path(Path::new("a/b/../c")),
            PathBuf::from("a/c")
        );
    }

    #[test]
    fn inside_detects_escape() {
        assert!(is_inside(Path::new("/a"), Path::new("/a/b")));
        assert!(!is_inside(Path::new("/a/b"), Path::new("/a/c")));
    }

    #[test]
    fn persist_moves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("nested").join("dest");
        create_dir_all(&src).unwrap();
        fs::write(src.join("file.txt"), b"hi").unwrap();
        persist(&src, &dest).unwrap();
        assert_eq!(fs::read(dest.join("file.txt")).unwrap(), b"hi");
        assert!(!src.exists());
    }
}
