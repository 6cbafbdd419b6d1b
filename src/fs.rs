//! Filesystem capability
//!
//! The pipeline only touches storage through [`FileSystem`], so it runs the
//! same against the real disk ([`OsFs`]) and an in-memory tree ([`MemFs`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub trait FileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn metadata(&self, path: &Path) -> io::Result<Metadata>;
    /// Immediate children of `path`, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The process's real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let meta = fs::metadata(path)?;
        Ok(Metadata {
            is_dir: meta.is_dir(),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory filesystem. Relative and absolute paths are normalized
/// lexically (`./a/../b` is `b`); the empty path is the always-present root.
#[derive(Debug, Default)]
pub struct MemFs {
    state: Mutex<MemState>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating its parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = normalize(path.as_ref());
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            insert_dirs(&mut state, parent);
        }
        state.files.insert(path, contents.into());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path.as_ref())).cloned()
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.metadata(path.as_ref()).is_ok()
    }

    /// Every regular file, in path order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn insert_dirs(state: &mut MemState, dir: &Path) {
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        state.dirs.insert(ancestor.to_path_buf());
    }
}

fn is_dir(state: &MemState, path: &Path) -> bool {
    path.as_os_str().is_empty() || path == Path::new("/") || state.dirs.contains(path)
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: file does not exist", path.display()),
    )
}

impl FileSystem for MemFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = normalize(path);
        let state = self.lock();
        if is_dir(&state, &path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: is a directory", path.display()),
            ));
        }
        state.files.get(&path).cloned().ok_or_else(|| not_found(&path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let path = normalize(path);
        let mut state = self.lock();
        if is_dir(&state, &path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: is a directory", path.display()),
            ));
        }
        let parent = path.parent().unwrap_or(Path::new(""));
        if !is_dir(&state, parent) {
            return Err(not_found(parent));
        }
        state.files.insert(path, contents.to_vec());
        Ok(())
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let path = normalize(path);
        let state = self.lock();
        if is_dir(&state, &path) {
            return Ok(Metadata { is_dir: true });
        }
        state
            .files
            .get(&path)
            .map(|_| Metadata { is_dir: false })
            .ok_or_else(|| not_found(&path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        let state = self.lock();
        if !is_dir(&state, &path) {
            return Err(not_found(&path));
        }

        let child_name = |p: &Path| -> Option<String> {
            (p.parent() == Some(path.as_path()))
                .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .flatten()
        };
        let dirs = state.dirs.iter().filter_map(|d| {
            child_name(d.as_path()).map(|name| DirEntry { name, is_dir: true })
        });
        let files = state.files.keys().filter_map(|f| {
            child_name(f.as_path()).map(|name| DirEntry { name, is_dir: false })
        });
        Ok(dirs.chain(files).collect())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut state = self.lock();
        for ancestor in path.ancestors() {
            if state.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{}: not a directory", ancestor.display()),
                ));
            }
        }
        insert_dirs(&mut state, &path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_paths_are_normalized() {
        let fs = MemFs::new();
        fs.add_file("./testdir/ok.json", "{}");
        assert!(fs.exists("testdir/ok.json"));
        assert!(fs.exists("testdir/../testdir/./ok.json"));
        assert_eq!(fs.contents("testdir/ok.json").unwrap(), b"{}");
    }

    #[test]
    fn test_normalize_is_lexical() {
        assert_eq!(normalize(Path::new("./d/ok.json")), PathBuf::from("d/ok.json"));
        assert_eq!(normalize(Path::new("d/x/../ok.json")), PathBuf::from("d/ok.json"));
        assert_eq!(normalize(Path::new(".")), PathBuf::new());
    }

    #[test]
    fn test_mem_write_needs_parent() {
        let fs = MemFs::new();
        assert!(fs.write(Path::new("out/a.cbor"), b"x").is_err());
        fs.create_dir_all(Path::new("out")).unwrap();
        fs.write(Path::new("out/a.cbor"), b"x").unwrap();
        fs.write(Path::new("./top.cbor"), b"y").unwrap();
        assert_eq!(fs.files(), vec![PathBuf::from("out/a.cbor"), PathBuf::from("top.cbor")]);
    }

    #[test]
    fn test_mem_read_dir_lists_immediate_children() {
        let fs = MemFs::new();
        fs.add_file("d/a.json", "1");
        fs.add_file("d/sub/b.json", "2");
        fs.add_file("other.json", "3");

        let mut names: Vec<_> = fs
            .read_dir(Path::new("d"))
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_dir))
            .collect();
        names.sort();
        assert_eq!(names, vec![("a.json".to_string(), false), ("sub".to_string(), true)]);

        assert!(fs.read_dir(Path::new("missing")).is_err());
        assert_eq!(fs.read_dir(Path::new(".")).unwrap().len(), 2);
    }

    #[test]
    fn test_mem_metadata() {
        let fs = MemFs::new();
        fs.add_file("d/a.json", "abc");
        assert_eq!(fs.metadata(Path::new("d/a.json")).unwrap(), Metadata { is_dir: false });
        assert!(fs.metadata(Path::new("d")).unwrap().is_dir);
        assert!(fs.metadata(Path::new("nope")).is_err());
        assert!(fs.read(Path::new("d")).is_err());
    }

    #[test]
    fn test_os_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs;
        let out = dir.path().join("nested/out");
        fs.create_dir_all(&out).unwrap();
        fs.write(&out.join("a.cbor"), b"\xa0").unwrap();
        assert_eq!(fs.read(&out.join("a.cbor")).unwrap(), b"\xa0");
        let entries = fs.read_dir(&out).unwrap();
        assert_eq!(entries, vec![DirEntry { name: "a.cbor".into(), is_dir: false }]);
        assert!(!fs.metadata(&out.join("a.cbor")).unwrap().is_dir);
    }
}
