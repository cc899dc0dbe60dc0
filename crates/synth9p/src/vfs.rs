//! The synthesized namespace served to every connection.
//!
//! A [`Namespace`] owns every [`File`] keyed by its full path and hands out
//! qids from a process-wide counter. It is the only state shared between
//! connections, so every mutation happens under a single lock and the
//! duplicate check and the insertion of `add_file` are one atomic step.

use {
    crate::{
        error::{Error, string as errstr},
        fcall::*,
        utils::{self, Result},
    },
    log::debug,
    std::{
        collections::BTreeMap,
        sync::{
            PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
            atomic::{AtomicU64, Ordering},
        },
    },
};

/// Path of the namespace root
pub const ROOT: &str = "/";

/// Join a directory path and a name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// The directory part of a path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Whether `name` can be used as a single path element.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// A node of the namespace.
///
/// Values handed out by [`Namespace`] are snapshots; the registry keeps the
/// authoritative copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    path: String,
    parent: Option<String>,
    /// Metadata reported by `Rstat`
    pub stat: Stat,
}

impl File {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the parent directory; `None` only for the root.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.stat.name
    }

    pub fn qid(&self) -> QId {
        self.stat.qid
    }

    pub fn is_dir(&self) -> bool {
        self.stat.is_dir()
    }
}

/// Registry of every file in the tree.
#[derive(Debug)]
pub struct Namespace {
    files: RwLock<BTreeMap<String, File>>,
    next_path: AtomicU64,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// An empty namespace. The root still has to be added.
    pub fn new() -> Namespace {
        Namespace {
            files: RwLock::new(BTreeMap::new()),
            next_path: AtomicU64::new(0),
        }
    }

    /// A namespace holding only the root directory.
    ///
    /// `mode` gets the directory bit added if it is missing.
    pub fn with_root(owner: &str, group: &str, mode: u32) -> Result<Namespace> {
        let ns = Namespace::new();
        let now = utils::now();
        let stat = Stat {
            typ: 0,
            dev: 0,
            qid: ns.alloc_qid(QIdType::DIR),
            mode: mode | dm::DIR,
            atime: now,
            mtime: now,
            length: 0,
            name: ROOT.to_owned(),
            uid: owner.to_owned(),
            gid: group.to_owned(),
            muid: owner.to_owned(),
        };
        ns.add_file(ROOT, stat, None)?;
        Ok(ns)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, File>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, File>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh qid; `path` strictly increases for the lifetime of the process.
    pub fn alloc_qid(&self, typ: QIdType) -> QId {
        QId {
            typ,
            version: 0,
            path: self.next_path.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Register a file under `path`.
    ///
    /// `parent` must be the registered directory whose path is the prefix of
    /// `path`; only the root is added without one.
    pub fn add_file(&self, path: &str, stat: Stat, parent: Option<&File>) -> Result<File> {
        let mut files = self.write();

        if files.contains_key(path) {
            return Err(Error::DuplicatePath(path.to_owned()));
        }

        let expected = parent_path(path);
        match (parent, expected) {
            (None, None) => {}
            (Some(p), Some(prefix)) if p.path == prefix => {
                if !files.get(prefix).is_some_and(File::is_dir) {
                    return Err(Error::InvalidParent(path.to_owned()));
                }
            }
            _ => return Err(Error::InvalidParent(path.to_owned())),
        }

        let file = File {
            path: path.to_owned(),
            parent: expected.map(str::to_owned),
            stat,
        };
        debug!("add {} {:?}", path, file.stat.qid);
        files.insert(path.to_owned(), file.clone());
        Ok(file)
    }

    /// Register a new file called `name` inside the directory `parent`.
    ///
    /// The qid type follows the top byte of `mode` and the group is inherited
    /// from the parent.
    pub fn add_child(
        &self,
        parent: &File,
        name: &str,
        mode: u32,
        length: u64,
        owner: &str,
    ) -> Result<File> {
        if !valid_name(name) {
            return Err(Error::No(errstr::EBADNAME));
        }

        let now = utils::now();
        let stat = Stat {
            typ: 0,
            dev: 0,
            qid: self.alloc_qid(QIdType::from_mode(mode)),
            mode,
            atime: now,
            mtime: now,
            length,
            name: name.to_owned(),
            uid: owner.to_owned(),
            gid: parent.stat.gid.clone(),
            muid: owner.to_owned(),
        };
        self.add_file(&child_path(parent.path(), name), stat, Some(parent))
    }

    pub fn lookup(&self, path: &str) -> Result<File> {
        self.read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }

    pub fn root(&self) -> Result<File> {
        self.lookup(ROOT)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    /// Number of registered files, root included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Direct children of the directory at `path`, ordered by path.
    pub fn children(&self, path: &str) -> Vec<File> {
        self.read()
            .values()
            .filter(|f| f.parent.as_deref() == Some(path))
            .cloned()
            .collect()
    }

    /// Unregister a file. The root and non-empty directories are refused.
    pub fn remove(&self, path: &str) -> Result<File> {
        let mut files = self.write();

        if path == ROOT {
            return Err(Error::No(errstr::EPERM));
        }
        if files.values().any(|f| f.parent.as_deref() == Some(path)) {
            return Err(Error::No(errstr::ENOTEMPTY));
        }

        let file = files
            .remove(path)
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        debug!("remove {} {:?}", path, file.stat.qid);
        Ok(file)
    }

    /// Modify a file's stat in place.
    ///
    /// The qid keeps its path, its version is bumped and its type follows
    /// the new mode.
    pub fn update<F>(&self, path: &str, f: F) -> Result<File>
    where
        F: FnOnce(&mut Stat),
    {
        let mut files = self.write();
        let file = files
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;

        let qid = file.stat.qid;
        f(&mut file.stat);
        file.stat.qid = QId {
            typ: QIdType::from_mode(file.stat.mode),
            version: qid.version.wrapping_add(1),
            path: qid.path,
        };
        Ok(file.clone())
    }

    /// Give a file a new name in the same directory.
    ///
    /// Directories which still have children are refused.
    pub fn rename(&self, path: &str, name: &str) -> Result<File> {
        if !valid_name(name) {
            return Err(Error::No(errstr::EBADNAME));
        }

        let mut files = self.write();
        let parent = parent_path(path).ok_or(Error::No(errstr::EPERM))?;
        let newpath = child_path(parent, name);

        if files.contains_key(&newpath) {
            return Err(Error::DuplicatePath(newpath));
        }
        if files.values().any(|f| f.parent.as_deref() == Some(path)) {
            return Err(Error::No(errstr::ENOTEMPTY));
        }

        let mut file = files
            .remove(path)
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        file.path = newpath.clone();
        file.stat.name = name.to_owned();
        file.stat.qid.version = file.stat.qid.version.wrapping_add(1);
        debug!("rename {} -> {}", path, newpath);
        files.insert(newpath, file.clone());
        Ok(file)
    }
}
