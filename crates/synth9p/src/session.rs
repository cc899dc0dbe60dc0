//! Per-connection fid table.

use {
    crate::{
        error::Error,
        fcall::{IOHDRSZ, om},
        utils::Result,
    },
    std::collections::HashMap,
};

/// How a fid has been opened.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OpenMode {
    #[default]
    Unopened,
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    /// Map the low bits of a 9P open mode byte.
    pub fn from_om(mode: u8) -> OpenMode {
        match mode & 3 {
            om::WRITE => OpenMode::Write,
            om::RDWR => OpenMode::ReadWrite,
            // om::READ and om::EXEC
            _ => OpenMode::Read,
        }
    }

    pub fn is_open(&self) -> bool {
        *self != OpenMode::Unopened
    }

    pub fn readable(&self) -> bool {
        matches!(*self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(*self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// What a fid refers to on this connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FidEntry {
    /// Namespace path the fid is bound to
    pub path: String,
    pub mode: OpenMode,
    /// Remove the file when the fid is clunked
    pub rclose: bool,
}

impl FidEntry {
    pub fn new(path: impl Into<String>) -> FidEntry {
        FidEntry {
            path: path.into(),
            ..Default::default()
        }
    }

    /// An entry opened with the 9P mode byte `mode`.
    pub fn opened(path: impl Into<String>, mode: u8) -> FidEntry {
        FidEntry {
            path: path.into(),
            mode: OpenMode::from_om(mode),
            rclose: mode & om::RCLOSE != 0,
        }
    }
}

/// State owned by a single connection.
///
/// Fid numbers are chosen by the client and are only meaningful within the
/// connection that bound them.
#[derive(Debug)]
pub struct Session {
    fids: HashMap<u32, FidEntry>,
    uname: String,
    msize: u32,
}

impl Session {
    pub fn new(msize: u32) -> Session {
        Session {
            fids: HashMap::new(),
            uname: String::new(),
            msize,
        }
    }

    /// Bind `fid` to `path`, replacing any previous binding.
    pub fn bind_fid(&mut self, fid: u32, path: impl Into<String>) {
        self.fids.insert(fid, FidEntry::new(path));
    }

    /// Install a complete entry, as produced by a finished open or create.
    pub fn install(&mut self, fid: u32, entry: FidEntry) {
        self.fids.insert(fid, entry);
    }

    pub fn set_open_mode(&mut self, fid: u32, mode: OpenMode) -> Result<()> {
        let entry = self.fids.get_mut(&fid).ok_or(Error::UnknownFid(fid))?;
        entry.mode = mode;
        Ok(())
    }

    pub fn resolve_fid(&self, fid: u32) -> Result<&str> {
        self.entry(fid).map(|e| e.path.as_str())
    }

    pub fn entry(&self, fid: u32) -> Result<&FidEntry> {
        self.fids.get(&fid).ok_or(Error::UnknownFid(fid))
    }

    /// Release a fid.
    pub fn clunk_fid(&mut self, fid: u32) -> Result<FidEntry> {
        self.fids.remove(&fid).ok_or(Error::UnknownFid(fid))
    }

    /// Point every fid bound to `from` at `to`, keeping open modes.
    pub fn rename_path(&mut self, from: &str, to: &str) {
        for entry in self.fids.values_mut().filter(|e| e.path == from) {
            entry.path = to.to_owned();
        }
    }

    pub fn contains(&self, fid: u32) -> bool {
        self.fids.contains_key(&fid)
    }

    pub fn len(&self) -> usize {
        self.fids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }

    /// Clunk every fid, returning what was bound.
    pub fn clunk_all(&mut self) -> Vec<FidEntry> {
        self.fids.drain().map(|(_, entry)| entry).collect()
    }

    /// Start over with a new message size, as `Tversion` requires.
    ///
    /// Every fid is clunked and returned.
    pub fn reset(&mut self, msize: u32) -> Vec<FidEntry> {
        self.msize = msize;
        self.clunk_all()
    }

    pub fn uname(&self) -> &str {
        &self.uname
    }

    pub fn set_uname(&mut self, uname: impl Into<String>) {
        self.uname = uname.into();
    }

    pub fn msize(&self) -> u32 {
        self.msize
    }

    /// Largest read or write payload fitting in one message
    pub fn iounit(&self) -> u32 {
        self.msize.saturating_sub(IOHDRSZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_resolve_clunk() {
        let mut s = Session::new(8192);
        assert!(matches!(s.resolve_fid(1), Err(Error::UnknownFid(1))));

        s.bind_fid(1, "/");
        assert_eq!(s.resolve_fid(1).unwrap(), "/");
        assert_eq!(s.entry(1).unwrap().mode, OpenMode::Unopened);

        s.set_open_mode(1, OpenMode::Read).unwrap();
        assert!(s.entry(1).unwrap().mode.readable());

        let entry = s.clunk_fid(1).unwrap();
        assert_eq!(entry.path, "/");
        assert!(!s.contains(1));
        assert!(matches!(s.clunk_fid(1), Err(Error::UnknownFid(1))));
        assert!(matches!(
            s.set_open_mode(1, OpenMode::Write),
            Err(Error::UnknownFid(1))
        ));
    }

    #[test]
    fn sessions_do_not_share_fids() {
        let mut a = Session::new(8192);
        let mut b = Session::new(8192);
        a.bind_fid(5, "/a");
        b.bind_fid(5, "/b");
        assert_eq!(a.resolve_fid(5).unwrap(), "/a");
        assert_eq!(b.resolve_fid(5).unwrap(), "/b");

        b.clunk_fid(5).unwrap();
        assert_eq!(a.resolve_fid(5).unwrap(), "/a");
    }

    #[test]
    fn open_modes() {
        assert_eq!(OpenMode::from_om(om::READ), OpenMode::Read);
        assert_eq!(OpenMode::from_om(om::EXEC), OpenMode::Read);
        assert_eq!(OpenMode::from_om(om::WRITE | om::TRUNC), OpenMode::Write);
        assert_eq!(OpenMode::from_om(om::RDWR), OpenMode::ReadWrite);
        assert!(!OpenMode::Unopened.is_open());
        assert!(!OpenMode::Write.readable());

        let e = FidEntry::opened("/f", om::RDWR | om::RCLOSE);
        assert!(e.rclose);
        assert!(e.mode.writable());
    }

    #[test]
    fn rename_follows_all_fids() {
        let mut s = Session::new(8192);
        s.install(1, FidEntry::opened("/a", om::WRITE));
        s.bind_fid(2, "/a");
        s.bind_fid(3, "/b");
        s.rename_path("/a", "/c");
        assert_eq!(s.resolve_fid(1).unwrap(), "/c");
        assert_eq!(s.entry(1).unwrap().mode, OpenMode::Write);
        assert_eq!(s.resolve_fid(2).unwrap(), "/c");
        assert_eq!(s.resolve_fid(3).unwrap(), "/b");
    }

    #[test]
    fn reset_drops_everything() {
        let mut s = Session::new(8192);
        s.bind_fid(1, "/");
        s.install(2, FidEntry::opened("/x", om::READ | om::RCLOSE));
        let mut released = s.reset(4096);
        released.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(released.len(), 2);
        assert_eq!(released[0], FidEntry::new("/"));
        assert!(released[1].rclose);
        assert!(s.is_empty());
        assert_eq!(s.msize(), 4096);
        assert_eq!(s.iounit(), 4096 - IOHDRSZ);
    }
}
