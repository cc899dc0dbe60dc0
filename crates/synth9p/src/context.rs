//! Per-request handles passed to [`Filesystem`](crate::srv::Filesystem) callbacks.
//!
//! A context carries everything a callback needs to finish one request. It is
//! finished by calling `respond` or `fail`, both of which consume it, so a
//! request can never be answered twice. A context may be moved to another
//! task and finished later; the connection waits for it.
//!
//! A context dropped without being finished still answers its request, with
//! an `Rerror`, and logs the violation.

use {
    crate::{
        error::{Error, string as errstr},
        fcall::*,
        serialize::Header,
        session::FidEntry,
        utils::{self, Result},
        vfs::{File, Namespace},
    },
    log::{error, warn},
    std::sync::Arc,
    tokio::sync::oneshot,
};

/// What finishing a request produces: the response body and, when the
/// request changes the fid table, the entry to install.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) body: FCall,
    pub(crate) fid: Option<(u32, FidEntry)>,
}

impl Outcome {
    pub(crate) fn reply(body: FCall) -> Outcome {
        Outcome { body, fid: None }
    }

    pub(crate) fn error(e: &Error) -> Outcome {
        Outcome::reply(FCall::RError { ename: e.ename() })
    }
}

/// State shared by every context type.
#[derive(Debug)]
pub(crate) struct Ctx {
    reply: Option<oneshot::Sender<Outcome>>,
    ns: Arc<Namespace>,
    header: Header,
    fid: u32,
    file: File,
    uname: String,
    iounit: u32,
}

impl Ctx {
    pub(crate) fn new(
        ns: Arc<Namespace>,
        header: Header,
        fid: u32,
        file: File,
        uname: &str,
        iounit: u32,
    ) -> (Ctx, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let ctx = Ctx {
            reply: Some(tx),
            ns,
            header,
            fid,
            file,
            uname: uname.to_owned(),
            iounit,
        };
        (ctx, rx)
    }

    /// Whether a reply would still reach the client.
    ///
    /// False once the dispatcher gave up on the request (timeout or closed
    /// connection); state must not be mutated for such requests.
    fn answerable(&self) -> bool {
        self.reply.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(tx) = self.reply.take() {
            if tx.send(outcome).is_err() {
                warn!(
                    "{:?} tag {}: reply discarded, request no longer pending",
                    self.header.typ, self.header.tag
                );
            }
        }
    }

    fn fail(&mut self, e: Error) {
        self.finish(Outcome::error(&e));
    }

    /// Give up early when nobody waits for the reply any more.
    fn abandon(&mut self) -> bool {
        if self.answerable() {
            return false;
        }
        warn!(
            "{:?} tag {}: late reply dropped",
            self.header.typ, self.header.tag
        );
        self.reply = None;
        true
    }
}

impl Drop for Ctx {
    fn drop(&mut self) {
        if self.reply.is_some() {
            error!(
                "{:?} tag {}: context dropped without respond() or fail()",
                self.header.typ, self.header.tag
            );
            self.fail(Error::No(errstr::ENORESPONSE));
        }
    }
}

macro_rules! context_common {
    ($name:ident) => {
        impl $name {
            /// The fid named by the request
            pub fn fid(&self) -> u32 {
                self.ctx.fid
            }

            /// Tag of the request being answered
            pub fn tag(&self) -> u16 {
                self.ctx.header.tag
            }

            /// User name the connection attached with
            pub fn uname(&self) -> &str {
                &self.ctx.uname
            }

            pub fn iounit(&self) -> u32 {
                self.ctx.iounit
            }

            pub fn namespace(&self) -> &Namespace {
                &self.ctx.ns
            }

            /// Register a new file inside `parent`, owned by the attached user.
            pub fn add_file(
                &self,
                mode: u32,
                length: u64,
                name: &str,
                parent: &File,
            ) -> Result<File> {
                self.ctx
                    .ns
                    .add_child(parent, name, mode, length, &self.ctx.uname)
            }

            /// Answer the request with an `Rerror` carrying `ename`.
            pub fn fail(mut self, ename: impl Into<String>) {
                self.ctx.fail(Error::App(ename.into()))
            }

            /// Answer the request with the `Rerror` for `e`.
            pub fn fail_with(mut self, e: Error) {
                self.ctx.fail(e)
            }
        }
    };
}

/// `Topen` of a regular file.
#[derive(Debug)]
pub struct OpenContext {
    pub(crate) ctx: Ctx,
    pub(crate) mode: u8,
}

context_common!(OpenContext);

impl OpenContext {
    /// The file being opened
    pub fn file(&self) -> &File {
        &self.ctx.file
    }

    /// The 9P open mode byte, see [`om`]
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Accept the open. `OTRUNC` resets the recorded length.
    pub fn respond(mut self) {
        if self.ctx.abandon() {
            return;
        }

        let mut file = self.ctx.file.clone();
        if self.mode & om::TRUNC != 0 {
            let uname = self.ctx.uname.clone();
            match self.ctx.ns.update(file.path(), |s| {
                s.length = 0;
                s.mtime = utils::now();
                s.muid = uname;
            }) {
                Ok(f) => file = f,
                Err(e) => return self.ctx.fail(e),
            }
        }

        let entry = FidEntry::opened(file.path(), self.mode);
        self.ctx.finish(Outcome {
            body: FCall::ROpen {
                qid: file.qid(),
                iounit: self.ctx.iounit,
            },
            fid: Some((self.ctx.fid, entry)),
        });
    }
}

/// `Tread` of a regular file.
#[derive(Debug)]
pub struct ReadContext {
    pub(crate) ctx: Ctx,
    pub(crate) offset: u64,
    pub(crate) count: u32,
}

context_common!(ReadContext);

impl ReadContext {
    pub fn file(&self) -> &File {
        &self.ctx.file
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Maximum number of bytes the reply may carry
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Reply with `data`, truncated to `count()` bytes.
    pub fn respond(mut self, data: impl Into<Vec<u8>>) {
        let mut data = data.into();
        data.truncate(self.count as usize);
        self.ctx.finish(Outcome::reply(FCall::RRead { data: Data(data) }));
    }
}

/// `Twrite` to a regular file.
#[derive(Debug)]
pub struct WriteContext {
    pub(crate) ctx: Ctx,
    pub(crate) offset: u64,
    pub(crate) data: Vec<u8>,
}

context_common!(WriteContext);

impl WriteContext {
    pub fn file(&self) -> &File {
        &self.ctx.file
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Acknowledge `count` bytes as written.
    ///
    /// The file's recorded length grows to cover the written range.
    pub fn respond(mut self, count: u32) {
        if self.ctx.abandon() {
            return;
        }

        let count = count.min(self.data.len() as u32);
        let end = self.offset.saturating_add(count as u64);
        let uname = self.ctx.uname.clone();
        let updated = self.ctx.ns.update(self.ctx.file.path(), |s| {
            s.length = s.length.max(end);
            s.mtime = utils::now();
            s.muid = uname;
        });

        match updated {
            Ok(_) => self.ctx.finish(Outcome::reply(FCall::RWrite { count })),
            Err(e) => self.ctx.fail(e),
        }
    }
}

/// `Tcreate` in a directory.
#[derive(Debug)]
pub struct CreateContext {
    pub(crate) ctx: Ctx,
    pub(crate) new_path: String,
    pub(crate) name: String,
    pub(crate) perm: u32,
    pub(crate) mode: u8,
}

context_common!(CreateContext);

impl CreateContext {
    /// The directory the file is created in
    pub fn dir(&self) -> &File {
        &self.ctx.file
    }

    /// Full path the new file will have
    pub fn new_path(&self) -> &str {
        &self.new_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested permissions, see [`dm`]
    pub fn perm(&self) -> u32 {
        self.perm
    }

    /// Mode the new file is opened with, see [`om`]
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Register the new file with the given length, bind the fid to it and
    /// open it.
    pub fn respond(mut self, length: u64) {
        if self.ctx.abandon() {
            return;
        }

        let created = self.ctx.ns.add_child(
            &self.ctx.file,
            &self.name,
            self.perm,
            length,
            &self.ctx.uname,
        );

        match created {
            Ok(file) => {
                let entry = FidEntry::opened(self.new_path.as_str(), self.mode);
                self.ctx.finish(Outcome {
                    body: FCall::RCreate {
                        qid: file.qid(),
                        iounit: self.ctx.iounit,
                    },
                    fid: Some((self.ctx.fid, entry)),
                });
            }
            Err(e) => self.ctx.fail(e),
        }
    }
}

/// Handle given to [`Filesystem::setup`](crate::srv::Filesystem::setup)
/// before the server accepts connections.
#[derive(Debug)]
pub struct SetupContext {
    ns: Arc<Namespace>,
    owner: String,
}

impl SetupContext {
    pub(crate) fn new(ns: Arc<Namespace>, owner: &str) -> SetupContext {
        SetupContext {
            ns,
            owner: owner.to_owned(),
        }
    }

    pub fn root(&self) -> Result<File> {
        self.ns.root()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Register a new file inside `parent`, owned by the root's owner.
    pub fn add_file(&self, mode: u32, length: u64, name: &str, parent: &File) -> Result<File> {
        self.ns.add_child(parent, name, mode, length, &self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Arc<Namespace>, File) {
        let ns = Arc::new(Namespace::with_root("root", "sys", 0o777).unwrap());
        let root = ns.root().unwrap();
        let file = ns.add_child(&root, "f", 0o644, 0, "root").unwrap();
        (ns, file)
    }

    fn header(typ: MsgType, tag: u16) -> Header {
        Header { typ, tag }
    }

    #[test]
    fn read_respond_truncates() {
        let (ns, file) = fixture();
        let (ctx, mut rx) = Ctx::new(ns, header(MsgType::TRead, 3), 1, file, "glenda", 100);
        let read = ReadContext {
            ctx,
            offset: 0,
            count: 4,
        };
        assert_eq!(read.file().path(), "/f");
        read.respond(b"abcdefgh".to_vec());

        let outcome = rx.try_recv().unwrap();
        assert_eq!(
            outcome.body,
            FCall::RRead {
                data: Data(b"abcd".to_vec())
            }
        );
    }

    #[test]
    fn dropped_context_still_replies() {
        let (ns, file) = fixture();
        let (ctx, mut rx) = Ctx::new(ns, header(MsgType::TOpen, 9), 1, file, "glenda", 100);
        let mode = om::READ;
        drop(OpenContext { ctx, mode });

        let outcome = rx.try_recv().unwrap();
        assert_eq!(
            outcome.body,
            FCall::RError {
                ename: errstr::ENORESPONSE.to_owned()
            }
        );
        assert!(outcome.fid.is_none());
    }

    #[test]
    fn fail_carries_message() {
        let (ns, file) = fixture();
        let (ctx, mut rx) = Ctx::new(ns, header(MsgType::TRead, 1), 1, file, "glenda", 100);
        ReadContext {
            ctx,
            offset: 0,
            count: 1,
        }
        .fail("no data for you");

        let outcome = rx.try_recv().unwrap();
        assert_eq!(
            outcome.body,
            FCall::RError {
                ename: "no data for you".to_owned()
            }
        );
    }

    #[test]
    fn write_extends_length() {
        let (ns, file) = fixture();
        let (ctx, mut rx) =
            Ctx::new(ns.clone(), header(MsgType::TWrite, 1), 1, file, "glenda", 100);
        WriteContext {
            ctx,
            offset: 10,
            data: vec![0; 6],
        }
        .respond(100);

        assert_eq!(
            rx.try_recv().unwrap().body,
            FCall::RWrite { count: 6 }
        );
        let f = ns.lookup("/f").unwrap();
        assert_eq!(f.stat.length, 16);
        assert_eq!(f.stat.muid, "glenda");
        assert_eq!(f.qid().version, 1);
    }

    #[test]
    fn create_registers_and_binds() {
        let (ns, _) = fixture();
        let root = ns.root().unwrap();
        let (ctx, mut rx) =
            Ctx::new(ns.clone(), header(MsgType::TCreate, 1), 4, root, "glenda", 100);
        CreateContext {
            ctx,
            new_path: "/g".to_owned(),
            name: "g".to_owned(),
            perm: 0o600,
            mode: om::RDWR,
        }
        .respond(0);

        let outcome = rx.try_recv().unwrap();
        let g = ns.lookup("/g").unwrap();
        assert_eq!(
            outcome.body,
            FCall::RCreate {
                qid: g.qid(),
                iounit: 100
            }
        );
        let (fid, entry) = outcome.fid.unwrap();
        assert_eq!(fid, 4);
        assert_eq!(entry, FidEntry::opened("/g", om::RDWR));
        assert_eq!(g.stat.uid, "glenda");
        assert_eq!(g.stat.gid, "sys");
    }

    #[test]
    fn create_of_existing_name_fails() {
        let (ns, _) = fixture();
        let root = ns.root().unwrap();
        let header = header(MsgType::TCreate, 1);
        let (ctx, mut rx) = Ctx::new(ns.clone(), header, 4, root, "glenda", 100);
        CreateContext {
            ctx,
            new_path: "/f".to_owned(),
            name: "f".to_owned(),
            perm: 0o600,
            mode: om::RDWR,
        }
        .respond(0);

        let outcome = rx.try_recv().unwrap();
        assert_eq!(
            outcome.body,
            FCall::RError {
                ename: errstr::EEXIST.to_owned()
            }
        );
        assert!(outcome.fid.is_none());
    }

    #[test]
    fn late_create_does_not_mutate() {
        let (ns, _) = fixture();
        let root = ns.root().unwrap();
        let (ctx, rx) = Ctx::new(ns.clone(), header(MsgType::TCreate, 1), 4, root, "glenda", 100);
        drop(rx);
        CreateContext {
            ctx,
            new_path: "/late".to_owned(),
            name: "late".to_owned(),
            perm: 0o600,
            mode: om::RDWR,
        }
        .respond(0);
        assert!(!ns.contains("/late"));
    }

    #[test]
    fn setup_adds_files_owned_by_root_owner() {
        let (ns, _) = fixture();
        let setup = SetupContext::new(ns.clone(), "root");
        let root = setup.root().unwrap();
        let f = setup.add_file(0o444, 5, "motd", &root).unwrap();
        assert_eq!(f.stat.uid, "root");
        assert_eq!(setup.namespace().lookup("/motd").unwrap(), f);
    }
}
