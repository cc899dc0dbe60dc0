//! Asynchronous 9P2000 server over a synthesized namespace.
//!
//! The server owns the file tree ([`Namespace`]) and answers every structural
//! request itself: version, attach, walk, stat, wstat, clunk, remove and
//! directory reads. Only the contents of regular files and the creation of
//! new files are delegated to the host through [`Filesystem`].
//!
//! # Protocol
//! 9P2000

use {
    crate::{
        context::{
            CreateContext, Ctx, OpenContext, Outcome, ReadContext, SetupContext, WriteContext,
        },
        error::{Error, string::*},
        fcall::*,
        io_err,
        serialize::{self, Decoder, Encodable, Header},
        session::{FidEntry, Session},
        utils::{self, Result},
        vfs::{self, File, Namespace, ROOT},
    },
    async_trait::async_trait,
    bytes::BytesMut,
    futures::sink::SinkExt,
    log::{error, info, warn},
    std::{
        path::{Path, PathBuf},
        sync::{Arc, atomic::Ordering},
        time::Duration,
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, UnixListener},
        sync::oneshot,
    },
    tokio_stream::StreamExt,
    tokio_util::codec::length_delimited::LengthDelimitedCodec,
};

#[async_trait]
/// Host callbacks backing the contents of the namespace.
///
/// Every method has a default: `setup` does nothing and the request
/// callbacks answer "operation not supported". A callback finishes its
/// request by calling `respond` or `fail` on the context, possibly from
/// another task and at a later time.
///
/// # Example
/// ```no_run
/// use synth9p::{srv::{Filesystem, Config, srv_async}, OpenContext, ReadContext};
/// use async_trait::async_trait;
///
/// struct Hello;
///
/// #[async_trait]
/// impl Filesystem for Hello {
///     async fn ropen(&self, ctx: OpenContext) {
///         ctx.respond();
///     }
///
///     async fn rread(&self, ctx: ReadContext) {
///         let data = b"hello\n";
///         let start = (ctx.offset() as usize).min(data.len());
///         ctx.respond(&data[start..]);
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     srv_async(Hello, Config::default()).await.unwrap();
/// }
/// ```
pub trait Filesystem: Send + Sync + 'static {
    /// Seed the namespace before the first connection is accepted.
    async fn setup(&self, _ctx: &SetupContext) -> Result<()> {
        Ok(())
    }

    /// Open of a regular file.
    async fn ropen(&self, ctx: OpenContext) {
        ctx.fail_with(Error::NotSupported)
    }

    async fn rread(&self, ctx: ReadContext) {
        ctx.fail_with(Error::NotSupported)
    }

    async fn rwrite(&self, ctx: WriteContext) {
        ctx.fail_with(Error::NotSupported)
    }

    /// Creation of a file or directory. The name has been validated and does
    /// not exist yet.
    async fn rcreate(&self, ctx: CreateContext) {
        ctx.fail_with(Error::NotSupported)
    }
}

/// Server settings consumed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Listen address, `proto!address[!port]`
    pub addr: String,
    /// Largest message the server accepts or offers in `Rversion`
    pub msize: u32,
    pub root_owner: String,
    pub root_group: String,
    /// Permissions of `/`; the directory bit is always set
    pub root_mode: u32,
    /// How long a callback may take before the request fails
    pub reply_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: "tcp!0.0.0.0!9999".to_owned(),
            msize: 8192,
            root_owner: "root".to_owned(),
            root_group: "root".to_owned(),
            root_mode: dm::DIR | 0o777,
            reply_timeout: None,
        }
    }
}

/// A filesystem, its namespace and configuration, shared by all connections.
pub struct Server<Fs> {
    fs: Arc<Fs>,
    ns: Arc<Namespace>,
    config: Arc<Config>,
}

impl<Fs> Clone for Server<Fs> {
    fn clone(&self) -> Self {
        Server {
            fs: self.fs.clone(),
            ns: self.ns.clone(),
            config: self.config.clone(),
        }
    }
}

/// Cut an error string so that its `Rerror` fits in a frame of `msize` bytes.
fn fit_ename(mut ename: String, msize: u32) -> String {
    let limit = (msize as usize)
        .saturating_sub(HEADERSZ + 2)
        .min(u16::MAX as usize);
    if ename.len() > limit {
        let mut end = limit;
        while !ename.is_char_boundary(end) {
            end -= 1;
        }
        ename.truncate(end);
    }
    ename
}

/// Whether a wstat field asks for a change.
fn touches<T: PartialEq>(new: &T, cur: &T, keep: &T) -> bool {
    new != keep && new != cur
}

impl<Fs: Filesystem> Server<Fs> {
    /// Create the server and register the root directory.
    pub fn new(filesystem: Fs, config: Config) -> Result<Server<Fs>> {
        let ns = Namespace::with_root(&config.root_owner, &config.root_group, config.root_mode)?;
        Ok(Server {
            fs: Arc::new(filesystem),
            ns: Arc::new(ns),
            config: Arc::new(config),
        })
    }

    /// Run [`Filesystem::setup`].
    pub async fn setup(&self) -> Result<()> {
        let ctx = SetupContext::new(self.ns.clone(), &self.config.root_owner);
        self.fs.setup(&ctx).await
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve one connection until the peer goes away.
    ///
    /// Requests are answered one at a time and in order. Transport errors and
    /// frames whose header cannot be decoded end the connection with an error.
    /// Whichever way the connection ends, its remaining fids are clunked.
    pub async fn serve_conn<Reader, Writer>(&self, reader: Reader, writer: Writer) -> Result<()>
    where
        Reader: AsyncRead + Send + Unpin,
        Writer: AsyncWrite + Send + Unpin,
    {
        let mut session = Session::new(self.config.msize);
        let res = self.serve_frames(&mut session, reader, writer).await;
        self.release_all(session.clunk_all());
        res
    }

    async fn serve_frames<Reader, Writer>(
        &self,
        session: &mut Session,
        reader: Reader,
        writer: Writer,
    ) -> Result<()>
    where
        Reader: AsyncRead + Send + Unpin,
        Writer: AsyncWrite + Send + Unpin,
    {
        let mut framedread = LengthDelimitedCodec::builder()
            .length_field_offset(0)
            .length_field_length(4)
            .length_adjustment(-4)
            .little_endian()
            .max_frame_length(self.config.msize as usize)
            .new_read(reader);
        let mut framedwrite = LengthDelimitedCodec::builder()
            .length_field_offset(0)
            .length_field_length(4)
            .length_adjustment(-4)
            .little_endian()
            .max_frame_length(self.config.msize as usize)
            .new_write(writer);

        while let Some(bytes) = framedread.next().await {
            let bytes = bytes?;

            let mut d = Decoder::new(&bytes);
            let header = serialize::read_header(&mut d)?;

            let body = match serialize::read_body(header.typ, &mut d) {
                Ok(body) => {
                    let request = Msg {
                        tag: header.tag,
                        body,
                    };
                    info!("\t← {:?}", request);
                    self.dispatch_once(session, header, request.body).await
                }
                Err(e) => {
                    error!("{:?} tag {}: malformed request: {}", header.typ, header.tag, e);
                    FCall::RError { ename: e.ename() }
                }
            };

            let body = match body {
                FCall::RError { ename } => FCall::RError {
                    ename: fit_ename(ename, session.msize()),
                },
                body => body,
            };
            let response = Msg {
                tag: header.tag,
                body,
            };
            let mut buf = BytesMut::with_capacity(HEADERSZ);
            serialize::write_msg(&mut buf, &response);
            framedwrite.send(buf.freeze()).await?;
            info!("\t→ {:?}", response);
        }

        Ok(())
    }

    async fn dispatch_once(&self, session: &mut Session, header: Header, body: FCall) -> FCall {
        self.reply(session, header, body).await.unwrap_or_else(|e| {
            error!("{:?}: Error: \"{}\": {:?}", header.typ, e, e);
            FCall::RError { ename: e.ename() }
        })
    }

    #[rustfmt::skip]
    async fn reply(&self, session: &mut Session, header: Header, body: FCall) -> Result<FCall> {
        use crate::FCall::*;

        match body {
            TVersion { msize, ref version }                 => Ok(self.rversion(session, msize, version)),
            TAuth { .. }                                    => Err(Error::No(ENOAUTH)),
            TAttach { fid, afid, uname, aname: _ }          => self.rattach(session, fid, afid, uname),
            TFlush { oldtag: _ }                            => Ok(RFlush),
            TWalk { fid, newfid, ref wnames }               => self.rwalk(session, fid, newfid, wnames),
            TOpen { fid, mode }                             => self.ropen(session, header, fid, mode).await,
            TCreate { fid, name, perm, mode }               => self.rcreate(session, header, fid, name, perm, mode).await,
            TRead { fid, offset, count }                    => self.rread(session, header, fid, offset, count).await,
            TWrite { fid, offset, data }                    => self.rwrite(session, header, fid, offset, data.0).await,
            TClunk { fid }                                  => self.rclunk(session, fid),
            TRemove { fid }                                 => self.rremove(session, fid),
            TStat { fid }                                   => Ok(RStat { stat: self.resolve(session, fid)?.1.stat }),
            TWStat { fid, ref stat }                        => self.rwstat(session, fid, stat),
            _                                               => Err(Error::No(EBADMSG)),
        }
    }

    /// The session entry of `fid` and the file it is bound to.
    fn resolve(&self, session: &Session, fid: u32) -> Result<(FidEntry, File)> {
        let entry = session.entry(fid)?.clone();
        let file = self.ns.lookup(&entry.path)?;
        Ok((entry, file))
    }

    fn context(
        &self,
        session: &Session,
        header: Header,
        fid: u32,
        file: File,
    ) -> (Ctx, oneshot::Receiver<Outcome>) {
        Ctx::new(
            self.ns.clone(),
            header,
            fid,
            file,
            session.uname(),
            session.iounit(),
        )
    }

    /// Wait for a callback to finish its context and apply its fid update.
    async fn await_reply(
        &self,
        session: &mut Session,
        header: Header,
        rx: oneshot::Receiver<Outcome>,
    ) -> Result<FCall> {
        let received = match self.config.reply_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!("{:?} tag {}: no reply within {:?}", header.typ, header.tag, limit);
                    return Err(Error::No(ETIMEDOUT));
                }
            },
            None => rx.await,
        };

        let outcome = received.map_err(|_| Error::No(ENORESPONSE))?;
        if let Some((fid, entry)) = outcome.fid {
            session.install(fid, entry);
        }
        Ok(outcome.body)
    }

    fn rversion(&self, session: &mut Session, msize: u32, version: &str) -> FCall {
        let msize = msize.min(self.config.msize);
        self.release_all(session.reset(msize));

        let version = if version.starts_with(P92000) {
            P92000
        } else {
            VERSION_UNKNOWN
        };
        FCall::RVersion {
            msize,
            version: version.to_owned(),
        }
    }

    fn rattach(&self, session: &mut Session, fid: u32, afid: u32, uname: String) -> Result<FCall> {
        if afid != NOFID {
            return Err(Error::No(ENOAUTH));
        }
        if session.contains(fid) {
            return Err(Error::No(EINUSE));
        }

        let root = self.ns.root()?;
        session.set_uname(uname);
        session.bind_fid(fid, ROOT);
        Ok(FCall::RAttach { qid: root.qid() })
    }

    fn walk_one(&self, from: &File, name: &str) -> Result<File> {
        if !from.is_dir() {
            return Err(Error::No(ENOTDIR));
        }
        match name {
            "." => Ok(from.clone()),
            ".." => self.ns.lookup(from.parent().unwrap_or(ROOT)),
            _ if vfs::valid_name(name) => self.ns.lookup(&vfs::child_path(from.path(), name)),
            _ => Err(Error::No(EBADNAME)),
        }
    }

    fn rwalk(
        &self,
        session: &mut Session,
        fid: u32,
        newfid: u32,
        wnames: &[String],
    ) -> Result<FCall> {
        let (entry, mut file) = self.resolve(session, fid)?;
        if entry.mode.is_open() {
            return Err(Error::No(EOPEN));
        }
        if newfid != fid && session.contains(newfid) {
            return Err(Error::No(EINUSE));
        }
        if wnames.len() > MAXWELEM {
            return Err(Error::No(ETOOLONG));
        }

        let mut wqids = Vec::with_capacity(wnames.len());
        for name in wnames {
            match self.walk_one(&file, name) {
                Ok(next) => {
                    wqids.push(next.qid());
                    file = next;
                }
                Err(e) if wqids.is_empty() => return Err(e),
                Err(_) => return Ok(FCall::RWalk { wqids }),
            }
        }

        session.bind_fid(newfid, file.path());
        Ok(FCall::RWalk { wqids })
    }

    async fn ropen(
        &self,
        session: &mut Session,
        header: Header,
        fid: u32,
        mode: u8,
    ) -> Result<FCall> {
        let (entry, file) = self.resolve(session, fid)?;
        if entry.mode.is_open() {
            return Err(Error::No(EOPEN));
        }

        if file.is_dir() {
            let access = mode & 3;
            if (access != om::READ && access != om::EXEC) || mode & om::TRUNC != 0 {
                return Err(Error::No(EISDIR));
            }
            session.install(fid, FidEntry::opened(file.path(), mode));
            return Ok(FCall::ROpen {
                qid: file.qid(),
                iounit: session.iounit(),
            });
        }

        let (ctx, rx) = self.context(session, header, fid, file);
        let ctx = OpenContext { ctx, mode };
        let fs = self.fs.clone();
        tokio::spawn(async move { fs.ropen(ctx).await });
        self.await_reply(session, header, rx).await
    }

    async fn rcreate(
        &self,
        session: &mut Session,
        header: Header,
        fid: u32,
        name: String,
        perm: u32,
        mode: u8,
    ) -> Result<FCall> {
        let (entry, dir) = self.resolve(session, fid)?;
        if entry.mode.is_open() {
            return Err(Error::No(EOPEN));
        }
        if !dir.is_dir() {
            return Err(Error::No(ENOTDIR));
        }
        if !vfs::valid_name(&name) {
            return Err(Error::No(EBADNAME));
        }
        let new_path = vfs::child_path(dir.path(), &name);
        if self.ns.contains(&new_path) {
            return Err(Error::DuplicatePath(new_path));
        }

        let (ctx, rx) = self.context(session, header, fid, dir);
        let ctx = CreateContext {
            ctx,
            new_path,
            name,
            perm,
            mode,
        };
        let fs = self.fs.clone();
        tokio::spawn(async move { fs.rcreate(ctx).await });
        self.await_reply(session, header, rx).await
    }

    /// Packed stats of the children of `dir`, starting at the entry which
    /// begins at `offset` and never splitting an entry.
    fn read_dir(&self, dir: &File, offset: u64, count: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut pos = 0u64;

        for child in self.ns.children(dir.path()) {
            let len = child.stat.size() as u64 + 2;
            if pos >= offset {
                if buf.len() as u64 + len > count as u64 {
                    break;
                }
                child.stat.encode(&mut buf);
            }
            pos += len;
        }
        buf
    }

    async fn rread(
        &self,
        session: &mut Session,
        header: Header,
        fid: u32,
        offset: u64,
        count: u32,
    ) -> Result<FCall> {
        let (entry, file) = self.resolve(session, fid)?;
        if !entry.mode.is_open() {
            return Err(Error::No(ENOTOPEN));
        }
        if !entry.mode.readable() {
            return Err(Error::No(EBADUSE));
        }

        let count = count.min(session.iounit());
        if file.is_dir() {
            let data = self.read_dir(&file, offset, count);
            return Ok(FCall::RRead { data: Data(data) });
        }

        let (ctx, rx) = self.context(session, header, fid, file);
        let ctx = ReadContext { ctx, offset, count };
        let fs = self.fs.clone();
        tokio::spawn(async move { fs.rread(ctx).await });
        self.await_reply(session, header, rx).await
    }

    async fn rwrite(
        &self,
        session: &mut Session,
        header: Header,
        fid: u32,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<FCall> {
        let (entry, file) = self.resolve(session, fid)?;
        if !entry.mode.is_open() {
            return Err(Error::No(ENOTOPEN));
        }
        if file.is_dir() {
            return Err(Error::No(EISDIR));
        }
        if !entry.mode.writable() {
            return Err(Error::No(EBADUSE));
        }

        let (ctx, rx) = self.context(session, header, fid, file);
        let ctx = WriteContext { ctx, offset, data };
        let fs = self.fs.clone();
        tokio::spawn(async move { fs.rwrite(ctx).await });
        self.await_reply(session, header, rx).await
    }

    /// Drop a clunked fid, removing its file if it was opened with `ORCLOSE`.
    fn release(&self, entry: FidEntry) {
        if entry.rclose {
            if let Err(e) = self.ns.remove(&entry.path) {
                warn!("remove-on-close of {} failed: {}", entry.path, e);
            }
        }
    }

    /// Release several fids at once, deepest paths first so that a
    /// directory is emptied before its own removal is tried.
    fn release_all(&self, mut entries: Vec<FidEntry>) {
        entries.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        for entry in entries {
            self.release(entry);
        }
    }

    fn rclunk(&self, session: &mut Session, fid: u32) -> Result<FCall> {
        let entry = session.clunk_fid(fid)?;
        self.release(entry);
        Ok(FCall::RClunk)
    }

    fn rremove(&self, session: &mut Session, fid: u32) -> Result<FCall> {
        let entry = session.clunk_fid(fid)?;
        self.ns.remove(&entry.path)?;
        Ok(FCall::RRemove)
    }

    fn rwstat(&self, session: &mut Session, fid: u32, stat: &Stat) -> Result<FCall> {
        let (_, file) = self.resolve(session, fid)?;
        let cur = &file.stat;
        let keep = Stat::dont_touch();

        if touches(&stat.typ, &cur.typ, &keep.typ)
            || touches(&stat.dev, &cur.dev, &keep.dev)
            || touches(&stat.qid, &cur.qid, &keep.qid)
            || touches(&stat.atime, &cur.atime, &keep.atime)
            || touches(&stat.uid, &cur.uid, &keep.uid)
            || touches(&stat.muid, &cur.muid, &keep.muid)
        {
            return Err(Error::No(EWSTAT));
        }
        if touches(&stat.mode, &cur.mode, &keep.mode) && (stat.mode ^ cur.mode) & dm::DIR != 0 {
            return Err(Error::No(EBADMODE));
        }
        if touches(&stat.length, &cur.length, &keep.length) && file.is_dir() {
            return Err(Error::No(EISDIR));
        }

        let mut path = file.path().to_owned();
        if touches(&stat.name, &cur.name, &keep.name) {
            let renamed = self.ns.rename(&path, &stat.name)?;
            session.rename_path(&path, renamed.path());
            path = renamed.path().to_owned();
        }

        self.ns.update(&path, |s| {
            if stat.mode != keep.mode {
                s.mode = stat.mode;
            }
            if stat.mtime != keep.mtime {
                s.mtime = stat.mtime;
            }
            if stat.length != keep.length {
                s.length = stat.length;
            }
            if !stat.gid.is_empty() {
                s.gid = stat.gid.clone();
            }
        })?;
        Ok(FCall::RWStat)
    }
}

async fn srv_async_tcp<Fs: Filesystem>(server: Server<Fs>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on tcp {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {:?}", peer);

        let server = server.clone();
        tokio::spawn(async move {
            let (readhalf, writehalf) = stream.into_split();
            let res = server.serve_conn(readhalf, writehalf).await;
            if let Err(e) = res {
                error!("Error: {}: {:?}", e, e);
            }
        });
    }
}

struct DeleteOnDrop {
    path: PathBuf,
    listener: UnixListener,
}

impl DeleteOnDrop {
    fn bind(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_owned();
        UnixListener::bind(&path).map(|listener| DeleteOnDrop { path, listener })
    }
}

impl std::ops::Deref for DeleteOnDrop {
    type Target = UnixListener;

    fn deref(&self) -> &Self::Target {
        &self.listener
    }
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove socket file {:?}: {}", self.path, e);
        }
    }
}

async fn srv_async_unix<Fs: Filesystem>(server: Server<Fs>, addr: impl AsRef<Path>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let listener = DeleteOnDrop::bind(addr)?;
    info!("listening on unix {:?}", listener.path);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    {
        let running = running.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = result?;
                info!("accepted: {:?}", peer);

                let server = server.clone();
                tokio::spawn(async move {
                    let (readhalf, writehalf) = tokio::io::split(stream);
                    if let Err(e) = server.serve_conn(readhalf, writehalf).await {
                        error!("Error: {:?}", e);
                    }
                });
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Run `setup` and serve `filesystem` on `config.addr` (`tcp!host!port` or
/// `unix!path`), one task per connection.
pub async fn srv_async<Fs: Filesystem>(filesystem: Fs, config: Config) -> Result<()> {
    let addr = config.addr.clone();
    let (proto, listen_addr) = utils::parse_proto(&addr)
        .ok_or_else(|| io_err!(InvalidInput, "Invalid protocol or address"))?;

    let server = Server::new(filesystem, config)?;
    server.setup().await?;

    match proto {
        "tcp" => srv_async_tcp(server, &listen_addr).await,
        "unix" => srv_async_unix(server, &listen_addr).await,
        _ => Err(From::from(io_err!(InvalidInput, "Protocol not supported"))),
    }
}
