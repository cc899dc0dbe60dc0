use {
    async_trait::async_trait,
    clap::Parser,
    log::debug,
    std::{
        collections::HashMap,
        sync::{Mutex, PoisonError},
        time::Duration,
    },
    synth9p::{
        srv::{Config, Filesystem, srv_async},
        *,
    },
};

const GREETING: &[u8] = b"Hello from ramfs\n";

/// Largest file ramfs keeps in memory.
const MAX_FILE_SIZE: u64 = 64 << 20;

/// Contents of regular files, keyed by qid path so renames keep them.
#[derive(Default)]
struct Ramfs {
    contents: Mutex<HashMap<u64, Vec<u8>>>,
}

/// Bytes `offset..offset+count` of a file whose recorded length is `length`.
///
/// The recorded length wins over the stored bytes: a file extended by wstat
/// reads back zeros, one shortened by wstat loses its tail.
fn window(content: &[u8], length: u64, offset: u64, count: u32) -> Vec<u8> {
    let end = length.min(offset.saturating_add(count as u64));
    if offset >= end {
        return Vec::new();
    }

    let mut out = vec![0u8; (end - offset) as usize];
    let start = offset as usize;
    if start < content.len() {
        let avail = &content[start..content.len().min(end as usize)];
        out[..avail.len()].copy_from_slice(avail);
    }
    out
}

/// Write `data` at `offset`, zero filling any gap.
///
/// A write ending past [`MAX_FILE_SIZE`] is refused and leaves `content`
/// untouched.
fn splice(content: &mut Vec<u8>, offset: u64, data: &[u8]) -> bool {
    let end = match offset.checked_add(data.len() as u64) {
        Some(end) if end <= MAX_FILE_SIZE => end as usize,
        _ => return false,
    };
    let start = offset as usize;
    if content.len() < end {
        content.resize(end, 0);
    }
    content[start..end].copy_from_slice(data);
    true
}

impl Ramfs {
    fn with_contents<T>(&self, f: impl FnOnce(&mut HashMap<u64, Vec<u8>>) -> T) -> T {
        let mut contents = self.contents.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut contents)
    }
}

#[async_trait]
impl Filesystem for Ramfs {
    async fn setup(&self, ctx: &SetupContext) -> Result<()> {
        let root = ctx.root()?;
        let hello = ctx.add_file(0o644, GREETING.len() as u64, "hello", &root)?;
        ctx.add_file(dm::DIR | 0o777, 0, "tmp", &root)?;

        self.with_contents(|c| c.insert(hello.qid().path, GREETING.to_vec()));
        Ok(())
    }

    async fn ropen(&self, ctx: OpenContext) {
        if ctx.mode() & om::TRUNC != 0 {
            let qid = ctx.file().qid();
            self.with_contents(|c| c.remove(&qid.path));
        }
        ctx.respond();
    }

    async fn rread(&self, ctx: ReadContext) {
        let file = ctx.file();
        let data = self.with_contents(|c| {
            let content = c
                .get(&file.qid().path)
                .map(Vec::as_slice)
                .unwrap_or_default();
            window(content, file.stat.length, ctx.offset(), ctx.count())
        });
        ctx.respond(data);
    }

    async fn rwrite(&self, ctx: WriteContext) {
        let qid = ctx.file().qid();
        let (offset, data) = (ctx.offset(), ctx.data());
        let stored = self.with_contents(|c| splice(c.entry(qid.path).or_default(), offset, data));
        if !stored {
            return ctx.fail(errstr::EFBIG);
        }
        debug!("{}: {} bytes at {}", ctx.file().path(), data.len(), offset);
        let count = data.len() as u32;
        ctx.respond(count);
    }

    async fn rcreate(&self, ctx: CreateContext) {
        ctx.respond(0);
    }
}

#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port
    /// where: proto = tcp | unix
    #[arg(default_value = "tcp!0.0.0.0!9999")]
    address: String,

    /// Largest message size offered to clients
    #[arg(long, default_value_t = 8192)]
    msize: u32,

    /// Owner of the root directory
    #[arg(long, default_value = "root")]
    owner: String,

    /// Group of the root directory
    #[arg(long, default_value = "root")]
    group: String,

    /// Fail requests the filesystem has not answered after this many milliseconds
    #[arg(long)]
    reply_timeout_ms: Option<u64>,
}

impl Cli {
    fn config(self) -> Config {
        Config {
            addr: self.address,
            msize: self.msize,
            root_owner: self.owner,
            root_group: self.group,
            reply_timeout: self.reply_timeout_ms.map(Duration::from_millis),
            ..Default::default()
        }
    }
}

async fn ramfs_main(cli: Cli) -> synth9p::Result<i32> {
    let config = cli.config();

    println!("[*] Ready to accept clients: {}", config.addr);
    srv_async(Ramfs::default(), config).await.and(Ok(0))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = ramfs_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}
