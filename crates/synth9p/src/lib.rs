#![forbid(unsafe_code)]
//! Asynchronous 9P2000 file server library over a synthesized namespace.
//!
//! The server keeps the whole file tree in memory: names, qids, permissions
//! and lengths live in a [`vfs::Namespace`] shared by every connection. Host
//! code decides what the files contain by implementing [`srv::Filesystem`];
//! everything structural (walking, stat, renames, removal, directory
//! listings) is answered by the library.
//!
//! # Getting Started
//!
//! 1. Implement [`srv::Filesystem`]. Every method is optional.
//! 2. Populate the tree in [`srv::Filesystem::setup`] through the
//!    [`SetupContext`].
//! 3. Start the server with [`srv::srv_async`].
//!
//! # Example
//!
//! ```no_run
//! use synth9p::{dm, srv::{Config, Filesystem, srv_async}, ReadContext, Result, SetupContext};
//! use async_trait::async_trait;
//!
//! struct Motd;
//!
//! const TEXT: &[u8] = b"welcome\n";
//!
//! #[async_trait]
//! impl Filesystem for Motd {
//!     async fn setup(&self, ctx: &SetupContext) -> Result<()> {
//!         let root = ctx.root()?;
//!         let etc = ctx.add_file(dm::DIR | 0o755, 0, "etc", &root)?;
//!         ctx.add_file(0o444, TEXT.len() as u64, "motd", &etc)?;
//!         Ok(())
//!     }
//!
//!     async fn rread(&self, ctx: ReadContext) {
//!         let start = (ctx.offset() as usize).min(TEXT.len());
//!         ctx.respond(&TEXT[start..]);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config {
//!         addr: "tcp!127.0.0.1!5640".to_owned(),
//!         ..Default::default()
//!     };
//!     srv_async(Motd, config).await
//! }
//! ```
//!
//! # Replies
//!
//! Callbacks receive a context and finish it with `respond` or `fail`.
//! Both consume the context, so a request is answered at most once. A
//! context dropped unfinished, for example by a panicking callback, is
//! answered with an error. With [`srv::Config::reply_timeout`] set, a
//! callback which takes too long gets its request failed and its late
//! `respond` is ignored.
//!
//! # Fids
//!
//! Fids are per connection. Two connections may use the same fid numbers
//! for different files; only the namespace is shared.
//!
//! # Transport
//!
//! - **TCP**: `"tcp!host!port"` (e.g., `"tcp!0.0.0.0!564"`)
//! - **Unix Domain Sockets**: `"unix!path"` (e.g., `"unix!/tmp/9p.sock"`)
pub mod context;
pub mod error;
pub mod fcall;
pub mod serialize;
pub mod session;
pub mod srv;
#[macro_use]
pub mod utils;
pub mod vfs;

pub use crate::context::{CreateContext, OpenContext, ReadContext, SetupContext, WriteContext};
pub use crate::error::Error;
pub use crate::error::string as errstr;
pub use crate::fcall::*;
pub use crate::utils::Result;
pub use crate::vfs::{File, Namespace};
