//! 9P error representations.
//!
//! In 9P2000, errors are reported to the client as a human-readable string
//! carried by `Rerror`. [`Error::ename`] produces that string; the strings in
//! [`string`] follow the wording used by Plan 9 file servers so that clients
//! such as Linux v9fs can map them back to an errno.

use std::{fmt, io};

/// Canonical Plan 9 error strings
pub mod string {
    pub const EPERM: &str = "permission denied";
    pub const ENOENT: &str = "file does not exist";
    pub const EEXIST: &str = "file already exists";
    pub const EBADFID: &str = "fid unknown or out of range";
    pub const EINUSE: &str = "fid already in use";
    pub const ENOTDIR: &str = "not a directory";
    pub const EISDIR: &str = "is a directory";
    pub const EOPEN: &str = "file already open for I/O";
    pub const ENOTOPEN: &str = "file not open for I/O";
    pub const EBADUSE: &str = "bad use of fid";
    pub const ENOTEMPTY: &str = "directory is not empty";
    pub const EBADNAME: &str = "illegal name";
    pub const EBADMODE: &str = "illegal mode";
    pub const ETOOLONG: &str = "too many wnames in walk";
    pub const EWSTAT: &str = "wstat prohibited";
    pub const ENOAUTH: &str = "authentication not required";
    pub const EBADMSG: &str = "unknown or illegal message type";
    pub const ENOTSUP: &str = "operation not supported";
    pub const ENORESPONSE: &str = "file server did not reply";
    pub const ETIMEDOUT: &str = "request timed out";
    pub const EFBIG: &str = "file too large";
}

/// The error type used throughout this crate.
#[derive(Debug)]
pub enum Error {
    /// A field needed more bytes than the buffer had left.
    ShortBuffer { needed: usize, remaining: usize },
    /// The frame carried a type code which is not a 9P2000 message.
    UnknownMessageType(u8),
    /// The declared frame size disagrees with the bytes consumed.
    FrameLengthMismatch { declared: u32, actual: usize },
    /// A string field was not valid UTF-8.
    InvalidUtf8,
    /// The fid was never bound on this connection.
    UnknownFid(u32),
    /// No file is registered under the path.
    NotFound(String),
    /// A file is already registered under the path.
    DuplicatePath(String),
    /// The parent passed to `add_file` does not own the path.
    InvalidParent(String),
    /// No callback is registered for the operation.
    NotSupported,
    /// A protocol-level failure with one of the strings in [`string`].
    No(&'static str),
    /// A failure raised by application code through a context's `fail`.
    App(String),
    /// Transport failure.
    Io(io::Error),
}

impl Error {
    /// The string sent to the client in `Rerror`.
    pub fn ename(&self) -> String {
        match *self {
            Error::UnknownFid(_) => string::EBADFID.to_owned(),
            Error::NotFound(_) => string::ENOENT.to_owned(),
            Error::DuplicatePath(_) => string::EEXIST.to_owned(),
            Error::NotSupported => string::ENOTSUP.to_owned(),
            Error::No(s) => s.to_owned(),
            Error::App(ref s) => s.clone(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ShortBuffer { needed, remaining } => write!(
                f,
                "short buffer: needed {} bytes, {} remaining",
                needed, remaining
            ),
            Error::UnknownMessageType(typ) => write!(f, "unknown message type {}", typ),
            Error::FrameLengthMismatch { declared, actual } => write!(
                f,
                "frame length mismatch: declared {}, actual {}",
                declared, actual
            ),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
            Error::UnknownFid(fid) => write!(f, "{}: {}", string::EBADFID, fid),
            Error::NotFound(ref path) => write!(f, "{}: {}", string::ENOENT, path),
            Error::DuplicatePath(ref path) => write!(f, "{}: {}", string::EEXIST, path),
            Error::InvalidParent(ref path) => write!(f, "invalid parent for {}", path),
            Error::NotSupported => write!(f, "{}", string::ENOTSUP),
            Error::No(s) => write!(f, "{}", s),
            Error::App(ref s) => write!(f, "{}", s),
            Error::Io(ref e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ename_uses_canonical_strings() {
        assert_eq!(Error::UnknownFid(7).ename(), string::EBADFID);
        assert_eq!(Error::NotFound("/a".into()).ename(), string::ENOENT);
        assert_eq!(Error::DuplicatePath("/a".into()).ename(), string::EEXIST);
        assert_eq!(Error::App("disk on fire".into()).ename(), "disk on fire");
    }

    #[test]
    fn display_carries_details() {
        let e = Error::ShortBuffer {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(e.to_string(), "short buffer: needed 4 bytes, 1 remaining");
    }
}
