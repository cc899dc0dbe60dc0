use crate::error;
use std::time::{SystemTime, UNIX_EPOCH};

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

/// Split a `proto!address[!port]` listen string.
///
/// `"tcp!0.0.0.0!564"` yields `("tcp", "0.0.0.0:564")` and
/// `"unix!/tmp/sock"` yields `("unix", "/tmp/sock")`.
pub fn parse_proto(arg: &str) -> Option<(&str, String)> {
    let mut split = arg.splitn(3, '!');
    let proto = split.next()?;
    let addr = split.next()?;

    match (proto, split.next()) {
        ("tcp", Some(port)) => Some((proto, format!("{}:{}", addr, port))),
        ("tcp", None) => None,
        (_, Some(suffix)) => Some((proto, format!("{}:{}", addr, suffix))),
        (_, None) => Some((proto, addr.to_owned())),
    }
}

/// Seconds since the epoch, as carried by `Stat.atime`/`Stat.mtime`.
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp_and_unix() {
        assert_eq!(
            parse_proto("tcp!0.0.0.0!9999"),
            Some(("tcp", "0.0.0.0:9999".to_owned()))
        );
        assert_eq!(
            parse_proto("unix!/tmp/synth9p.sock"),
            Some(("unix", "/tmp/synth9p.sock".to_owned()))
        );
        assert_eq!(parse_proto("tcp!localhost"), None);
        assert_eq!(parse_proto("garbage"), None);
    }
}
