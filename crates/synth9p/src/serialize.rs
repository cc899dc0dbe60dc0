//! Serialize/deserialize 9P messages into/from binary.
//!
//! Decoding runs over an explicit cursor ([`Decoder`]) on an immutable buffer:
//! every read is bounds checked and a truncated field is reported as
//! [`Error::ShortBuffer`]. Encoding writes into any [`BufMut`] and cannot fail.

use crate::{error::Error, fcall::*, utils::Result};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use std::mem;
use std::ops::Shl;

macro_rules! decode {
    ($decoder:expr) => {
        $decoder.decode()?
    };

    ($typ:ident, $decoder:expr) => {
        $typ::from_bits_retain(decode!($decoder))
    };
}

/// A wrapper of BufMut to provide operator overloads for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: BufMut> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> usize {
        let bytes = data.encode(&mut self.writer);
        self.bytes += bytes;
        bytes
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<'a, T: Encodable, W: BufMut> Shl<&'a T> for Encoder<W> {
    type Output = Encoder<W>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        self.encode(rhs);
        self
    }
}

/// Read cursor over a received frame
///
/// Holds the buffer and the current position; the buffer itself is never
/// modified.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to consume
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes from the front.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::ShortBuffer {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(self)
    }

    /// Fail unless every byte was consumed.
    ///
    /// `overhead` is the number of framing bytes in front of the buffer, so
    /// that the error reports sizes as they appeared on the wire.
    pub fn finish(&self, overhead: usize) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::FrameLengthMismatch {
                declared: (self.buf.len() + overhead) as u32,
                actual: self.pos + overhead,
            })
        }
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: BufMut>(&self, w: &mut W) -> usize;
}

impl Encodable for u8 {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        w.put_u8(*self);
        mem::size_of::<Self>()
    }
}

impl Encodable for u16 {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        w.put_u16_le(*self);
        mem::size_of::<Self>()
    }
}

impl Encodable for u32 {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        w.put_u32_le(*self);
        mem::size_of::<Self>()
    }
}

impl Encodable for u64 {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        w.put_u64_le(*self);
        mem::size_of::<Self>()
    }
}

impl Encodable for String {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        let bytes = (self.len() as u16).encode(w);
        w.put_slice(self.as_bytes());
        bytes + self.len()
    }
}

impl Encodable for QId {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        (Encoder::new(w) << &self.typ.bits() << &self.version << &self.path).bytes_written()
    }
}

impl Encodable for Stat {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        (Encoder::new(w)
            << &self.size()
            << &self.typ
            << &self.dev
            << &self.qid
            << &self.mode
            << &self.atime
            << &self.mtime
            << &self.length
            << &self.name
            << &self.uid
            << &self.gid
            << &self.muid)
            .bytes_written()
    }
}

impl Encodable for Data {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        let size = self.0.len();
        let bytes = (size as u32).encode(w) + size;
        w.put_slice(&self.0);
        bytes
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        self.iter()
            .fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s)
            .bytes_written()
    }
}

/// `n[2] stat[n]` as carried by `RStat` and `TWStat`
struct WireStat<'a>(&'a Stat);

impl Encodable for WireStat<'_> {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        let n = self.0.size() + mem::size_of::<u16>() as u16;
        (Encoder::new(w) << &n << self.0).bytes_written()
    }
}

impl Encodable for Msg {
    fn encode<W: BufMut>(&self, w: &mut W) -> usize {
        use crate::FCall::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match self.body {
            TVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            RVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            TAuth {
                ref afid,
                ref uname,
                ref aname,
            } => buf << afid << uname << aname,
            RAuth { ref aqid } => buf << aqid,
            TAttach {
                ref fid,
                ref afid,
                ref uname,
                ref aname,
            } => buf << fid << afid << uname << aname,
            RAttach { ref qid } => buf << qid,
            RError { ref ename } => buf << ename,
            TFlush { ref oldtag } => buf << oldtag,
            RFlush => buf,
            TWalk {
                ref fid,
                ref newfid,
                ref wnames,
            } => buf << fid << newfid << wnames,
            RWalk { ref wqids } => buf << wqids,
            TOpen { ref fid, ref mode } => buf << fid << mode,
            ROpen {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TCreate {
                ref fid,
                ref name,
                ref perm,
                ref mode,
            } => buf << fid << name << perm << mode,
            RCreate {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TRead {
                ref fid,
                ref offset,
                ref count,
            } => buf << fid << offset << count,
            RRead { ref data } => buf << data,
            TWrite {
                ref fid,
                ref offset,
                ref data,
            } => buf << fid << offset << data,
            RWrite { ref count } => buf << count,
            TClunk { ref fid } => buf << fid,
            RClunk => buf,
            TRemove { ref fid } => buf << fid,
            RRemove => buf,
            TStat { ref fid } => buf << fid,
            RStat { ref stat } => buf << &WireStat(stat),
            TWStat { ref fid, ref stat } => buf << fid << &WireStat(stat),
            RWStat => buf,
        };

        buf.bytes_written()
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode(d: &mut Decoder<'_>) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        Ok(d.take(mem::size_of::<Self>())?[0])
    }
}

impl Decodable for u16 {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        Ok(LittleEndian::read_u16(d.take(mem::size_of::<Self>())?))
    }
}

impl Decodable for u32 {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        Ok(LittleEndian::read_u32(d.take(mem::size_of::<Self>())?))
    }
}

impl Decodable for u64 {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        Ok(LittleEndian::read_u64(d.take(mem::size_of::<Self>())?))
    }
}

impl Decodable for String {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let len: u16 = decode!(d);
        let bytes = d.take(len as usize)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8)
    }
}

impl Decodable for QId {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        Ok(QId {
            typ: decode!(QIdType, d),
            version: decode!(d),
            path: decode!(d),
        })
    }
}

impl Decodable for Stat {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let size: u16 = decode!(d);
        let mut s = Decoder::new(d.take(size as usize)?);
        let stat = Stat {
            typ: decode!(s),
            dev: decode!(s),
            qid: decode!(s),
            mode: decode!(s),
            atime: decode!(s),
            mtime: decode!(s),
            length: decode!(s),
            name: decode!(s),
            uid: decode!(s),
            gid: decode!(s),
            muid: decode!(s),
        };
        s.finish(mem::size_of::<u16>())?;
        Ok(stat)
    }
}

impl Decodable for Data {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let len: u32 = decode!(d);
        Ok(Data(d.take(len as usize)?.to_vec()))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let len: u16 = decode!(d);
        let mut buf = Vec::new();
        for _ in 0..len {
            buf.push(decode!(d));
        }
        Ok(buf)
    }
}

fn decode_wire_stat(d: &mut Decoder<'_>) -> Result<Stat> {
    let n: u16 = decode!(d);
    let mut s = Decoder::new(d.take(n as usize)?);
    let stat = decode!(s);
    s.finish(mem::size_of::<u16>())?;
    Ok(stat)
}

/// The part of a frame every message shares after `size[4]`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub typ: MsgType,
    pub tag: u16,
}

/// Decode `type[1] tag[2]`.
///
/// Fails with `UnknownMessageType` for type codes outside 9P2000.
pub fn read_header(d: &mut Decoder<'_>) -> Result<Header> {
    let raw: u8 = decode!(d);
    let typ = match MsgType::from_u8(raw) {
        Some(MsgType::TError) | None => return Err(Error::UnknownMessageType(raw)),
        Some(typ) => typ,
    };

    Ok(Header {
        typ,
        tag: decode!(d),
    })
}

/// Decode the payload following a header, consuming the rest of the frame.
pub fn read_body(typ: MsgType, d: &mut Decoder<'_>) -> Result<FCall> {
    use crate::MsgType::*;

    let body = match typ {
        TVersion => FCall::TVersion {
            msize: decode!(d),
            version: decode!(d),
        },
        RVersion => FCall::RVersion {
            msize: decode!(d),
            version: decode!(d),
        },
        TAuth => FCall::TAuth {
            afid: decode!(d),
            uname: decode!(d),
            aname: decode!(d),
        },
        RAuth => FCall::RAuth { aqid: decode!(d) },
        TAttach => FCall::TAttach {
            fid: decode!(d),
            afid: decode!(d),
            uname: decode!(d),
            aname: decode!(d),
        },
        RAttach => FCall::RAttach { qid: decode!(d) },
        RError => FCall::RError { ename: decode!(d) },
        TFlush => FCall::TFlush { oldtag: decode!(d) },
        RFlush => FCall::RFlush,
        TWalk => FCall::TWalk {
            fid: decode!(d),
            newfid: decode!(d),
            wnames: decode!(d),
        },
        RWalk => FCall::RWalk { wqids: decode!(d) },
        TOpen => FCall::TOpen {
            fid: decode!(d),
            mode: decode!(d),
        },
        ROpen => FCall::ROpen {
            qid: decode!(d),
            iounit: decode!(d),
        },
        TCreate => FCall::TCreate {
            fid: decode!(d),
            name: decode!(d),
            perm: decode!(d),
            mode: decode!(d),
        },
        RCreate => FCall::RCreate {
            qid: decode!(d),
            iounit: decode!(d),
        },
        TRead => FCall::TRead {
            fid: decode!(d),
            offset: decode!(d),
            count: decode!(d),
        },
        RRead => FCall::RRead { data: decode!(d) },
        TWrite => FCall::TWrite {
            fid: decode!(d),
            offset: decode!(d),
            data: decode!(d),
        },
        RWrite => FCall::RWrite { count: decode!(d) },
        TClunk => FCall::TClunk { fid: decode!(d) },
        RClunk => FCall::RClunk,
        TRemove => FCall::TRemove { fid: decode!(d) },
        RRemove => FCall::RRemove,
        TStat => FCall::TStat { fid: decode!(d) },
        RStat => FCall::RStat {
            stat: decode_wire_stat(d)?,
        },
        TWStat => FCall::TWStat {
            fid: decode!(d),
            stat: decode_wire_stat(d)?,
        },
        RWStat => FCall::RWStat,
        TError => return Err(Error::UnknownMessageType(TError as u8)),
    };

    d.finish(mem::size_of::<u32>())?;
    Ok(body)
}

impl Decodable for Msg {
    fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let header = read_header(d)?;
        let body = read_body(header.typ, d)?;

        Ok(Msg {
            tag: header.tag,
            body,
        })
    }
}

/// Helper function to read a 9P message from a frame with its `size[4]` stripped
pub fn read_msg(buf: &[u8]) -> Result<Msg> {
    Decoder::new(buf).decode()
}

/// Helper function to write a 9P message, without the `size[4]` field, into a buffer
pub fn write_msg<W: BufMut>(w: &mut W, msg: &Msg) -> usize {
    msg.encode(w)
}

/// Compose a complete frame: `size[4]` followed by the message.
pub fn compose(msg: &Msg) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADERSZ);
    buf.put_u32_le(0);
    let size = mem::size_of::<u32>() + write_msg(&mut buf, msg);
    LittleEndian::write_u32(&mut buf[..mem::size_of::<u32>()], size as u32);
    buf.freeze()
}

/// Parse a complete frame including its `size[4]` field.
pub fn parse(frame: &[u8]) -> Result<Msg> {
    let mut d = Decoder::new(frame);
    let declared: u32 = decode!(d);
    if declared as usize != frame.len() {
        return Err(Error::FrameLengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    read_msg(&frame[mem::size_of::<u32>()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stat() -> Stat {
        Stat {
            typ: 0,
            dev: 0,
            qid: QId {
                typ: QIdType::DIR,
                version: 3,
                path: 42,
            },
            mode: dm::DIR | 0o755,
            atime: 1_700_000_000,
            mtime: 1_700_000_001,
            length: 0,
            name: "lib".to_owned(),
            uid: "glenda".to_owned(),
            gid: "sys".to_owned(),
            muid: "glenda".to_owned(),
        }
    }

    #[test]
    fn encoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut encoder = Vec::new();
        for i in 0..10 {
            (i as u8).encode(&mut encoder);
        }
        assert_eq!(expected, encoder);
    }

    #[test]
    fn decoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut decoder = Decoder::new(&expected);
        let mut actual: Vec<u8> = Vec::new();
        while let Ok(i) = decoder.decode() {
            actual.push(i);
        }
        assert_eq!(expected, actual);
        assert!(decoder.is_empty());
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        0x0102u16.encode(&mut buf);
        0x03040506u32.encode(&mut buf);
        0x0708090a0b0c0d0eu64.encode(&mut buf);
        assert_eq!(
            buf,
            [2, 1, 6, 5, 4, 3, 0x0e, 0x0d, 0x0c, 0x0b, 0x0a, 9, 8, 7]
        );

        let mut d = Decoder::new(&buf);
        assert_eq!(d.decode::<u16>().unwrap(), 0x0102);
        assert_eq!(d.decode::<u32>().unwrap(), 0x03040506);
        assert_eq!(d.decode::<u64>().unwrap(), 0x0708090a0b0c0d0e);
    }

    #[test]
    fn short_fixed_width_fields_fail() {
        let buf = [0xffu8; 7];
        for len in 0..2 {
            let mut d = Decoder::new(&buf[..len]);
            assert!(matches!(
                d.decode::<u16>(),
                Err(Error::ShortBuffer { needed: 2, .. })
            ));
            assert_eq!(d.position(), 0);
        }
        for len in 0..4 {
            let mut d = Decoder::new(&buf[..len]);
            assert!(matches!(
                d.decode::<u32>(),
                Err(Error::ShortBuffer { needed: 4, remaining }) if remaining == len
            ));
        }
        let mut d = Decoder::new(&buf);
        assert!(matches!(
            d.decode::<u64>(),
            Err(Error::ShortBuffer {
                needed: 8,
                remaining: 7
            })
        ));
        assert!(matches!(
            Decoder::new(&[]).decode::<u8>(),
            Err(Error::ShortBuffer { .. })
        ));
    }

    #[test]
    fn short_string_fails() {
        // declares 5 bytes, carries 3
        let buf = [5u8, 0, b'a', b'b', b'c'];
        let mut d = Decoder::new(&buf);
        assert!(matches!(
            d.decode::<String>(),
            Err(Error::ShortBuffer {
                needed: 5,
                remaining: 3
            })
        ));

        let mut d = Decoder::new(&buf[..1]);
        assert!(matches!(
            d.decode::<String>(),
            Err(Error::ShortBuffer { needed: 2, .. })
        ));
    }

    #[test]
    fn string_is_length_prefixed_without_terminator() {
        let mut buf = Vec::new();
        "foo".to_owned().encode(&mut buf);
        assert_eq!(buf, [3, 0, b'f', b'o', b'o']);

        let bad = [2u8, 0, 0xc3, 0x28];
        assert!(matches!(
            Decoder::new(&bad).decode::<String>(),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn create_request_scenario() {
        let msg = Msg {
            tag: 7,
            body: FCall::TCreate {
                fid: 1,
                name: "foo".to_owned(),
                perm: 0o755,
                mode: 0,
            },
        };

        let frame = compose(&msg);
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            21, 0, 0, 0,            // size
            114,                    // Tcreate
            7, 0,                   // tag
            1, 0, 0, 0,             // fid
            3, 0, b'f', b'o', b'o', // name
            0xed, 0x01, 0, 0,       // perm
            0,                      // mode
        ];
        assert_eq!(&frame[..], &expected[..]);

        let decoded = parse(&frame).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(compose(&decoded), frame);
    }

    #[test]
    fn create_response_layout() {
        let msg = Msg {
            tag: 7,
            body: FCall::RCreate {
                qid: QId {
                    typ: QIdType::FILE,
                    version: 0,
                    path: 9,
                },
                iounit: 8168,
            },
        };
        let frame = compose(&msg);
        // size[4] Rcreate tag[2] qid[13] iounit[4]
        assert_eq!(frame.len(), 4 + 1 + 2 + 13 + 4);
        assert_eq!(frame[4], MsgType::RCreate as u8);
        assert_eq!(parse(&frame).unwrap(), msg);
    }

    #[test]
    fn every_variant_round_trips() {
        let qid = QId {
            typ: QIdType::FILE,
            version: 1,
            path: 0xdead_beef,
        };
        let bodies = vec![
            FCall::TVersion {
                msize: 8192,
                version: P92000.to_owned(),
            },
            FCall::RVersion {
                msize: 8192,
                version: VERSION_UNKNOWN.to_owned(),
            },
            FCall::TAuth {
                afid: 3,
                uname: "glenda".to_owned(),
                aname: String::new(),
            },
            FCall::RAuth { aqid: qid },
            FCall::TAttach {
                fid: 0,
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: "/".to_owned(),
            },
            FCall::RAttach { qid },
            FCall::RError {
                ename: "file does not exist".to_owned(),
            },
            FCall::TFlush { oldtag: 3 },
            FCall::RFlush,
            FCall::TWalk {
                fid: 0,
                newfid: 1,
                wnames: vec!["usr".to_owned(), "glenda".to_owned()],
            },
            FCall::RWalk {
                wqids: vec![qid, qid],
            },
            FCall::TOpen {
                fid: 1,
                mode: om::RDWR | om::TRUNC,
            },
            FCall::ROpen { qid, iounit: 8168 },
            FCall::TCreate {
                fid: 1,
                name: "new".to_owned(),
                perm: dm::DIR | 0o775,
                mode: om::READ,
            },
            FCall::RCreate { qid, iounit: 0 },
            FCall::TRead {
                fid: 1,
                offset: 1 << 40,
                count: 512,
            },
            FCall::RRead {
                data: Data(b"hello".to_vec()),
            },
            FCall::TWrite {
                fid: 1,
                offset: 5,
                data: Data(vec![0, 1, 2, 3]),
            },
            FCall::RWrite { count: 4 },
            FCall::TClunk { fid: 1 },
            FCall::RClunk,
            FCall::TRemove { fid: 1 },
            FCall::RRemove,
            FCall::TStat { fid: 1 },
            FCall::RStat {
                stat: sample_stat(),
            },
            FCall::TWStat {
                fid: 1,
                stat: Stat::dont_touch(),
            },
            FCall::RWStat,
        ];

        for body in bodies {
            let msg = Msg { tag: 0xbeef, body };
            let frame = compose(&msg);
            let decoded = parse(&frame).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(compose(&decoded), frame);
        }
    }

    #[test]
    fn rstat_carries_outer_and_inner_size() {
        let stat = sample_stat();
        let frame = compose(&Msg {
            tag: 1,
            body: FCall::RStat { stat: stat.clone() },
        });
        let n = LittleEndian::read_u16(&frame[7..9]);
        let size = LittleEndian::read_u16(&frame[9..11]);
        assert_eq!(n, stat.size() + 2);
        assert_eq!(size, stat.size());
        assert_eq!(frame.len(), 7 + 2 + n as usize);
    }

    #[test]
    fn truncated_payload_is_short_buffer() {
        let frame = compose(&Msg {
            tag: 2,
            body: FCall::TCreate {
                fid: 1,
                name: "foo".to_owned(),
                perm: 0,
                mode: 0,
            },
        });
        // drop the mode byte, keep the header intact
        let body = &frame[4..frame.len() - 1];
        let mut d = Decoder::new(body);
        let header = read_header(&mut d).unwrap();
        assert_eq!(header.tag, 2);
        assert!(matches!(
            read_body(header.typ, &mut d),
            Err(Error::ShortBuffer { needed: 1, remaining: 0 })
        ));
    }

    #[test]
    fn unknown_type_and_trailing_bytes() {
        assert!(matches!(
            read_msg(&[99, 1, 0]),
            Err(Error::UnknownMessageType(99))
        ));
        assert!(matches!(
            read_msg(&[MsgType::TError as u8, 1, 0]),
            Err(Error::UnknownMessageType(106))
        ));

        let mut frame = compose(&Msg {
            tag: 1,
            body: FCall::TClunk { fid: 4 },
        })
        .to_vec();
        frame.push(0);
        assert!(matches!(
            parse(&frame),
            Err(Error::FrameLengthMismatch { declared: 11, actual: 12 })
        ));
        frame[0] = 12;
        assert!(matches!(
            parse(&frame),
            Err(Error::FrameLengthMismatch { declared: 12, actual: 11 })
        ));
    }
}
