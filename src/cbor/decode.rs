//! Recursive-descent CBOR decoder over a position-tracked byte stream.
//!
//! The decoder returns a structural [`Decoded`] tree that re-serializes to
//! the exact input bytes for anything this crate's encoder can produce.

use num_bigint::BigInt;
use thiserror::Error;

use super::encode::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CborError {
    #[error("unexpected end of cbor stream")]
    UnexpectedEnd,

    #[error("empty cbor")]
    Empty,

    #[error("unhandled cbor type byte {0}")]
    UnhandledType(u8),

    #[error("unexpected cbor head (major {major}, info {info})")]
    UnexpectedHead { major: u8, info: u8 },

    #[error("invalid bool byte {0}")]
    InvalidBool(u8),

    #[error("invalid null byte {0}")]
    InvalidNull(u8),

    #[error("invalid indefinite termination byte {0}")]
    InvalidTermination(u8),

    #[error("text string isn't valid utf-8")]
    InvalidUtf8,

    #[error("unexpected constructor tag {0}")]
    UnexpectedConstrTag(u64),

    #[error("unexpected set tag {0}")]
    UnexpectedSetTag(u64),

    #[error("map has {keys} keys but {values} values")]
    UnbalancedMap { keys: usize, values: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesKind {
    Def,
    Indef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Def,
    Indef,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Def,
    Indef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Single,
    Chunked,
}

/// Structural CBOR value. Every variant knows how to re-serialize itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Bool(bool),
    Bytes(BytesKind, Vec<u8>),
    Int(BigInt),
    Text(TextKind, Vec<String>),
    List(ListKind, Vec<Decoded>),
    Map(MapKind, Vec<(Decoded, Decoded)>),
    Constr(u64, ListKind, Vec<Decoded>),
    Envelope(u64, BytesKind, Box<Decoded>),
    Null,
}

impl Decoded {
    pub fn cbor(&self) -> Vec<u8> {
        match self {
            Decoded::Bool(v) => encode_bool(*v),
            Decoded::Bytes(BytesKind::Def, bs) => encode_bytes(bs),
            Decoded::Bytes(BytesKind::Indef, bs) => encode_indef_bytes(bs),
            Decoded::Int(x) => encode_big_int(x),
            Decoded::Text(TextKind::Single, chunks) => {
                encode_text(chunks.first().map(String::as_str).unwrap_or(""))
            }
            Decoded::Text(TextKind::Chunked, chunks) => {
                let entries: Vec<Vec<u8>> = chunks.iter().map(|c| encode_text(c)).collect();
                encode_def_list(&entries)
            }
            Decoded::List(kind, items) => {
                let entries: Vec<Vec<u8>> = items.iter().map(|i| i.cbor()).collect();
                match kind {
                    ListKind::Def => encode_def_list(&entries),
                    ListKind::Indef => encode_indef_list(&entries),
                    ListKind::Set => encode_set(&entries),
                }
            }
            Decoded::Map(kind, pairs) => {
                let pairs: Vec<EncodedPair> = pairs
                    .iter()
                    .map(|(k, v)| EncodedPair {
                        key: k.cbor(),
                        value: v.cbor(),
                    })
                    .collect();
                match kind {
                    MapKind::Def => encode_def_map(&pairs),
                    MapKind::Indef => encode_indef_map(&pairs),
                }
            }
            Decoded::Constr(tag, kind, fields) => {
                let mut bs = encode_constr_tag(*tag);
                bs.extend(Decoded::List(*kind, fields.clone()).cbor());
                bs
            }
            Decoded::Envelope(tag, kind, inner) => {
                let inner = inner.cbor();
                let mut bs = encode_tag(*tag);
                match kind {
                    BytesKind::Def => bs.extend(encode_bytes(&inner)),
                    BytesKind::Indef => bs.extend(encode_indef_bytes(&inner)),
                }
                bs
            }
            Decoded::Null => encode_null(),
        }
    }

    /// Single-chunk text accessor, chunked strings concatenated.
    pub fn text(&self) -> Option<String> {
        match self {
            Decoded::Text(_, chunks) => Some(chunks.concat()),
            _ => None,
        }
    }
}

/// Decode a complete CBOR item from the start of `bytes`. Trailing bytes are
/// not an error; use [`Stream`] directly when they matter.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CborError> {
    let mut stream = Stream::new(bytes)?;
    decode_any(&mut stream)
}

/// Length in bytes of the single CBOR item at the start of `bytes`.
///
/// Unlike [`decode`] this skips over the item without interpreting it, so it
/// accepts constructs the structural decoder doesn't model (floats, tags over
/// arbitrary items). Used to split concatenated items apart.
pub fn item_length(bytes: &[u8]) -> Result<usize, CborError> {
    let mut stream = Stream::new(bytes)?;
    skip_item(&mut stream)?;
    Ok(stream.position())
}

fn skip_item(s: &mut Stream) -> Result<(), CborError> {
    let first = s.peek_one()?;
    let (major, info) = split_head_byte(first);

    match major {
        MAJOR_UNSIGNED | MAJOR_NEGATIVE => {
            decode_def_head(s)?;
        }
        MAJOR_BYTES | MAJOR_TEXT => {
            if info == 31 {
                s.shift_one()?;
                while s.peek_one()? != BREAK {
                    let (_, n) = decode_def_head(s)?;
                    s.shift_many(n as usize)?;
                }
                s.shift_one()?;
            } else {
                let (_, n) = decode_def_head(s)?;
                s.shift_many(n as usize)?;
            }
        }
        MAJOR_LIST | MAJOR_MAP => {
            let per_entry = if major == MAJOR_MAP { 2 } else { 1 };

            if info == 31 {
                s.shift_one()?;
                while s.peek_one()? != BREAK {
                    skip_item(s)?;
                }
                s.shift_one()?;
            } else {
                let (_, n) = decode_def_head(s)?;
                for _ in 0..n * per_entry {
                    skip_item(s)?;
                }
            }
        }
        MAJOR_TAG => {
            decode_def_head(s)?;
            skip_item(s)?;
        }
        _ => {
            // simple values and floats carry 0/1/2/4/8 argument bytes
            s.shift_one()?;
            match info {
                0..=23 => {}
                24 => {
                    s.shift_one()?;
                }
                25 => {
                    s.shift_many(2)?;
                }
                26 => {
                    s.shift_many(4)?;
                }
                27 => {
                    s.shift_many(8)?;
                }
                _ => return Err(CborError::UnexpectedHead { major, info }),
            }
        }
    }

    Ok(())
}

pub struct Stream<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Stream<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, CborError> {
        if bytes.is_empty() {
            return Err(CborError::Empty);
        }

        Ok(Self { bytes, pos: 0 })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek_one(&self) -> Result<u8, CborError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(CborError::UnexpectedEnd)
    }

    fn peek_many(&self, n: usize) -> Result<&'a [u8], CborError> {
        self.bytes
            .get(self.pos..self.pos + n)
            .ok_or(CborError::UnexpectedEnd)
    }

    fn shift_one(&mut self) -> Result<u8, CborError> {
        let b = self.peek_one()?;
        self.pos += 1;
        Ok(b)
    }

    fn shift_many(&mut self, n: usize) -> Result<&'a [u8], CborError> {
        let bs = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(CborError::UnexpectedEnd)?;
        self.pos += n;
        Ok(bs)
    }

    fn is_bool(&self) -> bool {
        matches!(self.peek_one(), Ok(0xf4) | Ok(0xf5))
    }

    fn is_null(&self) -> bool {
        matches!(self.peek_one(), Ok(0xf6))
    }

    fn is_bytes(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_BYTES)
    }

    fn is_indef_bytes(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b == 32 * MAJOR_BYTES + 31)
    }

    fn is_text(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_TEXT)
    }

    fn is_list(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_LIST)
    }

    fn is_def_list(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_LIST && b != 32 * MAJOR_LIST + 31)
    }

    fn is_indef_list(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b == 32 * MAJOR_LIST + 31)
    }

    fn is_map(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_MAP)
    }

    fn is_indef_map(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b == 32 * MAJOR_MAP + 31)
    }

    fn is_tag(&self) -> bool {
        matches!(self.peek_one(), Ok(b) if b / 32 == MAJOR_TAG)
    }

    /// Ints cover majors 0 and 1 plus the two bignum tags.
    fn is_int(&self) -> bool {
        let Ok(first) = self.peek_one() else {
            return false;
        };

        let (major, info) = split_head_byte(first);

        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => true,
            MAJOR_TAG => info == 2 || info == 3,
            _ => false,
        }
    }

    /// Constructor tags need a full head decode since they don't fit the
    /// 5-bit info field.
    fn is_constr(&self) -> bool {
        let mut probe = Stream {
            bytes: self.bytes,
            pos: self.pos,
        };

        let Ok((major, n)) = decode_def_head(&mut probe) else {
            return false;
        };

        major == MAJOR_TAG && (n == 102 || (121..=127).contains(&n) || (1280..=1400).contains(&n))
    }

    /// Set tags are always 3-byte heads (`d9 01 02`), so a 3-byte lookahead
    /// is enough to tell them apart from plain envelopes.
    fn is_set(&self) -> bool {
        let Ok(first) = self.peek_one() else {
            return false;
        };

        let (major, info) = split_head_byte(first);

        if major != MAJOR_TAG || info != 25 {
            return false;
        }

        match self.peek_many(3) {
            Ok(bs) => u16::from_be_bytes([bs[1], bs[2]]) as u64 == SET_TAG,
            Err(_) => false,
        }
    }
}

fn split_head_byte(b: u8) -> (u8, u8) {
    (b / 32, b % 32)
}

fn decode_any(s: &mut Stream) -> Result<Decoded, CborError> {
    if s.is_bool() {
        decode_bool(s)
    } else if s.is_bytes() {
        let (kind, bs) = decode_bytes(s)?;
        Ok(Decoded::Bytes(kind, bs))
    } else if s.is_constr() {
        decode_constr(s)
    } else if s.is_int() {
        decode_int(s)
    } else if s.is_text() {
        decode_text(s)
    } else if s.is_list() {
        decode_list(s)
    } else if s.is_set() {
        decode_set(s)
    } else if s.is_tag() {
        decode_envelope(s)
    } else if s.is_map() {
        decode_map(s)
    } else if s.is_null() {
        decode_null(s)
    } else {
        Err(CborError::UnhandledType(s.peek_one()?))
    }
}

/// Heads with info 24..27 carry 1/2/4/8 big-endian argument bytes.
fn decode_def_head(s: &mut Stream) -> Result<(u8, u64), CborError> {
    let first = s.shift_one()?;
    let (major, info) = split_head_byte(first);

    let n = match info {
        0..=23 => info as u64,
        24 => s.shift_one()? as u64,
        25 => {
            let bs = s.shift_many(2)?;
            u16::from_be_bytes([bs[0], bs[1]]) as u64
        }
        26 => {
            let bs = s.shift_many(4)?;
            u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]) as u64
        }
        27 => {
            let bs = s.shift_many(8)?;
            u64::from_be_bytes(bs.try_into().map_err(|_| CborError::UnexpectedEnd)?)
        }
        _ => return Err(CborError::UnexpectedHead { major, info }),
    };

    Ok((major, n))
}

fn decode_bool(s: &mut Stream) -> Result<Decoded, CborError> {
    match s.shift_one()? {
        0xf5 => Ok(Decoded::Bool(true)),
        0xf4 => Ok(Decoded::Bool(false)),
        b => Err(CborError::InvalidBool(b)),
    }
}

fn decode_null(s: &mut Stream) -> Result<Decoded, CborError> {
    match s.shift_one()? {
        0xf6 => Ok(Decoded::Null),
        b => Err(CborError::InvalidNull(b)),
    }
}

fn decode_bytes(s: &mut Stream) -> Result<(BytesKind, Vec<u8>), CborError> {
    if s.is_indef_bytes() {
        s.shift_one()?;

        let mut res = Vec::new();

        while s.peek_one()? != BREAK {
            let (_, n) = decode_def_head(s)?;
            res.extend_from_slice(s.shift_many(n as usize)?);
        }

        match s.shift_one()? {
            BREAK => Ok((BytesKind::Indef, res)),
            b => Err(CborError::InvalidTermination(b)),
        }
    } else {
        let (_, n) = decode_def_head(s)?;
        let bs = s.shift_many(n as usize)?;
        Ok((BytesKind::Def, bs.to_vec()))
    }
}

fn decode_int(s: &mut Stream) -> Result<Decoded, CborError> {
    let (major, n) = decode_def_head(s)?;

    match major {
        MAJOR_UNSIGNED => Ok(Decoded::Int(BigInt::from(n))),
        MAJOR_NEGATIVE => Ok(Decoded::Int(neg_minus_one(&BigInt::from(n)))),
        MAJOR_TAG if n == 2 => {
            let (_, bs) = decode_bytes(s)?;
            Ok(Decoded::Int(BigInt::from_bytes_be(
                num_bigint::Sign::Plus,
                &bs,
            )))
        }
        MAJOR_TAG if n == 3 => {
            let (_, bs) = decode_bytes(s)?;
            let magnitude = BigInt::from_bytes_be(num_bigint::Sign::Plus, &bs);
            Ok(Decoded::Int(neg_minus_one(&magnitude)))
        }
        _ => Err(CborError::UnexpectedHead {
            major,
            info: n as u8,
        }),
    }
}

fn decode_text(s: &mut Stream) -> Result<Decoded, CborError> {
    if s.is_def_list() {
        let (_, n) = decode_def_head(s)?;

        let mut chunks = Vec::with_capacity(n as usize);
        for _ in 0..n {
            chunks.push(decode_text_chunk(s)?);
        }

        Ok(Decoded::Text(TextKind::Chunked, chunks))
    } else {
        let chunk = decode_text_chunk(s)?;
        Ok(Decoded::Text(TextKind::Single, vec![chunk]))
    }
}

fn decode_text_chunk(s: &mut Stream) -> Result<String, CborError> {
    let (major, n) = decode_def_head(s)?;

    if major != MAJOR_TEXT {
        return Err(CborError::UnexpectedHead {
            major,
            info: n as u8,
        });
    }

    let bs = s.shift_many(n as usize)?;

    String::from_utf8(bs.to_vec()).map_err(|_| CborError::InvalidUtf8)
}

fn decode_indef_items(
    s: &mut Stream,
    mut item: impl FnMut(&mut Stream) -> Result<(), CborError>,
) -> Result<(), CborError> {
    while s.peek_one()? != BREAK {
        item(s)?;
    }

    match s.shift_one()? {
        BREAK => Ok(()),
        b => Err(CborError::InvalidTermination(b)),
    }
}

fn decode_def_list_items(
    s: &mut Stream,
    mut item: impl FnMut(&mut Stream) -> Result<(), CborError>,
) -> Result<(), CborError> {
    let (major, n) = decode_def_head(s)?;

    if major != MAJOR_LIST {
        return Err(CborError::UnexpectedHead {
            major,
            info: n as u8,
        });
    }

    for _ in 0..n {
        item(s)?;
    }

    Ok(())
}

fn decode_list(s: &mut Stream) -> Result<Decoded, CborError> {
    let mut items = Vec::new();

    let kind = if s.is_indef_list() {
        s.shift_one()?;

        decode_indef_items(s, |s| {
            items.push(decode_any(s)?);
            Ok(())
        })?;

        ListKind::Indef
    } else {
        decode_def_list_items(s, |s| {
            items.push(decode_any(s)?);
            Ok(())
        })?;

        ListKind::Def
    };

    Ok(Decoded::List(kind, items))
}

fn decode_set(s: &mut Stream) -> Result<Decoded, CborError> {
    let tag = decode_tag(s)?;

    if tag != SET_TAG {
        return Err(CborError::UnexpectedSetTag(tag));
    }

    let mut items = Vec::new();

    decode_def_list_items(s, |s| {
        items.push(decode_any(s)?);
        Ok(())
    })?;

    Ok(Decoded::List(ListKind::Set, items))
}

fn decode_map(s: &mut Stream) -> Result<Decoded, CborError> {
    let mut keys = Vec::new();
    let mut values = Vec::new();

    let kind = if s.is_indef_map() {
        s.shift_one()?;

        decode_indef_items(s, |s| {
            keys.push(decode_any(s)?);
            values.push(decode_any(s)?);
            Ok(())
        })?;

        MapKind::Indef
    } else {
        let (major, n) = decode_def_head(s)?;

        if major != MAJOR_MAP {
            return Err(CborError::UnexpectedHead {
                major,
                info: n as u8,
            });
        }

        for _ in 0..n {
            keys.push(decode_any(s)?);
            values.push(decode_any(s)?);
        }

        MapKind::Def
    };

    if keys.len() != values.len() {
        return Err(CborError::UnbalancedMap {
            keys: keys.len(),
            values: values.len(),
        });
    }

    let pairs = keys.into_iter().zip(values).collect();

    Ok(Decoded::Map(kind, pairs))
}

fn decode_constr(s: &mut Stream) -> Result<Decoded, CborError> {
    let tag = decode_constr_tag(s)?;

    let fields = decode_list(s)?;

    match fields {
        Decoded::List(kind, items) => Ok(Decoded::Constr(tag, kind, items)),
        _ => unreachable!("decode_list always returns a list"),
    }
}

fn decode_constr_tag(s: &mut Stream) -> Result<u64, CborError> {
    let (major, n) = decode_def_head(s)?;

    if major != MAJOR_TAG {
        return Err(CborError::UnexpectedHead {
            major,
            info: n as u8,
        });
    }

    match n {
        102 => {
            let (major, len) = decode_def_head(s)?;

            if major != MAJOR_LIST || len != 2 {
                return Err(CborError::UnexpectedConstrTag(n));
            }

            match decode_int(s)? {
                Decoded::Int(x) => {
                    u64::try_from(&x).map_err(|_| CborError::UnexpectedConstrTag(102))
                }
                _ => Err(CborError::UnexpectedConstrTag(102)),
            }
        }
        121..=127 => Ok(n - 121),
        1280..=1400 => Ok(n - 1280 + 7),
        _ => Err(CborError::UnexpectedConstrTag(n)),
    }
}

fn decode_envelope(s: &mut Stream) -> Result<Decoded, CborError> {
    let tag = decode_tag(s)?;

    let (kind, bs) = decode_bytes(s)?;

    let inner = decode(&bs)?;

    Ok(Decoded::Envelope(tag, kind, Box::new(inner)))
}

fn decode_tag(s: &mut Stream) -> Result<u64, CborError> {
    let (major, n) = decode_def_head(s)?;

    if major != MAJOR_TAG {
        return Err(CborError::UnexpectedHead {
            major,
            info: n as u8,
        });
    }

    Ok(n)
}
