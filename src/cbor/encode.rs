//! Byte-exact CBOR encoding primitives (RFC 8949).
//!
//! The encoder always picks the smallest head that fits the argument.
//! Indefinite byte strings are chunked at 64 bytes. Non-empty lists are
//! emitted in indefinite form, empty ones in definite form, matching the
//! wire shapes produced by the wallets this gateway serves.

use num_bigint::{BigInt, Sign};

pub const BREAK: u8 = 0xff;

pub const MAJOR_UNSIGNED: u8 = 0;
pub const MAJOR_NEGATIVE: u8 = 1;
pub const MAJOR_BYTES: u8 = 2;
pub const MAJOR_TEXT: u8 = 3;
pub const MAJOR_LIST: u8 = 4;
pub const MAJOR_MAP: u8 = 5;
pub const MAJOR_TAG: u8 = 6;
pub const MAJOR_SIMPLE: u8 = 7;

pub const SET_TAG: u64 = 258;

/// A key/value pair whose members are already encoded.
#[derive(Debug, Clone)]
pub struct EncodedPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub fn encode_def_head(major: u8, n: u64) -> Vec<u8> {
    if n <= 23 {
        vec![32 * major + n as u8]
    } else if n < 256 {
        vec![32 * major + 24, n as u8]
    } else if n < 65536 {
        let mut bs = vec![32 * major + 25];
        bs.extend_from_slice(&(n as u16).to_be_bytes());
        bs
    } else if n < 1 << 32 {
        let mut bs = vec![32 * major + 26];
        bs.extend_from_slice(&(n as u32).to_be_bytes());
        bs
    } else {
        let mut bs = vec![32 * major + 27];
        bs.extend_from_slice(&n.to_be_bytes());
        bs
    }
}

pub fn encode_indef_head(major: u8) -> Vec<u8> {
    vec![32 * major + 31]
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![0xf5]
    } else {
        vec![0xf4]
    }
}

pub fn encode_null() -> Vec<u8> {
    vec![0xf6]
}

pub fn encode_bytes(bs: &[u8]) -> Vec<u8> {
    let mut wrapped = encode_def_head(MAJOR_BYTES, bs.len() as u64);
    wrapped.extend_from_slice(bs);
    wrapped
}

pub fn encode_indef_bytes(bs: &[u8]) -> Vec<u8> {
    let mut wrapped = encode_indef_head(MAJOR_BYTES);

    for chunk in bs.chunks(64) {
        wrapped.extend(encode_def_head(MAJOR_BYTES, chunk.len() as u64));
        wrapped.extend_from_slice(chunk);
    }

    wrapped.push(BREAK);
    wrapped
}

pub fn encode_text(s: &str) -> Vec<u8> {
    let mut wrapped = encode_def_head(MAJOR_TEXT, s.len() as u64);
    wrapped.extend_from_slice(s.as_bytes());
    wrapped
}

pub fn encode_int(x: i64) -> Vec<u8> {
    encode_big_int(&BigInt::from(x))
}

/// Ints within ±2⁶⁴ get a plain head, anything larger becomes a tag 2/3
/// bignum over the big-endian magnitude.
pub fn encode_big_int(x: &BigInt) -> Vec<u8> {
    if x.sign() != Sign::Minus {
        match u64::try_from(x) {
            Ok(n) => encode_def_head(MAJOR_UNSIGNED, n),
            Err(_) => {
                let mut bs = encode_def_head(MAJOR_TAG, 2);
                bs.extend(encode_bytes(&x.magnitude().to_bytes_be()));
                bs
            }
        }
    } else {
        let flipped = neg_minus_one(x);

        match u64::try_from(&flipped) {
            Ok(n) => encode_def_head(MAJOR_NEGATIVE, n),
            Err(_) => {
                let mut bs = encode_def_head(MAJOR_TAG, 3);
                bs.extend(encode_bytes(&flipped.magnitude().to_bytes_be()));
                bs
            }
        }
    }
}

/// `-x - 1`, the bridge between a negative int and its CBOR argument.
pub fn neg_minus_one(x: &BigInt) -> BigInt {
    -x - 1
}

pub fn encode_tag(tag: u64) -> Vec<u8> {
    encode_def_head(MAJOR_TAG, tag)
}

pub fn encode_def_list(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut bs = encode_def_head(MAJOR_LIST, entries.len() as u64);

    for entry in entries {
        bs.extend_from_slice(entry);
    }

    bs
}

pub fn encode_indef_list(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut bs = encode_indef_head(MAJOR_LIST);

    for entry in entries {
        bs.extend_from_slice(entry);
    }

    bs.push(BREAK);
    bs
}

/// Non-empty lists go indefinite, empty ones definite.
pub fn encode_list(entries: &[Vec<u8>]) -> Vec<u8> {
    if entries.is_empty() {
        encode_def_list(entries)
    } else {
        encode_indef_list(entries)
    }
}

/// A set is a definite list inside tag 258.
pub fn encode_set(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut bs = encode_tag(SET_TAG);
    bs.extend(encode_def_list(entries));
    bs
}

pub fn encode_def_map(pairs: &[EncodedPair]) -> Vec<u8> {
    let mut bs = encode_def_head(MAJOR_MAP, pairs.len() as u64);

    for pair in pairs {
        bs.extend_from_slice(&pair.key);
        bs.extend_from_slice(&pair.value);
    }

    bs
}

pub fn encode_indef_map(pairs: &[EncodedPair]) -> Vec<u8> {
    let mut bs = encode_indef_head(MAJOR_MAP);

    for pair in pairs {
        bs.extend_from_slice(&pair.key);
        bs.extend_from_slice(&pair.value);
    }

    bs.push(BREAK);
    bs
}

pub fn encode_map(pairs: &[EncodedPair]) -> Vec<u8> {
    encode_def_map(pairs)
}

/// The entries are already encoded.
pub fn encode_tuple(entries: &[Vec<u8>]) -> Vec<u8> {
    encode_def_list(entries)
}

/// Definite int-keyed map, keys in ascending order.
pub fn encode_object_ikey(fields: &std::collections::BTreeMap<i64, Vec<u8>>) -> Vec<u8> {
    let pairs: Vec<EncodedPair> = fields
        .iter()
        .map(|(i, f)| EncodedPair {
            key: encode_int(*i),
            value: f.clone(),
        })
        .collect();

    encode_def_map(&pairs)
}

/// Constructor discriminators: 0..6 map to tags 121..127, 7..127 map to
/// 1280..1400, anything above rides tag 102 with an explicit int.
pub fn encode_constr_tag(tag: u64) -> Vec<u8> {
    if tag <= 6 {
        encode_def_head(MAJOR_TAG, 121 + tag)
    } else if tag <= 127 {
        encode_def_head(MAJOR_TAG, 1280 + tag - 7)
    } else {
        let mut bs = encode_def_head(MAJOR_TAG, 102);
        bs.extend(encode_def_head(MAJOR_LIST, 2));
        bs.extend(encode_big_int(&BigInt::from(tag)));
        bs
    }
}
