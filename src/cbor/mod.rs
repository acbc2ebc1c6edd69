//! Hand-rolled structural CBOR codec.
//!
//! The ledger types exposed by pallas are great for reading chain data, but
//! the gateway also needs to reshape already-serialized transactions without
//! disturbing sibling bytes (e.g. splicing an extra vkey witness into a
//! submitted tx). That requires a codec that preserves container modes
//! (definite vs indefinite vs set) across a decode/encode round trip, which
//! is what this module provides.

mod decode;
mod encode;
mod output;

pub use decode::{
    decode, item_length, BytesKind, CborError, Decoded, ListKind, MapKind, Stream, TextKind,
};
pub use encode::*;
pub use output::*;

use num_bigint::BigInt;

/// Splices a vkey witness into a serialized transaction.
///
/// The transaction must be a top-level list of 4 items where item 1 is the
/// witness set, an int-keyed map. The witness lands under key 0: appended to
/// the existing container (whose mode is preserved), or as a fresh
/// single-element set when the key is absent.
///
/// Returns `None` when the transaction doesn't have the expected shape, in
/// which case the caller should leave the original bytes untouched.
pub fn splice_vkey_witness(
    tx_bytes: &[u8],
    witness: &Decoded,
) -> Result<Option<Vec<u8>>, CborError> {
    let mut tx = decode(tx_bytes)?;

    let Decoded::List(_, items) = &mut tx else {
        return Ok(None);
    };

    if items.len() != 4 {
        return Ok(None);
    }

    let Decoded::Map(_, pairs) = &mut items[1] else {
        return Ok(None);
    };

    if pairs.is_empty() {
        return Ok(None);
    }

    let existing = pairs
        .iter_mut()
        .find(|(key, _)| matches!(key, Decoded::Int(x) if *x == BigInt::ZERO));

    match existing {
        Some((_, value)) => {
            let Decoded::List(_, witnesses) = value else {
                return Ok(None);
            };

            witnesses.push(witness.clone());
        }
        None => {
            pairs.push((
                Decoded::Int(BigInt::ZERO),
                Decoded::List(ListKind::Set, vec![witness.clone()]),
            ));
        }
    }

    Ok(Some(tx.cbor()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(bytes: &[u8]) -> Decoded {
        let decoded = decode(bytes).expect("decodes");
        assert_eq!(decoded.cbor(), bytes, "re-encoding must be byte-stable");
        decoded
    }

    #[test]
    fn head_encoding_breakpoints() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 24]),
            (255, &[0x18, 255]),
            (256, &[0x19, 0x01, 0x00]),
            (65535, &[0x19, 0xff, 0xff]),
            (65536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
            (-1, &[0x20]),
            (-24, &[0x37]),
            (-25, &[0x38, 24]),
            (-256, &[0x38, 255]),
        ];

        for (x, expected) in cases {
            assert_eq!(encode_int(*x), *expected, "encoding {x}");
        }
    }

    #[test]
    fn wide_integer_encoding() {
        let u32_max = BigInt::from(u32::MAX);
        assert_eq!(
            encode_big_int(&u32_max),
            vec![0x1a, 0xff, 0xff, 0xff, 0xff]
        );

        let beyond_u32 = BigInt::from(1u64 << 32);
        assert_eq!(
            encode_big_int(&beyond_u32),
            vec![0x1b, 0, 0, 0, 1, 0, 0, 0, 0]
        );

        let u64_max = BigInt::from(u64::MAX);
        let mut expected = vec![0x1b];
        expected.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(encode_big_int(&u64_max), expected);

        // 2^64 no longer fits a head and becomes a tag 2 bignum
        let beyond = &u64_max + 1;
        assert_eq!(
            encode_big_int(&beyond),
            vec![0xc2, 0x49, 1, 0, 0, 0, 0, 0, 0, 0, 0]
        );

        // -2^64 is the most negative head-encodable value
        let neg_limit = -&beyond;
        let mut expected = vec![0x3b];
        expected.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(encode_big_int(&neg_limit), expected);

        // one further and we need a tag 3 bignum of (-x - 1)
        let neg_beyond = &neg_limit - 1;
        assert_eq!(
            encode_big_int(&neg_beyond),
            vec![0xc3, 0x49, 1, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn integers_roundtrip() {
        let samples = [
            "0",
            "23",
            "24",
            "255",
            "256",
            "65535",
            "65536",
            "4294967295",
            "4294967296",
            "18446744073709551615",
            "18446744073709551616",
            "340282366920938463463374607431768211455",
            "-1",
            "-24",
            "-25",
            "-256",
            "-18446744073709551616",
            "-18446744073709551617",
        ];

        for sample in samples {
            let x: BigInt = sample.parse().unwrap();
            let encoded = encode_big_int(&x);
            let decoded = roundtrip(&encoded);
            assert_eq!(decoded, Decoded::Int(x), "roundtrip of {sample}");
        }
    }

    #[test]
    fn indef_bytes_chunked_at_64() {
        let payload = vec![0xabu8; 100];
        let encoded = encode_indef_bytes(&payload);

        assert_eq!(encoded[0], 0x5f);
        assert_eq!(encoded[1], 0x58); // def bytes, 1-byte length
        assert_eq!(encoded[2], 64);
        assert_eq!(*encoded.last().unwrap(), 0xff);

        match roundtrip(&encoded) {
            Decoded::Bytes(BytesKind::Indef, bs) => assert_eq!(bs, payload),
            other => panic!("unexpected decode {other:?}"),
        }
    }

    #[test]
    fn empty_list_is_definite_nonempty_is_indefinite() {
        assert_eq!(encode_list(&[]), vec![0x80]);

        let encoded = encode_list(&[encode_int(1)]);
        assert_eq!(encoded, vec![0x9f, 0x01, 0xff]);
    }

    #[test]
    fn set_roundtrip() {
        let encoded = encode_set(&[encode_int(1), encode_int(2)]);
        assert_eq!(&encoded[..3], &[0xd9, 0x01, 0x02]);

        match roundtrip(&encoded) {
            Decoded::List(ListKind::Set, items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected decode {other:?}"),
        }
    }

    #[test]
    fn constr_tag_mapping() {
        assert_eq!(encode_constr_tag(0), vec![0xd8, 121]);
        assert_eq!(encode_constr_tag(6), vec![0xd8, 127]);
        assert_eq!(encode_constr_tag(7), vec![0xd9, 0x05, 0x00]);
        assert_eq!(encode_constr_tag(127), vec![0xd9, 0x05, 0x78]);

        // beyond 127 the discriminator rides tag 102
        let mut expected = vec![0xd8, 102, 0x82];
        expected.extend(encode_int(1000));
        assert_eq!(encode_constr_tag(1000), expected);
    }

    #[test]
    fn constr_roundtrip() {
        for tag in [0u64, 6, 7, 127, 1000] {
            let mut bytes = encode_constr_tag(tag);
            bytes.extend(encode_list(&[encode_int(42)]));

            match roundtrip(&bytes) {
                Decoded::Constr(t, ListKind::Indef, fields) => {
                    assert_eq!(t, tag);
                    assert_eq!(fields, vec![Decoded::Int(BigInt::from(42))]);
                }
                other => panic!("unexpected decode {other:?}"),
            }
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let mut bytes = encode_tag(24);
        bytes.extend(encode_bytes(&encode_int(5)));

        match roundtrip(&bytes) {
            Decoded::Envelope(24, BytesKind::Def, inner) => {
                assert_eq!(*inner, Decoded::Int(BigInt::from(5)))
            }
            other => panic!("unexpected decode {other:?}"),
        }
    }

    #[test]
    fn nested_structures_roundtrip() {
        // map { 0: [bytes], 1: true, 2: null } in indefinite form
        let pairs = vec![
            EncodedPair {
                key: encode_int(0),
                value: encode_indef_list(&[encode_bytes(b"abc")]),
            },
            EncodedPair {
                key: encode_int(1),
                value: encode_bool(true),
            },
            EncodedPair {
                key: encode_int(2),
                value: encode_null(),
            },
        ];

        roundtrip(&encode_indef_map(&pairs));
        roundtrip(&encode_def_map(&pairs));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        // truncated head argument
        assert!(decode(&[0x19, 0x01]).is_err());
        // truncated byte string
        assert!(decode(&[0x45, 1, 2]).is_err());
        // unterminated indefinite list
        assert!(decode(&[0x9f, 0x01]).is_err());
        // invalid utf-8 text
        assert!(decode(&[0x62, 0xff, 0xfe]).is_err());
        // reserved head info
        assert!(decode(&[0x1c]).is_err());
        // empty input
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn item_length_splits_concatenated_items() {
        let first = encode_tuple(&[encode_int(1), encode_bytes(b"xy")]);
        let second = encode_indef_list(&[encode_bool(false)]);

        let mut joined = first.clone();
        joined.extend_from_slice(&second);

        assert_eq!(item_length(&joined).unwrap(), first.len());
        assert_eq!(item_length(&joined[first.len()..]).unwrap(), second.len());

        // skipping tolerates constructs the structural decoder rejects,
        // like a float or a tag over a list
        let mut float = vec![0xfb];
        float.extend_from_slice(&1.5f64.to_be_bytes());
        assert_eq!(item_length(&float).unwrap(), 9);

        let mut tagged = encode_tag(30);
        tagged.extend(encode_def_list(&[encode_int(1), encode_int(2)]));
        assert_eq!(item_length(&tagged).unwrap(), tagged.len());
    }

    #[test]
    fn datum_hash_fixture() {
        let input = hex::decode(concat!(
            "9fd8799fd8799f581c3a5904074323a4cddfe1103969962a5807c6c37495db9d",
            "f48d019f9affd8799fd8799fd8799f581c5a0987ee3ec775d90cb16851a5f3cc",
            "9d8b03bd6492329e8936844229ffffffff001a000fac941a05265c00ff"
        ))
        .unwrap();

        assert_eq!(
            hash_datum(&input),
            "2506404fab413208f28981b818d544f2128bfc9480e489662513cf4659fef24d"
        );

        // the fixture itself must survive the codec
        roundtrip(&input);
    }

    fn witness() -> Decoded {
        decode(&encode_tuple(&[
            encode_bytes(&[0x11; 32]),
            encode_bytes(&[0x22; 64]),
        ]))
        .unwrap()
    }

    fn tx_with_witness_map(witness_pairs: &[EncodedPair]) -> Vec<u8> {
        encode_tuple(&[
            encode_def_map(&[]),                 // body (content irrelevant here)
            encode_def_map(witness_pairs),       // witness set
            encode_bool(true),                   // is_valid
            encode_null(),                       // auxiliary
        ])
    }

    #[test]
    fn splice_appends_to_existing_set() {
        let tx = tx_with_witness_map(&[EncodedPair {
            key: encode_int(0),
            value: encode_set(&[witness().cbor()]),
        }]);

        let spliced = splice_vkey_witness(&tx, &witness()).unwrap().unwrap();

        match decode(&spliced).unwrap() {
            Decoded::List(_, items) => match &items[1] {
                Decoded::Map(_, pairs) => match &pairs[0].1 {
                    Decoded::List(ListKind::Set, ws) => assert_eq!(ws.len(), 2),
                    other => panic!("witnesses not a set: {other:?}"),
                },
                other => panic!("not a map: {other:?}"),
            },
            other => panic!("not a list: {other:?}"),
        }
    }

    #[test]
    fn splice_preserves_definite_list_mode() {
        let tx = tx_with_witness_map(&[EncodedPair {
            key: encode_int(0),
            value: encode_def_list(&[witness().cbor()]),
        }]);

        let spliced = splice_vkey_witness(&tx, &witness()).unwrap().unwrap();

        match decode(&spliced).unwrap() {
            Decoded::List(_, items) => match &items[1] {
                Decoded::Map(_, pairs) => match &pairs[0].1 {
                    Decoded::List(ListKind::Def, ws) => assert_eq!(ws.len(), 2),
                    other => panic!("container mode not preserved: {other:?}"),
                },
                other => panic!("not a map: {other:?}"),
            },
            other => panic!("not a list: {other:?}"),
        }
    }

    #[test]
    fn splice_adds_missing_key_as_set() {
        let tx = tx_with_witness_map(&[EncodedPair {
            key: encode_int(3),
            value: encode_def_list(&[]),
        }]);

        let spliced = splice_vkey_witness(&tx, &witness()).unwrap().unwrap();

        match decode(&spliced).unwrap() {
            Decoded::List(_, items) => match &items[1] {
                Decoded::Map(_, pairs) => {
                    assert_eq!(pairs.len(), 2);
                    let (key, value) = &pairs[1];
                    assert_eq!(*key, Decoded::Int(BigInt::ZERO));
                    assert!(matches!(value, Decoded::List(ListKind::Set, ws) if ws.len() == 1));
                }
                other => panic!("not a map: {other:?}"),
            },
            other => panic!("not a list: {other:?}"),
        }
    }

    #[test]
    fn splice_rejects_unexpected_shapes() {
        // not a 4-list
        let tx = encode_tuple(&[encode_int(1)]);
        assert!(splice_vkey_witness(&tx, &witness()).unwrap().is_none());

        // witness set isn't a map
        let tx = encode_tuple(&[
            encode_def_map(&[]),
            encode_int(0),
            encode_bool(true),
            encode_null(),
        ]);
        assert!(splice_vkey_witness(&tx, &witness()).unwrap().is_none());

        // garbage isn't silently accepted
        assert!(splice_vkey_witness(&[0xff, 0x00], &witness()).is_err());
    }

    #[test]
    fn splice_leaves_siblings_byte_stable() {
        let body = encode_def_map(&[EncodedPair {
            key: encode_int(0),
            value: encode_indef_list(&[encode_bytes(&[0xaa; 32])]),
        }]);

        let tx = encode_tuple(&[
            body.clone(),
            encode_def_map(&[EncodedPair {
                key: encode_int(0),
                value: encode_set(&[witness().cbor()]),
            }]),
            encode_bool(true),
            encode_null(),
        ]);

        let spliced = splice_vkey_witness(&tx, &witness()).unwrap().unwrap();

        // the body bytes reappear verbatim inside the updated tx
        assert!(spliced
            .windows(body.len())
            .any(|window| window == body.as_slice()));
    }

    #[test]
    fn tx_output_shape() {
        let utxo = crate::model::Utxo {
            tx_id: "aa".repeat(32),
            output_index: 1,
            address: "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp".into(),
            lovelace: "5000000".into(),
            assets: vec![crate::model::PolicyAsset {
                asset: format!("{}{}", "bb".repeat(28), "cc".repeat(4)),
                quantity: "42".into(),
            }],
            ..Default::default()
        };

        let encoded = encode_utxo(&utxo).unwrap();

        match decode(&encoded).unwrap() {
            Decoded::List(ListKind::Def, items) => {
                assert_eq!(items.len(), 2);

                // (tx id bytes, index)
                match &items[0] {
                    Decoded::List(ListKind::Def, id) => {
                        assert!(matches!(&id[0], Decoded::Bytes(_, bs) if bs.len() == 32));
                        assert_eq!(id[1], Decoded::Int(BigInt::from(1)));
                    }
                    other => panic!("unexpected id {other:?}"),
                }

                // int-keyed output map with address and value
                match &items[1] {
                    Decoded::Map(MapKind::Def, fields) => {
                        assert_eq!(fields.len(), 2);
                        assert_eq!(fields[0].0, Decoded::Int(BigInt::ZERO));
                        assert_eq!(fields[1].0, Decoded::Int(BigInt::from(1)));
                        // value is (lovelace, multiasset)
                        assert!(matches!(&fields[1].1, Decoded::List(ListKind::Def, v) if v.len() == 2));
                    }
                    other => panic!("unexpected output {other:?}"),
                }
            }
            other => panic!("unexpected utxo encoding {other:?}"),
        }
    }

    #[test]
    fn lone_lovelace_value_is_bare_int() {
        let encoded = encode_value("7000000", &[]).unwrap();
        assert_eq!(decode(&encoded).unwrap(), Decoded::Int(BigInt::from(7000000)));
    }
}
