//! Canonical CBOR shapes for transaction outputs served by the gateway.
//!
//! Wallets consume these bytes directly, so the layout must match the ledger
//! wire format: an output is a definite int-keyed map with fields
//! `{0: address, 1: value, 2?: datum option, 3?: script ref}`.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use pallas::ledger::addresses::Address;

use super::encode::*;
use crate::model::{PolicyAsset, Utxo};
use crate::prelude::Error;

/// Script version wrapped inside a reference script. Wallets built against
/// this gateway only attach PlutusV2 refs.
const REF_SCRIPT_VERSION: i64 = 2;

pub fn encode_address(addr: &str) -> Result<Vec<u8>, Error> {
    let parsed = Address::from_bech32(addr).map_err(Error::parse)?;

    Ok(encode_bytes(&parsed.to_vec()))
}

fn encode_hex_bytes(h: &str) -> Result<Vec<u8>, Error> {
    let bs = hex::decode(h).map_err(Error::parse)?;

    Ok(encode_bytes(&bs))
}

fn encode_large_int(x: &str) -> Result<Vec<u8>, Error> {
    let parsed: BigInt = x.parse().map_err(Error::parse)?;

    Ok(encode_big_int(&parsed))
}

/// Nested multiasset map: policy bytes → asset-name bytes → quantity.
pub fn encode_assets(assets: &[PolicyAsset]) -> Result<Vec<u8>, Error> {
    let mut by_policy: BTreeMap<&str, Vec<&PolicyAsset>> = BTreeMap::new();

    for asset in assets {
        if asset.asset.len() < 56 {
            return Err(Error::parse(format!("asset {} too short", asset.asset)));
        }

        by_policy.entry(&asset.asset[..56]).or_default().push(asset);
    }

    let mut outer_pairs = Vec::with_capacity(by_policy.len());

    for (policy, tokens) in by_policy {
        let mut inner_pairs = Vec::with_capacity(tokens.len());

        for token in tokens {
            inner_pairs.push(EncodedPair {
                key: encode_hex_bytes(&token.asset[56..])?,
                value: encode_large_int(&token.quantity)?,
            });
        }

        outer_pairs.push(EncodedPair {
            key: encode_hex_bytes(policy)?,
            value: encode_map(&inner_pairs),
        });
    }

    Ok(encode_map(&outer_pairs))
}

/// A value is a lone integer when there are no native assets, otherwise a
/// `(lovelace, multiasset)` tuple.
pub fn encode_value(lovelace: &str, assets: &[PolicyAsset]) -> Result<Vec<u8>, Error> {
    if assets.is_empty() {
        encode_large_int(lovelace)
    } else {
        Ok(encode_tuple(&[
            encode_large_int(lovelace)?,
            encode_assets(assets)?,
        ]))
    }
}

pub fn encode_hashed_datum(hash: &str) -> Result<Vec<u8>, Error> {
    let bs = hex::decode(hash).map_err(Error::parse)?;

    Ok(encode_tuple(&[encode_int(0), encode_bytes(&bs)]))
}

pub fn encode_inline_datum(inline_datum: &str) -> Result<Vec<u8>, Error> {
    let bs = hex::decode(inline_datum).map_err(Error::parse)?;

    let mut wrapped = encode_tag(24);
    wrapped.extend(encode_bytes(&bs));

    Ok(encode_tuple(&[encode_int(1), wrapped]))
}

/// The raw flat bytes are wrapped in a versioned tuple, then the whole thing
/// rides a tag-24 byte string.
pub fn encode_ref_script(ref_script: &str) -> Result<Vec<u8>, Error> {
    let bs = hex::decode(ref_script).map_err(Error::parse)?;

    let inner = encode_tuple(&[encode_int(REF_SCRIPT_VERSION), encode_bytes(&bs)]);

    let mut wrapped = encode_tag(24);
    wrapped.extend(encode_bytes(&inner));

    Ok(wrapped)
}

pub fn encode_tx_output(
    addr: &str,
    lovelace: &str,
    assets: &[PolicyAsset],
    datum_hash: &str,
    inline_datum: &str,
    ref_script: &str,
) -> Result<Vec<u8>, Error> {
    let mut fields = BTreeMap::new();

    fields.insert(0, encode_address(addr)?);
    fields.insert(1, encode_value(lovelace, assets)?);

    if !datum_hash.is_empty() {
        if inline_datum.is_empty() {
            fields.insert(2, encode_hashed_datum(datum_hash)?);
        } else {
            fields.insert(2, encode_inline_datum(inline_datum)?);
        }
    }

    if !ref_script.is_empty() {
        fields.insert(3, encode_ref_script(ref_script)?);
    }

    Ok(encode_object_ikey(&fields))
}

pub fn encode_tx_output_id(tx_id: &str, output_index: u32) -> Result<Vec<u8>, Error> {
    Ok(encode_tuple(&[
        encode_hex_bytes(tx_id)?,
        encode_int(output_index as i64),
    ]))
}

pub fn encode_utxo(utxo: &Utxo) -> Result<Vec<u8>, Error> {
    let id = encode_tx_output_id(&utxo.tx_id, utxo.output_index)?;

    let output = encode_tx_output(
        &utxo.address,
        &utxo.lovelace,
        &utxo.assets,
        &utxo.datum_hash,
        &utxo.inline_datum,
        &utxo.ref_script,
    )?;

    Ok(encode_tuple(&[id, output]))
}

/// Hex Blake2b-256 of the raw datum bytes.
pub fn hash_datum(bytes: &[u8]) -> String {
    pallas::crypto::hash::Hasher::<256>::hash(bytes).to_string()
}
