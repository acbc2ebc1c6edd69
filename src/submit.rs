//! Transaction submission pipeline.
//!
//! A submitted transaction is optionally co-signed for collateral, written
//! out as a CLI envelope, pushed through `cardano-cli` with retries, and
//! finally tracked in the mempool so read paths see it immediately. The
//! caller holds the global write lock for the whole pipeline.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use pallas::ledger::traverse::{Era, MultiEraTx};
use tracing::{info, warn};

use crate::cbor;
use crate::config::Config;
use crate::mempool::Mempool;
use crate::model::{SubmitTxResponse, TxEnvelope};
use crate::node::{parse_tx_submit_error, NodeClient};
use crate::prelude::Error;
use crate::wallet;

/// Raw transaction size cap, well above anything the ledger accepts.
pub const MAX_TX_BYTES: usize = 17000;

const MEMPOOL_TTL: Duration = Duration::from_secs(10 * 60);

const SUBMIT_ATTEMPTS: u32 = 3;

/// Interprets a request body according to its content type: raw CBOR,
/// a `{"cborHex": …}` envelope, or plain hex.
pub fn tx_bytes_from_body(content_type: Option<&str>, body: &[u8]) -> Result<Vec<u8>, Error> {
    let tx_bytes = match content_type {
        Some("application/cbor") => body.to_vec(),
        Some("application/json") => {
            let body = std::str::from_utf8(body)
                .map_err(|_| Error::parse("request body isn't valid utf-8"))?;

            let envelope: TxEnvelope = serde_json::from_str(body)
                .map_err(|err| Error::parse(format!("invalid request body: {err}")))?;

            hex::decode(&envelope.cbor_hex)
                .map_err(|err| Error::parse(format!("invalid request body: {err}")))?
        }
        _ => {
            let body = std::str::from_utf8(body)
                .map_err(|_| Error::parse("request body isn't valid utf-8"))?;

            hex::decode(body.trim())
                .map_err(|err| Error::parse(format!("invalid request body: {err}")))?
        }
    };

    if tx_bytes.len() > MAX_TX_BYTES {
        return Err(Error::parse("tx too big"));
    }

    Ok(tx_bytes)
}

/// Runs the full submission pipeline and answers the response wallets see.
pub async fn submit_tx(
    config: &Config,
    node: &NodeClient,
    mempool: &Mempool,
    tx_bytes: Vec<u8>,
) -> Result<SubmitTxResponse, Error> {
    let (tx_bytes, extra_signature) = sign_collateral_if_eligible(config, tx_bytes)?;

    let (tx_hash, declared_ttl) = {
        let parsed = MultiEraTx::decode(&tx_bytes).map_err(Error::parse)?;
        (parsed.hash().to_string(), parsed.ttl())
    };

    let envelope = TxEnvelope {
        cbor_hex: hex::encode(&tx_bytes),
        kind: "Tx ConwayEra".to_string(),
        description: "Submitted through the Iris gateway".to_string(),
    };

    let path = tx_tmp_path(&tx_hash);

    let content = serde_json::to_vec(&envelope).map_err(Error::server)?;
    tokio::fs::write(&path, content).await?;

    let message = submit_with_retries(node, &path).await?;

    let mut deadline = SystemTime::now() + MEMPOOL_TTL;

    if let Some(ttl_slot) = declared_ttl.filter(|t| *t > 0) {
        match node.slot_to_time(ttl_slot).await {
            Ok(t) if t < deadline => deadline = t,
            Ok(_) => {}
            Err(err) => warn!(error = %err, "unable to convert tx ttl, using default deadline"),
        }
    }

    mempool.add_tx(tx_bytes, Some(deadline))?;

    info!(%tx_hash, "transaction submitted");

    Ok(SubmitTxResponse {
        tx_id: tx_hash,
        message,
        extra_signatures: extra_signature.into_iter().collect(),
    })
}

/// Attaches the gateway's collateral signature, but only when the
/// transaction declares exactly the configured collateral input.
///
/// Anything that doesn't match simply passes through untouched: the
/// transaction already carries whatever signatures the wallet provided.
fn sign_collateral_if_eligible(
    config: &Config,
    tx_bytes: Vec<u8>,
) -> Result<(Vec<u8>, Option<String>), Error> {
    let Some(words) = &config.wallet else {
        return Ok((tx_bytes, None));
    };

    if config.collateral.is_empty() {
        return Ok((tx_bytes, None));
    }

    // all era and collateral checks happen on a scoped decode; only the tx
    // hash survives the scope
    let tx_hash = {
        let parsed = MultiEraTx::decode(&tx_bytes).map_err(Error::parse)?;

        if !matches!(parsed.era(), Era::Babbage | Era::Conway) {
            return Ok((tx_bytes, None));
        }

        let collateral = parsed.collateral();

        if collateral.len() != 1 {
            return Ok((tx_bytes, None));
        }

        if parsed.collateral_return().is_some() {
            return Ok((tx_bytes, None));
        }

        let input = &collateral[0];
        let input_id = format!("{}{}", input.hash(), input.index());

        if input_id != config.collateral {
            return Ok((tx_bytes, None));
        }

        parsed.hash()
    };

    let key = match wallet::first_enterprise_key(words) {
        Ok(key) => key,
        Err(err) => {
            warn!(error = %err, "unable to derive collateral wallet key");
            return Ok((tx_bytes, None));
        }
    };

    let signature = key.sign::<Vec<u8>>(tx_hash.as_slice());

    let witness_bytes = cbor::encode_tuple(&[
        cbor::encode_bytes(&key.public().public_key()),
        cbor::encode_bytes(signature.as_ref()),
    ]);

    let witness = cbor::decode(&witness_bytes)?;

    let Some(updated) = cbor::splice_vkey_witness(&tx_bytes, &witness)? else {
        warn!("tx witness set has an unexpected shape, not co-signing");
        return Ok((tx_bytes, None));
    };

    // the spliced bytes must still parse as a transaction
    MultiEraTx::decode(&updated).map_err(|err| {
        Error::message(format!(
            "failed to update tx bytes with collateral signature: {err}"
        ))
    })?;

    Ok((updated, Some(hex::encode(&witness_bytes))))
}

/// Submits with two retries (5 s then 10 s apart), but only while the
/// failure is a missing input. A missing input usually means a dependency
/// is still propagating; every other rejection is final.
async fn submit_with_retries(node: &NodeClient, path: &PathBuf) -> Result<String, Error> {
    let mut last_err = None;

    for attempt in 0..SUBMIT_ATTEMPTS {
        match node.submit_tx(path).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let parsed = parse_tx_submit_error(&err.to_string());

                if parsed.missing_inputs.is_empty() {
                    return Err(err);
                }

                warn!(attempt, "submit failed on missing inputs, retrying");
                last_err = Some(err);
            }
        }

        if attempt + 1 < SUBMIT_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(((attempt + 1) * 5) as u64)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| Error::message("submit failed")))
}

fn tx_tmp_path(tx_hash: &str) -> PathBuf {
    std::env::temp_dir().join(tx_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TX: &str = "84a30081825820af9f7a12bcc0825957a4fd909c8275866755e8a9178b51582d4ee938fb51cdee000181a200581d60b6a03720b0c3dae80b0e38b08f904eadb5372486f56a8e7a04af7c10011b0000000241fc7a40021a000f4240a100818258207dc72470db3c452fafdce8910a5da38fa763c2893c524f4a3b3610049fc34e1458406299bf7fd991d02af9822fdd72d71d7eede3f8d88545961a4ff714e4bdc8802fc94a8076c8407b7c8a6b9c49a785a29553f8e045ca3096394f7ba1d2090ee801f5f6";

    #[test]
    fn body_as_raw_cbor() {
        let body = hex::decode(TEST_TX).unwrap();

        let got = tx_bytes_from_body(Some("application/cbor"), &body).unwrap();
        assert_eq!(got, body);
    }

    #[test]
    fn body_as_json_envelope() {
        let body = format!(r#"{{"cborHex": "{TEST_TX}", "type": "Tx ConwayEra"}}"#);

        let got = tx_bytes_from_body(Some("application/json"), body.as_bytes()).unwrap();
        assert_eq!(got, hex::decode(TEST_TX).unwrap());
    }

    #[test]
    fn body_as_plain_hex() {
        for content_type in [Some("text/plain"), None, Some("application/octet-stream")] {
            let got = tx_bytes_from_body(content_type, TEST_TX.as_bytes()).unwrap();
            assert_eq!(got, hex::decode(TEST_TX).unwrap());
        }
    }

    #[test]
    fn invalid_bodies_are_rejected() {
        assert!(tx_bytes_from_body(None, b"not hex at all").is_err());
        assert!(tx_bytes_from_body(Some("application/json"), b"{\"cborHex\": 5}").is_err());
        assert!(tx_bytes_from_body(Some("application/json"), &[0xff, 0xfe]).is_err());
        assert!(tx_bytes_from_body(None, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn oversized_tx_is_rejected() {
        let body = vec![0u8; MAX_TX_BYTES + 1];

        assert!(tx_bytes_from_body(Some("application/cbor"), &body).is_err());

        let hex_body = hex::encode(&body);
        assert!(tx_bytes_from_body(None, hex_body.as_bytes()).is_err());
    }

    #[test]
    fn no_wallet_means_no_cosigning() {
        let config = crate::config::Config {
            wallet: None,
            collateral: format!("{}0", "ab".repeat(32)),
            network: crate::config::Network::Preprod,
        };

        let tx = hex::decode(TEST_TX).unwrap();
        let (out, sig) = sign_collateral_if_eligible(&config, tx.clone()).unwrap();

        assert_eq!(out, tx);
        assert!(sig.is_none());
    }

    #[test]
    fn tx_without_matching_collateral_passes_through() {
        let config = crate::config::Config {
            wallet: Some(vec!["abandon".into(); 24]),
            collateral: format!("{}0", "ab".repeat(32)),
            network: crate::config::Network::Preprod,
        };

        // the test tx declares no collateral inputs at all
        let tx = hex::decode(TEST_TX).unwrap();
        let (out, sig) = sign_collateral_if_eligible(&config, tx.clone()).unwrap();

        assert_eq!(out, tx);
        assert!(sig.is_none());
    }
}
