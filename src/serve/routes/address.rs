//! Address UTXO reads and coin selection.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use num_bigint::BigInt;

use crate::cbor;
use crate::model::{SelectRequest, Utxo};
use crate::prelude::Error;
use crate::serve::{bad_request, internal_error, not_found, respond_cbor, SharedState};

const SELECTION_LOCK_TTL: Duration = Duration::from_secs(10);

pub async fn utxos(
    State(state): State<SharedState>,
    Path(addr): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.config.network.valid_address(&addr) {
        return not_found("invalid address");
    }

    let _read = state.rw.read().await;

    let asset = query.get("asset").cloned().unwrap_or_default();

    match address_utxos(&state, &addr, &asset).await {
        Ok(utxos) => respond_utxos(&headers, &utxos),
        Err(err) => internal_error(err),
    }
}

pub async fn select(
    State(state): State<SharedState>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !state.config.network.valid_address(&addr) {
        return not_found("invalid address");
    }

    let _write = state.rw.write().await;

    let req: SelectRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return bad_request(format!("failed to decode request: {err}")),
    };

    let utxos = match address_utxos(&state, &addr, &req.asset).await {
        Ok(utxos) => utxos,
        Err(err) => return internal_error(err),
    };

    state.selector.prune_expired();

    let utxos: Vec<Utxo> = utxos
        .into_iter()
        .filter(|u| !state.selector.is_locked(&u.key()))
        .collect();

    let Some(selected) = run_selection(utxos, &req) else {
        return not_found("not enough UTXOs");
    };

    for utxo in &selected {
        state.selector.lock(&utxo.key(), SELECTION_LOCK_TTL);
    }

    respond_utxos(&headers, &selected)
}

/// Greedy accumulation over the sorted candidates until both the lovelace
/// and (when requested) asset targets are met. `None` when the address
/// can't cover the request.
fn run_selection(mut utxos: Vec<Utxo>, req: &SelectRequest) -> Option<Vec<Utxo>> {
    let descending = req.algorithm.eq_ignore_ascii_case("largest")
        || req.algorithm.eq_ignore_ascii_case("largest-first");

    utxos.sort_by(|a, b| {
        let la = lovelace_of(a);
        let lb = lovelace_of(b);

        if descending {
            lb.cmp(&la)
        } else {
            la.cmp(&lb)
        }
    });

    let need_lovelace: BigInt = req.lovelace.parse().unwrap_or_default();
    let need_asset: BigInt = req.min_quantity.parse().unwrap_or_default();

    let mut got_lovelace = BigInt::ZERO;
    let mut got_asset = BigInt::ZERO;

    let mut selected = Vec::new();

    for utxo in utxos {
        got_lovelace += lovelace_of(&utxo);

        if !req.asset.is_empty() {
            for asset in &utxo.assets {
                if asset.asset.eq_ignore_ascii_case(&req.asset) {
                    got_asset += asset.quantity.parse::<BigInt>().unwrap_or_default();
                }
            }
        }

        selected.push(utxo);

        if got_lovelace >= need_lovelace && (req.asset.is_empty() || got_asset >= need_asset) {
            break;
        }
    }

    if got_lovelace < need_lovelace || (!req.asset.is_empty() && got_asset < need_asset) {
        return None;
    }

    Some(selected)
}

/// SQL view plus the mempool overlay, with the filter matching the query.
async fn address_utxos(state: &SharedState, addr: &str, asset: &str) -> Result<Vec<Utxo>, Error> {
    state.mempool.prune(&state.db).await;

    let (base, filter): (Vec<Utxo>, Box<dyn Fn(&Utxo) -> bool + Send>) = if asset.is_empty() {
        let base = state.db.address_utxos(addr).await?;

        let addr = addr.to_string();
        (base, Box::new(move |u: &Utxo| u.address == addr))
    } else if asset.eq_ignore_ascii_case("lovelace") {
        let base = state.db.address_utxos_with_asset(addr, asset).await?;

        let addr = addr.to_string();
        (
            base,
            Box::new(move |u: &Utxo| u.address == addr && u.assets.is_empty()),
        )
    } else {
        let base = state.db.address_utxos_with_asset(addr, asset).await?;

        let addr = addr.to_string();
        let asset = asset.to_string();
        (
            base,
            Box::new(move |u: &Utxo| {
                u.address == addr && u.assets.iter().any(|a| a.asset.eq_ignore_ascii_case(&asset))
            }),
        )
    };

    Ok(state.mempool.overlay(base, filter))
}

fn lovelace_of(utxo: &Utxo) -> BigInt {
    utxo.lovelace.parse().unwrap_or_default()
}

/// A UTXO list is JSON by default, or a CBOR list of encoded UTXOs when the
/// client asks for CBOR.
fn respond_utxos(headers: &HeaderMap, utxos: &[Utxo]) -> Response {
    if crate::serve::accept(headers) != Some("application/cbor") {
        return Json(utxos).into_response();
    }

    let mut entries = Vec::with_capacity(utxos.len());

    for utxo in utxos {
        match cbor::encode_utxo(utxo) {
            Ok(encoded) => entries.push(encoded),
            Err(err) => return internal_error(err),
        }
    }

    respond_cbor(headers, cbor::encode_list(&entries), StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(index: u32, lovelace: &str, asset_quantity: Option<&str>) -> Utxo {
        Utxo {
            tx_id: "ab".repeat(32),
            output_index: index,
            address: "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp".into(),
            lovelace: lovelace.into(),
            assets: asset_quantity
                .map(|q| {
                    vec![crate::model::PolicyAsset {
                        asset: format!("{}{}", "cd".repeat(28), "beef"),
                        quantity: q.into(),
                    }]
                })
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    fn request(lovelace: &str, algorithm: &str) -> SelectRequest {
        SelectRequest {
            lovelace: lovelace.into(),
            algorithm: algorithm.into(),
            ..Default::default()
        }
    }

    #[test]
    fn smallest_first_by_default() {
        let utxos = vec![utxo(0, "5000000", None), utxo(1, "1000000", None)];

        let selected = run_selection(utxos, &request("1000000", "")).unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].lovelace, "1000000");
    }

    #[test]
    fn largest_first_when_requested() {
        for algorithm in ["largest", "Largest-First"] {
            let utxos = vec![utxo(0, "1000000", None), utxo(1, "5000000", None)];

            let selected = run_selection(utxos, &request("1000000", algorithm)).unwrap();

            assert_eq!(selected.len(), 1);
            assert_eq!(selected[0].lovelace, "5000000");
        }
    }

    #[test]
    fn accumulates_until_target() {
        let utxos = vec![
            utxo(0, "1000000", None),
            utxo(1, "2000000", None),
            utxo(2, "4000000", None),
        ];

        let selected = run_selection(utxos, &request("3000000", "")).unwrap();

        // 1 + 2 meets the target, the third stays untouched
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn shortfall_yields_none() {
        let utxos = vec![utxo(0, "1000000", None)];

        assert!(run_selection(utxos, &request("2000000", "")).is_none());
    }

    #[test]
    fn asset_target_must_also_be_met() {
        let asset_id = format!("{}{}", "cd".repeat(28), "beef");

        let utxos = vec![utxo(0, "1000000", Some("5")), utxo(1, "1000000", Some("5"))];

        let req = SelectRequest {
            lovelace: "1000000".into(),
            asset: asset_id.clone(),
            min_quantity: "10".into(),
            algorithm: String::new(),
        };

        let selected = run_selection(utxos, &req).unwrap();
        assert_eq!(selected.len(), 2);

        let req_too_much = SelectRequest {
            min_quantity: "11".into(),
            ..req
        };

        assert!(run_selection(
            vec![utxo(0, "1000000", Some("5")), utxo(1, "1000000", Some("5"))],
            &req_too_much
        )
        .is_none());
    }

    #[test]
    fn asset_matching_is_case_insensitive() {
        let utxos = vec![utxo(0, "1000000", Some("5"))];

        let req = SelectRequest {
            lovelace: "1".into(),
            asset: format!("{}{}", "CD".repeat(28), "BEEF"),
            min_quantity: "5".into(),
            algorithm: String::new(),
        };

        assert!(run_selection(utxos, &req).is_some());
    }
}
