//! Transaction submission and reads.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};

use crate::cbor;
use crate::serve::{bad_request, internal_error, not_found, respond_cbor, SharedState};
use crate::submit;

pub async fn submit(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _write = state.rw.write().await;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let tx_bytes = match submit::tx_bytes_from_body(content_type, &body) {
        Ok(tx_bytes) => tx_bytes,
        Err(err) => return bad_request(err.to_string()),
    };

    match submit::submit_tx(&state.config, &state.node, &state.mempool, tx_bytes).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => internal_error(err),
    }
}

/// Raw transaction CBOR: the mempool knows it first, db-sync plus the chain
/// store afterwards.
pub async fn content(
    State(state): State<SharedState>,
    Path(tx_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let _read = state.rw.read().await;

    if let Some(tx) = state.mempool.get_tx(&tx_id) {
        return respond_cbor(&headers, tx.bytes, StatusCode::OK);
    }

    let info = match state.db.tx_block_info(&tx_id).await {
        Ok(Some(info)) => info,
        Ok(None) => return not_found(format!("transaction {tx_id} not found")),
        Err(err) => return not_found(format!("failed to get tx {tx_id}: {err}")),
    };

    match state.store.block_tx(&info.block_id, info.index) {
        Ok(Some(tx)) => respond_cbor(&headers, tx, StatusCode::OK),
        Ok(None) => not_found(format!("transaction {tx_id} not found")),
        Err(err) => internal_error(err),
    }
}

pub async fn block_info(State(state): State<SharedState>, Path(tx_id): Path<String>) -> Response {
    match state.db.tx_block_info(&tx_id).await {
        Ok(Some(info)) => Json(info).into_response(),
        Ok(None) => not_found(format!("transaction {tx_id} not found")),
        Err(err) => internal_error(err),
    }
}

/// A single output, shaped as canonical CBOR. Mempool outputs are encoded
/// locally; confirmed ones come back from the node CLI verbatim.
pub async fn output(
    State(state): State<SharedState>,
    Path((tx_id, index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let _read = state.rw.read().await;

    let Ok(index) = index.parse::<u32>() else {
        return not_found(format!("invalid output index {index}"));
    };

    if let Some(utxo) = state.mempool.get_utxo(&tx_id, index) {
        return match cbor::encode_utxo(&utxo) {
            Ok(encoded) => respond_cbor(&headers, encoded, StatusCode::OK),
            Err(err) => internal_error(err),
        };
    }

    match state.node.utxo(&tx_id, index).await {
        Ok(Some(encoded)) => respond_cbor(&headers, encoded, StatusCode::OK),
        Ok(None) => not_found(format!("Tx output {tx_id}#{index} not found")),
        Err(err) => internal_error(err),
    }
}
