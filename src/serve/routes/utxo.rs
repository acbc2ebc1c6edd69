//! UTXO lookups by `txID ∥ index` with consumed-view semantics.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};

use crate::cbor;
use crate::serve::{accept, internal_error, not_found, respond_cbor, SharedState};

pub async fn content(
    State(state): State<SharedState>,
    Path(utxo_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let _read = state.rw.read().await;

    if utxo_id.len() <= 64 {
        return not_found(format!("invalid utxo id '{utxo_id}'"));
    }

    let (tx_id, index_str) = utxo_id.split_at(64);

    let Ok(index) = index_str.parse::<u32>() else {
        return not_found(format!("invalid utxo id '{utxo_id}'"));
    };

    let utxo = match state.mempool.get_utxo(tx_id, index) {
        Some(utxo) => utxo,
        None => match state.db.utxo(tx_id, index).await {
            Ok(Some(utxo)) => utxo,
            Ok(None) => return not_found(format!("UTXO {tx_id}#{index} not found")),
            Err(err) => return not_found(format!("UTXO {tx_id}#{index} not found ({err})")),
        },
    };

    // a consumed output still answers with its full content, but flags the
    // conflict and names the consumer
    let mut status = StatusCode::OK;
    let mut extra_headers = Vec::new();

    if !utxo.consumed_by.is_empty() {
        status = StatusCode::CONFLICT;
        extra_headers.push(("Consumed-By", utxo.consumed_by.clone()));
    }

    if accept(&headers) != Some("application/cbor") {
        return with_headers(extra_headers, (status, Json(&utxo)).into_response());
    }

    match cbor::encode_utxo(&utxo) {
        Ok(encoded) => with_headers(extra_headers, respond_cbor(&headers, encoded, status)),
        Err(err) => internal_error(err),
    }
}

fn with_headers(extra: Vec<(&'static str, String)>, mut response: Response) -> Response {
    for (name, value) in extra {
        if let Ok(value) = value.parse() {
            response.headers_mut().insert(name, value);
        }
    }

    response
}
