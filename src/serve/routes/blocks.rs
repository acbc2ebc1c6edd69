//! Block reads straight from the chain store. No mempool state is
//! observable here, so these skip the global lock.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};

use crate::serve::{internal_error, not_found, respond_cbor, SharedState};

pub async fn content(
    State(state): State<SharedState>,
    Path(block_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.store.block(&block_id) {
        Ok(Some(block)) => respond_cbor(&headers, block.block_cbor().to_vec(), StatusCode::OK),
        Ok(None) => not_found(format!("block {block_id} not found")),
        Err(err) => internal_error(err),
    }
}

pub async fn tx_content(
    State(state): State<SharedState>,
    Path((block_id, index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Ok(index) = index.parse::<u32>() else {
        return not_found(format!("invalid tx index {index}"));
    };

    match state.store.block_tx(&block_id, index) {
        Ok(Some(tx)) => respond_cbor(&headers, tx, StatusCode::OK),
        Ok(None) => not_found(format!("transaction {index} of block {block_id} not found")),
        Err(err) => internal_error(err),
    }
}
