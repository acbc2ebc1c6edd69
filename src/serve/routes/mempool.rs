//! Mempool introspection.

use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};

use crate::serve::SharedState;

pub async fn hashes(State(state): State<SharedState>) -> Response {
    let _read = state.rw.read().await;

    state.mempool.prune(&state.db).await;

    Json(state.mempool.hashes()).into_response()
}
