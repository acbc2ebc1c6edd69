//! Single-field views of the loaded gateway configuration.

use std::collections::HashMap;

use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};

use crate::serve::{internal_error, not_found, SharedState};
use crate::wallet;

pub async fn wallet(State(state): State<SharedState>) -> Response {
    let Some(words) = &state.config.wallet else {
        return not_found("wallet not configured");
    };

    match wallet::first_enterprise_address(words, state.config.network) {
        Ok(address) => Json(HashMap::from([("address", address)])).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn collateral(State(state): State<SharedState>) -> Response {
    if state.config.collateral.is_empty() {
        return not_found("collateral not set");
    }

    Json(HashMap::from([(
        "collateral",
        state.config.collateral.clone(),
    )]))
    .into_response()
}
