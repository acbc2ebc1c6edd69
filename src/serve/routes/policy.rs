//! Asset lookups by minting policy.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
};

use crate::serve::{internal_error, not_found, SharedState};

fn decode_policy(policy_hex: &str) -> Result<Vec<u8>, Response> {
    let policy = hex::decode(policy_hex)
        .map_err(|err| not_found(format!("invalid policy: {err}")))?;

    if policy.len() != 28 {
        return Err(not_found("invalid policy length"));
    }

    Ok(policy)
}

pub async fn assets(State(state): State<SharedState>, Path(policy): Path<String>) -> Response {
    let policy = match decode_policy(&policy) {
        Ok(policy) => policy,
        Err(resp) => return resp,
    };

    match state.db.policy_assets(&hex::encode(policy)).await {
        Ok(assets) => Json(assets).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn asset_addresses(
    State(state): State<SharedState>,
    Path((policy, asset_name)): Path<(String, String)>,
) -> Response {
    let policy = match decode_policy(&policy) {
        Ok(policy) => policy,
        Err(resp) => return resp,
    };

    // an empty asset name is a valid (unnamed) asset
    let asset_name = match hex::decode(&asset_name) {
        Ok(name) => name,
        Err(err) => return not_found(format!("invalid asset name: {err}")),
    };

    if asset_name.len() > 32 {
        return not_found("asset name too big");
    }

    let full_asset = format!("{}{}", hex::encode(policy), hex::encode(asset_name));

    match state.db.asset_addresses(&full_asset).await {
        Ok(addresses) => Json(addresses).into_response(),
        Err(err) => internal_error(err),
    }
}
