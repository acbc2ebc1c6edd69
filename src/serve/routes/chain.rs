//! Chain tip, straight from the node.

use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};

use crate::serve::{internal_error, SharedState};

pub async fn tip(State(state): State<SharedState>) -> Response {
    match state.node.tip().await {
        Ok(tip) => Json(tip).into_response(),
        Err(err) => internal_error(err),
    }
}
