//! Normalized protocol parameters, cached per epoch.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::serve::{internal_error, SharedState};

pub async fn parameters(State(state): State<SharedState>) -> Response {
    match state
        .params
        .get(&state.config, &state.node, &state.db)
        .await
    {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => internal_error(err),
    }
}
