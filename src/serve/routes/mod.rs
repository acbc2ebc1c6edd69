pub mod address;
pub mod blocks;
pub mod chain;
pub mod config;
pub mod mempool;
pub mod parameters;
pub mod policy;
pub mod tx;
pub mod utxo;

use axum::http::Uri;
use axum::response::Response;

use super::not_found;

pub async fn invalid_endpoint(uri: Uri) -> Response {
    not_found(format!("invalid endpoint '{}'", uri.path()))
}
