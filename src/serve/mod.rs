//! HTTP facade over the query/submit engine.
//!
//! Routing, CORS and content negotiation live here; the interesting logic
//! sits behind the [`Gateway`] in the subsystem modules. A single
//! process-wide RW lock serializes writers (submit, coin selection) against
//! readers that observe mempool state; routes that never touch the mempool
//! skip it entirely.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace};
use tracing::{warn, Level};

use crate::chain::ChainStore;
use crate::config::Config as GatewayConfig;
use crate::db::Db;
use crate::mempool::Mempool;
use crate::model::CborJsonEnvelope;
use crate::node::NodeClient;
use crate::params::ParamsCache;
use crate::prelude::Error;
use crate::selector::CoinSelector;

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
}

pub struct Gateway {
    pub config: GatewayConfig,
    pub node: NodeClient,
    pub db: Db,
    pub store: ChainStore,
    pub params: ParamsCache,
    pub mempool: Mempool,
    pub selector: CoinSelector,

    /// Global RW discipline: handlers that read mempool-visible state take
    /// the read half, submit and coin selection take the write half.
    /// Subsystem locks nest strictly inside this one.
    pub rw: tokio::sync::RwLock<()>,
}

pub type SharedState = Arc<Gateway>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/api/address/{addr}/utxos",
            get(routes::address::utxos).post(routes::address::select),
        )
        .route("/api/block/{block_id}", get(routes::blocks::content))
        .route(
            "/api/block/{block_id}/tx/{index}",
            get(routes::blocks::tx_content),
        )
        .route("/api/chain/tip", get(routes::chain::tip))
        .route("/api/parameters", get(routes::parameters::parameters))
        .route(
            "/api/policy/{policy}/assets",
            get(routes::policy::assets),
        )
        .route(
            "/api/policy/{policy}/asset/{asset_name}/addresses",
            get(routes::policy::asset_addresses),
        )
        .route("/api/mempool", get(routes::mempool::hashes))
        .route("/api/tx", post(routes::tx::submit))
        .route("/api/tx/{tx_id}", get(routes::tx::content))
        .route("/api/tx/{tx_id}/block", get(routes::tx::block_info))
        .route("/api/tx/{tx_id}/output/{index}", get(routes::tx::output))
        .route("/api/utxo/{utxo_id}", get(routes::utxo::content))
        .route("/config/wallet", get(routes::config::wallet))
        .route("/config/collateral", get(routes::config::collateral))
        .fallback(routes::invalid_endpoint)
        .with_state(state)
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

pub async fn serve(cfg: Config, state: SharedState, exit: CancellationToken) -> Result<(), Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(cfg.listen_address)
        .await
        .map_err(|err| Error::server(format!("failed to bind listener: {err}")))?;

    tracing::info!(address = %cfg.listen_address, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { exit.cancelled().await })
        .await
        .map_err(Error::server)?;

    Ok(())
}

/// Two independent loops: a tip poller that keeps the chain store in sync
/// with the node, and a one-shot index creation that retries until db-sync
/// is ready for it.
pub fn spawn_background_tasks(state: SharedState, exit: CancellationToken) {
    let poller_state = state.clone();
    let poller_exit = exit.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = poller_exit.cancelled() => return,
            }

            match poller_state.node.tip().await {
                // only trust the archive once the node reports full sync
                Ok(tip) if tip.sync_progress.starts_with("100") => {
                    poller_state.store.notify_tip(&tip.hash);
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "tip poll failed"),
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(120)) => {}
                _ = exit.cancelled() => return,
            }

            match state.db.create_indices().await {
                Ok(()) => return,
                Err(err) => warn!(error = %err, "failed to create indices, retrying later"),
            }
        }
    });
}

/// CBOR payloads negotiate on `Accept`: raw bytes, a `{"cborHex"}` JSON
/// envelope, or plain hex text.
pub(crate) fn respond_cbor(headers: &HeaderMap, cbor: Vec<u8>, status: StatusCode) -> Response {
    match accept(headers) {
        Some("application/cbor") => (
            status,
            [(header::CONTENT_TYPE, "application/cbor")],
            cbor,
        )
            .into_response(),
        Some("application/json") => {
            (status, Json(CborJsonEnvelope::new(&cbor))).into_response()
        }
        _ => (
            status,
            [(header::CONTENT_TYPE, "text/plain")],
            hex::encode(cbor),
        )
            .into_response(),
    }
}

pub(crate) fn accept(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())
}

pub(crate) fn internal_error(err: Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {err}"),
    )
        .into_response()
}

pub(crate) fn not_found(msg: impl Into<String>) -> Response {
    (StatusCode::NOT_FOUND, msg.into()).into_response()
}

pub(crate) fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, msg.into()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::Network;

    /// A gateway over empty stores and unreachable external services; good
    /// enough for routes that never leave the process.
    fn test_state() -> SharedState {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("immutable")).unwrap();
        std::fs::create_dir_all(dir.path().join("volatile")).unwrap();

        let store = ChainStore::load(dir.path()).unwrap();

        Arc::new(Gateway {
            config: GatewayConfig {
                wallet: None,
                collateral: String::new(),
                network: Network::Preprod,
            },
            node: crate::node::NodeClient::new(Network::Preprod, "/nonexistent.socket"),
            db: Db::unreachable_for_tests(),
            store,
            params: ParamsCache::new(),
            mempool: Mempool::new(),
            selector: CoinSelector::new(),
            rw: tokio::sync::RwLock::new(()),
        })
    }

    async fn get(path: &str) -> (StatusCode, Vec<u8>) {
        let app = router(test_state());

        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();

        (status, body.to_vec())
    }

    #[tokio::test]
    async fn unknown_endpoint_is_404() {
        let (status, body) = get("/api/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8(body).unwrap().contains("invalid endpoint"));
    }

    #[tokio::test]
    async fn mainnet_address_rejected_on_preprod() {
        let (status, body) = get("/api/address/addr1qxyz/utxos").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(String::from_utf8(body).unwrap(), "invalid address");
    }

    #[tokio::test]
    async fn unknown_block_is_404() {
        let (status, _) = get(&format!("/api/block/{}", "00".repeat(32))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_utxo_id_is_404() {
        let (status, _) = get("/api/utxo/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&format!("/api/utxo/{}notanumber", "00".repeat(32))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unconfigured_wallet_views_are_404() {
        let (status, _) = get("/config/wallet").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get("/config/collateral").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_submit_body_is_rejected() {
        let app = router(test_state());

        let body = "00".repeat(crate::submit::MAX_TX_BYTES + 1);

        let response = app
            .oneshot(
                Request::post("/api/tx")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_policy_is_404() {
        let (status, _) = get("/api/policy/nothex/assets").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // right hex, wrong length
        let (status, _) = get("/api/policy/abcd/assets").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
