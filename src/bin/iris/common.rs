use std::path::PathBuf;
use std::sync::Arc;

use miette::{Context as _, IntoDiagnostic};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{filter::Targets, prelude::*};

use cardano_iris::chain::ChainStore;
use cardano_iris::config::Config as GatewayConfig;
use cardano_iris::db::Db;
use cardano_iris::mempool::Mempool;
use cardano_iris::node::{NodeClient, DEFAULT_SOCKET_PATH};
use cardano_iris::params::ParamsCache;
use cardano_iris::selector::CoinSelector;
use cardano_iris::serve::{Gateway, SharedState};

const DEFAULT_ARCHIVE_ROOT: &str = "/var/cache/cardano-node";

pub fn setup_tracing(config: &super::LoggingConfig) -> miette::Result<()> {
    let level = config
        .max_level
        .as_deref()
        .unwrap_or("info")
        .parse::<tracing::Level>()
        .into_diagnostic()
        .context("parsing log level")?;

    let mut filter = Targets::new()
        .with_target("cardano_iris", level)
        .with_target("iris", level);

    if config.include_pallas {
        filter = filter.with_target("pallas", level);
    }

    if config.include_tower {
        filter = filter.with_target("tower_http", level);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

pub fn setup_gateway(config: &super::Config) -> miette::Result<SharedState> {
    let gateway_config = GatewayConfig::load()
        .into_diagnostic()
        .context("loading gateway configuration")?;

    let node = NodeClient::new(
        gateway_config.network,
        config
            .node_socket
            .clone()
            .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string()),
    );

    let db = Db::connect(gateway_config.network)
        .into_diagnostic()
        .context("connecting to db-sync")?;

    let archive_dir = config.archive_dir.clone().unwrap_or_else(|| {
        PathBuf::from(DEFAULT_ARCHIVE_ROOT).join(gateway_config.network.name())
    });

    // this might take a while
    let store = ChainStore::load(&archive_dir)
        .into_diagnostic()
        .context("loading chain archive")?;

    Ok(Arc::new(Gateway {
        config: gateway_config,
        node,
        db,
        store,
        params: ParamsCache::new(),
        mempool: Mempool::new(),
        selector: CoinSelector::new(),
        rw: tokio::sync::RwLock::new(()),
    }))
}

#[inline]
async fn wait_for_exit_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("SIGINT detected");
        }
        _ = sigterm.recv() => {
            tracing::warn!("SIGTERM detected");
        }
    };
}

pub fn hook_exit_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel2 = cancel.clone();
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        debug!("notifying exit");
        cancel2.cancel();
    });

    cancel
}
