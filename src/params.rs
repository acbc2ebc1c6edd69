//! Epoch-scoped cache of the normalized protocol parameters.
//!
//! Parameters only change at epoch boundaries, so the serialized response
//! is cached until the epoch ends. The refresh path also checks whether the
//! configured collateral UTXO is still unconsumed and owned by the gateway
//! wallet before advertising it.

use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tracing::warn;

use crate::config::Config;
use crate::db::Db;
use crate::node::NodeClient;
use crate::prelude::Error;
use crate::wallet;

#[derive(Default)]
struct CacheState {
    ttl: Option<SystemTime>,
    body: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct ParamsCache {
    state: RwLock<CacheState>,
}

impl ParamsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized JSON parameters, refreshed when the cached copy expired.
    pub async fn get(&self, config: &Config, node: &NodeClient, db: &Db) -> Result<Vec<u8>, Error> {
        {
            let state = self.state.read().await;

            if let (Some(body), Some(ttl)) = (&state.body, state.ttl) {
                if SystemTime::now() < ttl {
                    return Ok(body.clone());
                }
            }
        }

        let mut state = self.state.write().await;

        let mut params = node.derive_params().await?;

        if config.wallet.is_some() {
            if let Some((tx_id, index)) = config.collateral_parts() {
                if self.collateral_still_usable(config, db, tx_id, index).await {
                    params.collateral_utxo = config.collateral.clone();
                }
            }
        }

        let tip = node.tip().await?;

        let ttl = SystemTime::now() + Duration::from_secs(tip.slots_to_epoch_end.max(0) as u64);

        let body = serde_json::to_vec(&params).map_err(Error::server)?;

        state.body = Some(body.clone());
        state.ttl = Some(ttl);

        Ok(body)
    }

    /// The collateral is only advertised while it is unspent and sits at
    /// the wallet's own address. Lookup failures just mean "don't
    /// advertise", never a hard error.
    async fn collateral_still_usable(
        &self,
        config: &Config,
        db: &Db,
        tx_id: &str,
        index: u32,
    ) -> bool {
        let utxo = match db.utxo(tx_id, index).await {
            Ok(Some(utxo)) => utxo,
            Ok(None) => return false,
            Err(err) => {
                warn!(error = %err, "collateral lookup failed");
                return false;
            }
        };

        if !utxo.consumed_by.is_empty() {
            return false;
        }

        let Some(words) = &config.wallet else {
            return false;
        };

        match wallet::first_enterprise_address(words, config.network) {
            Ok(addr) => utxo.address == addr,
            Err(err) => {
                warn!(error = %err, "unable to derive wallet address");
                false
            }
        }
    }
}
