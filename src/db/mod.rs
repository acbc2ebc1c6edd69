//! Read-only access to the cardano-db-sync PostgreSQL index.
//!
//! Connections come out of a deadpool pool over the local UNIX socket, the
//! standard setup next to a db-sync instance. All queries are parameterized
//! and live in [`queries`].

mod queries;

use deadpool_postgres::{Pool, Runtime};
use tokio_postgres::{NoTls, Row};

use crate::config::Network;
use crate::model::{AssetAddress, PolicyAsset, TxBlockInfo, Utxo};
use crate::prelude::Error;

pub struct Db {
    pool: Pool,
}

impl Db {
    pub fn connect(network: Network) -> Result<Self, Error> {
        let mut cfg = deadpool_postgres::Config::new();

        cfg.user = Some("root".to_string());
        cfg.host = Some("/var/run/postgresql".to_string());
        cfg.port = Some(5432);
        cfg.dbname = Some(format!("cardano_{}", network.name()));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(Error::sql)?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn unreachable_for_tests() -> Self {
        let mut cfg = deadpool_postgres::Config::new();

        cfg.host = Some("127.0.0.1".to_string());
        cfg.port = Some(1);
        cfg.dbname = Some("unreachable".to_string());

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .expect("pool creation is lazy");

        Self { pool }
    }

    pub async fn address_utxos(&self, addr: &str) -> Result<Vec<Utxo>, Error> {
        let client = self.pool.get().await?;

        let rows = client
            .query(queries::address_utxos().as_str(), &[&addr])
            .await?;

        rows.iter().map(|row| utxo_row(row, addr)).collect()
    }

    pub async fn address_utxos_with_asset(
        &self,
        addr: &str,
        asset: &str,
    ) -> Result<Vec<Utxo>, Error> {
        let client = self.pool.get().await?;

        let rows = client
            .query(queries::address_utxos_with_asset().as_str(), &[&addr, &asset])
            .await?;

        rows.iter().map(|row| utxo_row(row, addr)).collect()
    }

    /// The UTXO row keyed by `(tx_id, index)`, including who consumed it.
    pub async fn utxo(&self, tx_id: &str, index: u32) -> Result<Option<Utxo>, Error> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(queries::utxo().as_str(), &[&tx_id, &(index as i32)])
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Utxo {
            tx_id: tx_id.to_string(),
            output_index: index,
            address: row.get(0),
            lovelace: row.get(1),
            assets: parse_assets(row.get(2))?,
            datum_hash: row.get::<_, Option<String>>(3).unwrap_or_default(),
            inline_datum: row.get::<_, Option<String>>(4).unwrap_or_default(),
            ref_script: row.get::<_, Option<String>>(5).unwrap_or_default(),
            consumed_by: row.get::<_, Option<String>>(6).unwrap_or_default(),
        }))
    }

    pub async fn asset_addresses(&self, asset: &str) -> Result<Vec<AssetAddress>, Error> {
        let client = self.pool.get().await?;

        let rows = client.query(queries::ASSET_ADDRESSES, &[&asset]).await?;

        Ok(rows
            .iter()
            .map(|row| AssetAddress {
                address: row.get(0),
                quantity: row.get(1),
            })
            .collect())
    }

    pub async fn policy_assets(&self, policy_hex: &str) -> Result<Vec<PolicyAsset>, Error> {
        let client = self.pool.get().await?;

        let rows = client.query(queries::POLICY_ASSETS, &[&policy_hex]).await?;

        Ok(rows
            .iter()
            .map(|row| PolicyAsset {
                asset: row.get(0),
                quantity: row.get(1),
            })
            .collect())
    }

    pub async fn tx_block_info(&self, tx_id: &str) -> Result<Option<TxBlockInfo>, Error> {
        let client = self.pool.get().await?;

        let row = client.query_opt(queries::TX_BLOCK_INFO, &[&tx_id]).await?;

        Ok(row.map(|row| TxBlockInfo {
            hash: row.get(0),
            block_id: row.get(1),
            block_height: row.get::<_, i32>(2) as u32,
            block_time: row.get::<_, i64>(3) as u64,
            slot: row.get::<_, i64>(4) as u64,
            index: row.get::<_, i32>(5) as u32,
        }))
    }

    /// Of `tx_ids`, the ones the ledger does NOT know about. The mempool
    /// keeps exactly these.
    pub async fn filter_missing_txs(&self, tx_ids: &[String]) -> Result<Vec<String>, Error> {
        let client = self.pool.get().await?;

        let ids: Vec<String> = tx_ids.to_vec();

        let rows = client.query(queries::FILTER_MISSING_TXS, &[&ids]).await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Idempotent creation of the hex-lookup indices the gateway's queries
    /// rely on. db-sync must have finished its own schema setup first,
    /// hence the retry loop around this in the server.
    pub async fn create_indices(&self) -> Result<(), Error> {
        let client = self.pool.get().await?;

        for statement in queries::CREATE_INDICES {
            client.execute(*statement, &[]).await?;
        }

        Ok(())
    }
}

fn utxo_row(row: &Row, addr: &str) -> Result<Utxo, Error> {
    Ok(Utxo {
        tx_id: row.get(0),
        output_index: row.get::<_, i32>(1) as u32,
        address: addr.to_string(),
        lovelace: row.get(2),
        assets: parse_assets(row.get(3))?,
        datum_hash: row.get::<_, Option<String>>(4).unwrap_or_default(),
        inline_datum: row.get::<_, Option<String>>(5).unwrap_or_default(),
        ref_script: row.get::<_, Option<String>>(6).unwrap_or_default(),
        consumed_by: String::new(),
    })
}

fn parse_assets(raw: Option<String>) -> Result<Vec<PolicyAsset>, Error> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).map_err(Error::sql),
        None => Ok(Vec::new()),
    }
}
