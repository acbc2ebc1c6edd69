//! Typed wrapper around the local node's CLI.
//!
//! Every operation shells out to `cardano-cli` with the configured network
//! selector and UNIX socket. Replies are JSON or CBOR-hex on stdout;
//! structured failure details only exist as prose on stderr, which
//! [`errors::parse_tx_submit_error`] picks apart.

mod errors;

pub use errors::{parse_tx_submit_error, CollateralInfo, TxIn, TxSubmitError, ValueMismatch};

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::Network;
use crate::prelude::Error;

pub const DEFAULT_SOCKET_PATH: &str = "/run/cardano-node/node.socket";

pub struct NodeClient {
    network: Network,
    socket_path: String,
}

/// `cardano-cli query tip` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tip {
    pub block: u64,
    pub epoch: u64,
    pub era: String,
    pub hash: String,
    pub slot: u64,
    #[serde(rename = "slotInEpoch")]
    pub slot_in_epoch: u64,
    #[serde(rename = "slotsToEpochEnd")]
    pub slots_to_epoch_end: i64,
    #[serde(rename = "syncProgress")]
    pub sync_progress: String,
}

/// The subset of `cardano-cli query protocol-parameters` the gateway
/// projects for wallets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawParameters {
    #[serde(rename = "collateralPercentage")]
    pub collateral_percentage: u64,

    #[serde(rename = "costModels")]
    pub cost_models: CostModels,

    #[serde(rename = "executionUnitPrices")]
    pub execution_unit_prices: ExecutionUnitPrices,

    #[serde(rename = "maxCollateralInputs")]
    pub max_collateral_inputs: u64,

    #[serde(rename = "maxTxExecutionUnits")]
    pub max_tx_execution_units: ExecutionUnits,

    #[serde(rename = "maxTxSize")]
    pub max_tx_size: u64,

    #[serde(rename = "minFeeRefScriptCostPerByte")]
    pub min_fee_ref_script_cost_per_byte: u64,

    #[serde(rename = "stakeAddressDeposit")]
    pub stake_address_deposit: i64,

    #[serde(rename = "txFeeFixed")]
    pub tx_fee_fixed: u64,

    #[serde(rename = "txFeePerByte")]
    pub tx_fee_per_byte: u64,

    #[serde(rename = "utxoCostPerByte")]
    pub utxo_cost_per_byte: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostModels {
    #[serde(rename = "PlutusV1", default)]
    pub plutus_v1: Vec<i64>,
    #[serde(rename = "PlutusV2", default)]
    pub plutus_v2: Vec<i64>,
    #[serde(rename = "PlutusV3", default)]
    pub plutus_v3: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionUnitPrices {
    #[serde(rename = "priceMemory", default)]
    pub price_memory: f64,
    #[serde(rename = "priceSteps", default)]
    pub price_steps: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionUnits {
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub steps: i64,
}

/// Normalized parameter projection served to wallets. Reference tip time is
/// milliseconds since epoch; the slot length is pinned to one second, which
/// only holds within Shelley-era boundaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkParams {
    #[serde(rename = "collateralUTXO", skip_serializing_if = "String::is_empty")]
    pub collateral_utxo: String,

    #[serde(rename = "collateralPercentage")]
    pub collateral_percentage: u64,

    #[serde(rename = "costModelParamsV1")]
    pub cost_model_params_v1: Vec<i64>,

    #[serde(rename = "costModelParamsV2")]
    pub cost_model_params_v2: Vec<i64>,

    #[serde(rename = "costModelParamsV3")]
    pub cost_model_params_v3: Vec<i64>,

    #[serde(rename = "exCpuFeePerUnit")]
    pub ex_cpu_fee_per_unit: f64,

    #[serde(rename = "exMemFeePerUnit")]
    pub ex_mem_fee_per_unit: f64,

    #[serde(rename = "maxCollateralInputs")]
    pub max_collateral_inputs: u64,

    #[serde(rename = "maxTxExCpu")]
    pub max_tx_ex_cpu: i64,

    #[serde(rename = "maxTxExMem")]
    pub max_tx_ex_mem: i64,

    #[serde(rename = "maxTxSize")]
    pub max_tx_size: u64,

    #[serde(rename = "refScriptsFeePerByte")]
    pub ref_scripts_fee_per_byte: u64,

    #[serde(rename = "refTipSlot")]
    pub ref_tip_slot: u64,

    #[serde(rename = "refTipTime")]
    pub ref_tip_time: i64,

    #[serde(rename = "secondsPerSlot")]
    pub seconds_per_slot: u64,

    #[serde(rename = "stakeAddrDeposit")]
    pub stake_addr_deposit: i64,

    #[serde(rename = "txFeeFixed")]
    pub tx_fee_fixed: u64,

    #[serde(rename = "txFeePerByte")]
    pub tx_fee_per_byte: u64,

    #[serde(rename = "utxoDepositPerByte")]
    pub utxo_deposit_per_byte: u64,
}

impl NodeClient {
    pub fn new(network: Network, socket_path: impl Into<String>) -> Self {
        Self {
            network,
            socket_path: socket_path.into(),
        }
    }

    async fn invoke(&self, args: &[&str]) -> Result<String, Error> {
        let mut cmd = Command::new("cardano-cli");

        cmd.args(args);

        match self.network {
            Network::Mainnet => {
                cmd.arg("--mainnet");
            }
            Network::Preprod => {
                cmd.args(["--testnet-magic", "1"]);
            }
        }

        cmd.args(["--socket-path", &self.socket_path]);

        let output = cmd.output().await.map_err(Error::node)?;

        if !output.status.success() {
            return Err(Error::NodeError(format!(
                "command failed: {}, {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// UTXOs at an address as raw CBOR (a map keyed by output refs).
    pub async fn address_utxos(&self, address: &str) -> Result<Vec<u8>, Error> {
        let cbor_hex = self
            .invoke(&["query", "utxo", "--address", address, "--output-cbor"])
            .await?;

        hex::decode(cbor_hex.trim()).map_err(Error::node)
    }

    /// A single UTXO as raw CBOR. The node answers an empty map for unknown
    /// (or spent) outputs, which maps to `None` here; the caller can consult
    /// db-sync to tell the two apart.
    pub async fn utxo(&self, tx_id: &str, index: u32) -> Result<Option<Vec<u8>>, Error> {
        let cbor_hex = self
            .invoke(&[
                "query",
                "utxo",
                "--tx-in",
                &format!("{tx_id}#{index}"),
                "--output-cbor",
            ])
            .await?;

        let cbor_hex = cbor_hex.trim();

        if cbor_hex == "a0" {
            return Ok(None);
        }

        hex::decode(cbor_hex).map(Some).map_err(Error::node)
    }

    pub async fn tip(&self) -> Result<Tip, Error> {
        let raw = self.invoke(&["query", "tip"]).await?;

        serde_json::from_str(&raw).map_err(Error::node)
    }

    pub async fn protocol_parameters(&self) -> Result<RawParameters, Error> {
        let raw = self.invoke(&["query", "protocol-parameters"]).await?;

        serde_json::from_str(&raw).map_err(Error::node)
    }

    /// Submits the envelope file at `path`, returning the CLI's stdout.
    pub async fn submit_tx(&self, path: &Path) -> Result<String, Error> {
        self.invoke(&[
            "latest",
            "transaction",
            "submit",
            "--tx-file",
            &path.to_string_lossy(),
        ])
        .await
    }

    pub async fn time_to_slot(&self, t: SystemTime) -> Result<u64, Error> {
        let formatted: DateTime<Utc> = t.into();
        let formatted = formatted.to_rfc3339_opts(SecondsFormat::Secs, true);

        let raw = self.invoke(&["query", "slot-number", &formatted]).await?;

        raw.trim().parse().map_err(Error::node)
    }

    /// Wall-clock time at which `slot` is (or was) reached, anchored on the
    /// current reference point and a one-second slot length.
    pub async fn slot_to_time(&self, slot: u64) -> Result<SystemTime, Error> {
        let (ref_time, ref_slot) = self.ref_time_and_slot().await?;

        let diff = slot as i64 - ref_slot as i64;

        if diff >= 0 {
            Ok(ref_time + Duration::from_secs(diff as u64))
        } else {
            Ok(ref_time - Duration::from_secs(diff.unsigned_abs()))
        }
    }

    /// Samples now (truncated to seconds, the CLI resolution) together with
    /// its slot number.
    pub async fn ref_time_and_slot(&self) -> Result<(SystemTime, u64), Error> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(Error::node)?
            .as_secs();

        let ref_time = UNIX_EPOCH + Duration::from_secs(secs);

        let ref_slot = self.time_to_slot(ref_time).await?;

        Ok((ref_time, ref_slot))
    }

    /// Fetches and projects protocol parameters into the normalized shape.
    pub async fn derive_params(&self) -> Result<NetworkParams, Error> {
        let raw = self.protocol_parameters().await?;

        let (ref_time, ref_slot) = self.ref_time_and_slot().await?;

        let ref_tip_time = ref_time
            .duration_since(UNIX_EPOCH)
            .map_err(Error::node)?
            .as_secs() as i64
            * 1000;

        Ok(NetworkParams {
            collateral_utxo: String::new(),
            collateral_percentage: raw.collateral_percentage,
            cost_model_params_v1: raw.cost_models.plutus_v1,
            cost_model_params_v2: raw.cost_models.plutus_v2,
            cost_model_params_v3: raw.cost_models.plutus_v3,
            ex_cpu_fee_per_unit: raw.execution_unit_prices.price_steps,
            ex_mem_fee_per_unit: raw.execution_unit_prices.price_memory,
            max_collateral_inputs: raw.max_collateral_inputs,
            max_tx_ex_cpu: raw.max_tx_execution_units.steps,
            max_tx_ex_mem: raw.max_tx_execution_units.memory,
            max_tx_size: raw.max_tx_size,
            ref_scripts_fee_per_byte: raw.min_fee_ref_script_cost_per_byte,
            ref_tip_slot: ref_slot,
            ref_tip_time,
            seconds_per_slot: 1,
            stake_addr_deposit: raw.stake_address_deposit,
            tx_fee_fixed: raw.tx_fee_fixed,
            tx_fee_per_byte: raw.tx_fee_per_byte,
            utxo_deposit_per_byte: raw.utxo_cost_per_byte,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_json_shape() {
        let raw = r#"{
            "block": 3219735,
            "epoch": 195,
            "era": "Conway",
            "hash": "8ed8b2ca61097dcefe23a5b9d347c51336d4bf7a5d47b6ab44b7c1b5d84a0a8b",
            "slot": 84220265,
            "slotInEpoch": 61865,
            "slotsToEpochEnd": 370135,
            "syncProgress": "100.00"
        }"#;

        let tip: Tip = serde_json::from_str(raw).unwrap();

        assert_eq!(tip.slot, 84220265);
        assert!(tip.sync_progress.starts_with("100"));
        assert_eq!(tip.slots_to_epoch_end, 370135);
    }

    #[test]
    fn parameter_projection() {
        let raw: RawParameters = serde_json::from_str(
            r#"{
                "collateralPercentage": 150,
                "costModels": {"PlutusV1": [1, 2], "PlutusV2": [3], "PlutusV3": []},
                "executionUnitPrices": {"priceMemory": 0.0577, "priceSteps": 0.0000721},
                "maxCollateralInputs": 3,
                "maxTxExecutionUnits": {"memory": 14000000, "steps": 10000000000},
                "maxTxSize": 16384,
                "minFeeRefScriptCostPerByte": 15,
                "stakeAddressDeposit": 2000000,
                "txFeeFixed": 155381,
                "txFeePerByte": 44,
                "utxoCostPerByte": 4310
            }"#,
        )
        .unwrap();

        assert_eq!(raw.collateral_percentage, 150);
        assert_eq!(raw.cost_models.plutus_v1, vec![1, 2]);
        assert_eq!(raw.max_tx_execution_units.steps, 10000000000);
        assert_eq!(raw.utxo_cost_per_byte, 4310);
    }

    #[test]
    fn network_params_serialized_field_names() {
        let params = NetworkParams {
            seconds_per_slot: 1,
            ..Default::default()
        };

        let json = serde_json::to_value(&params).unwrap();

        assert!(json.get("secondsPerSlot").is_some());
        assert!(json.get("refTipSlot").is_some());
        assert!(json.get("txFeePerByte").is_some());
        // absent collateral is omitted entirely
        assert!(json.get("collateralUTXO").is_none());
    }
}
