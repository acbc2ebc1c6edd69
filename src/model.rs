use serde::{Deserialize, Serialize};

/// An unspent (or, on the spent view, consumed) transaction output as it
/// crosses the JSON boundary. Quantities are decimal strings because JSON
/// has no unbounded integers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    #[serde(rename = "txID")]
    pub tx_id: String,

    #[serde(rename = "outputIndex")]
    pub output_index: u32,

    pub address: String,

    pub lovelace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<PolicyAsset>,

    #[serde(rename = "datumHash", default, skip_serializing_if = "String::is_empty")]
    pub datum_hash: String,

    #[serde(
        rename = "inlineDatum",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub inline_datum: String,

    #[serde(rename = "refScript", default, skip_serializing_if = "String::is_empty")]
    pub ref_script: String,

    #[serde(
        rename = "consumedBy",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub consumed_by: String,
}

impl Utxo {
    /// Short-lock key used by the coin selector, `txID ∥ decimal index`.
    pub fn key(&self) -> String {
        format!("{}{}", self.tx_id, self.output_index)
    }
}

/// Asset identified by hex-concatenated policy (28 bytes) and name (0-32
/// bytes), paired with an arbitrary-precision decimal quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyAsset {
    pub asset: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetAddress {
    pub address: String,
    pub quantity: String,
}

/// Block placement of a confirmed transaction, as reported by db-sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxBlockInfo {
    pub hash: String,

    #[serde(rename = "block")]
    pub block_id: String,

    pub block_height: u32,

    pub block_time: u64,

    pub slot: u64,

    pub index: u32,
}

/// Body of `POST /api/address/{addr}/utxos`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub lovelace: String,

    #[serde(default)]
    pub asset: String,

    #[serde(rename = "minQuantity", default)]
    pub min_quantity: String,

    #[serde(default)]
    pub algorithm: String,
}

/// JSON envelope understood by `cardano-cli transaction submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxEnvelope {
    #[serde(rename = "cborHex")]
    pub cbor_hex: String,

    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTxResponse {
    #[serde(rename = "txID")]
    pub tx_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(rename = "extraSignatures")]
    pub extra_signatures: Vec<String>,
}

/// Hex envelope used when a CBOR payload is requested as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CborJsonEnvelope {
    #[serde(rename = "cborHex")]
    pub cbor_hex: String,
}

impl CborJsonEnvelope {
    pub fn new(cbor: &[u8]) -> Self {
        Self {
            cbor_hex: hex::encode(cbor),
        }
    }
}
