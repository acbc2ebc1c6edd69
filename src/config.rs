//! Gateway configuration.
//!
//! Network, wallet and collateral settings live in single-value files under
//! `/etc/cardano-iris` so operators can manage them with plain shell
//! tooling. Everything else (listen address, paths) arrives through the
//! layered file/env config handled by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::prelude::Error;

pub const CONFIG_DIR: &str = "/etc/cardano-iris";

const WALLET_FILE: &str = "wallet";
const COLLATERAL_FILE: &str = "collateral";
const NETWORK_FILE: &str = "network";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Preprod,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Preprod => "preprod",
        }
    }

    /// Bech32 prefix check for payment addresses on this network.
    pub fn valid_address(&self, addr: &str) -> bool {
        match self {
            Network::Mainnet => addr.starts_with("addr1"),
            Network::Preprod => addr.starts_with("addr_test1"),
        }
    }
}

/// Immutable after load.
#[derive(Debug, Clone)]
pub struct Config {
    /// BIP-39 mnemonic of the collateral wallet, absent when the gateway
    /// shouldn't co-sign anything.
    pub wallet: Option<Vec<String>>,

    /// `<64-hex tx id><decimal index>` of the collateral UTXO to attach.
    pub collateral: String,

    pub network: Network,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        Self::load_from(Path::new(CONFIG_DIR))
    }

    pub fn load_from(dir: &Path) -> Result<Self, Error> {
        Ok(Self {
            wallet: read_wallet_phrase(&dir.join(WALLET_FILE))?,
            collateral: read_collateral(&dir.join(COLLATERAL_FILE))?,
            network: read_network(&dir.join(NETWORK_FILE))?,
        })
    }

    /// The collateral id split into tx id and output index, when the
    /// configured value is well-formed.
    pub fn collateral_parts(&self) -> Option<(&str, u32)> {
        if self.collateral.len() <= 64 {
            return None;
        }

        let (tx_id, index) = self.collateral.split_at(64);

        index.parse().ok().map(|index| (tx_id, index))
    }
}

fn read_optional(path: &PathBuf) -> Result<Option<String>, Error> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::config(format!(
            "error reading {}: {err}",
            path.display()
        ))),
    }
}

fn read_wallet_phrase(path: &PathBuf) -> Result<Option<Vec<String>>, Error> {
    let Some(content) = read_optional(path)? else {
        return Ok(None);
    };

    Ok(Some(
        content.split_whitespace().map(str::to_string).collect(),
    ))
}

fn read_collateral(path: &PathBuf) -> Result<String, Error> {
    Ok(read_optional(path)?.map(|c| c.trim().to_string()).unwrap_or_default())
}

fn read_network(path: &PathBuf) -> Result<Network, Error> {
    let Some(content) = read_optional(path)? else {
        return Ok(Network::Preprod);
    };

    match content.trim() {
        "mainnet" => Ok(Network::Mainnet),
        "preprod" => Ok(Network::Preprod),
        other => Err(Error::config(format!(
            "expected preprod or mainnet in {}, got {other}",
            path.display()
        ))),
    }
}
