//! Classifier for `cardano-cli transaction submit` failures.
//!
//! The ledger reports rejections as Haskell show-output on stderr. The
//! submit pipeline only needs a handful of cases picked out of that prose:
//! which inputs were bad or unseen, value conservation mismatches, and
//! collateral problems. Everything else stays available as `raw`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxIn {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueMismatch {
    pub supplied: i64,
    pub expected: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollateralInfo {
    pub delta: i64,
    pub provided: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TxSubmitError {
    pub raw: String,

    #[serde(rename = "badInputs", skip_serializing_if = "Vec::is_empty")]
    pub bad_inputs: Vec<TxIn>,

    #[serde(rename = "missingInputs", skip_serializing_if = "Vec::is_empty")]
    pub missing_inputs: Vec<TxIn>,

    #[serde(rename = "valueMismatch", skip_serializing_if = "Option::is_none")]
    pub value_mismatch: Option<ValueMismatch>,

    #[serde(
        rename = "insufficientCollateral",
        skip_serializing_if = "Option::is_none"
    )]
    pub insufficient_collateral: Option<CollateralInfo>,

    #[serde(rename = "noCollateralInputs", skip_serializing_if = "std::ops::Not::not")]
    pub no_collateral_inputs: bool,
}

static RE_INSUFFICIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"InsufficientCollateral \(DeltaCoin \((-?\d+)\)\) \(Coin (\d+)\)").unwrap()
});

static RE_MISMATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ValueNotConservedUTxO .*?Coin ([0-9]+).*?Coin ([0-9]+)").unwrap());

static RE_BAD_INPUTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BadInputsUTxO \(fromList \[(.*?)\]\)").unwrap());

static RE_TX_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"TxIn \(TxId \{unTxId = SafeHash "([0-9a-f]+)"\}\) \(TxIx \{unTxIx = ([0-9]+)\}\)"#)
        .unwrap()
});

static RE_MISSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"TranslationLogicMissingInput \(TxIn \(TxId \{unTxId = SafeHash "([0-9a-f]+)"\}\) \(TxIx \{unTxIx = ([0-9]+)\}\)\)"#,
    )
    .unwrap()
});

pub fn parse_tx_submit_error(msg: &str) -> TxSubmitError {
    let mut res = TxSubmitError {
        raw: msg.to_string(),
        ..Default::default()
    };

    if let Some(caps) = RE_INSUFFICIENT.captures(msg) {
        res.insufficient_collateral = Some(CollateralInfo {
            delta: caps[1].parse().unwrap_or_default(),
            provided: caps[2].parse().unwrap_or_default(),
        });
    }

    res.no_collateral_inputs = msg.contains("NoCollateralInputs");

    if let Some(caps) = RE_MISMATCH.captures(msg) {
        res.value_mismatch = Some(ValueMismatch {
            supplied: caps[1].parse().unwrap_or_default(),
            expected: caps[2].parse().unwrap_or_default(),
        });
    }

    if let Some(caps) = RE_BAD_INPUTS.captures(msg) {
        for tx_in in RE_TX_IN.captures_iter(&caps[1]) {
            res.bad_inputs.push(TxIn {
                tx_id: tx_in[1].to_string(),
                index: tx_in[2].parse().unwrap_or_default(),
            });
        }
    }

    for caps in RE_MISSING.captures_iter(msg) {
        res.missing_inputs.push(TxIn {
            tx_id: caps[1].to_string(),
            index: caps[2].parse().unwrap_or_default(),
        });
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_inputs_value_mismatch_and_missing_input() {
        let msg = r#"ShelleyTxValidationError ShelleyBasedEraConway (ApplyTxError (ConwayUtxowFailure (UtxoFailure (BadInputsUTxO (fromList [TxIn (TxId {unTxId = SafeHash "82e7dc25de3699cb0cfd3e55c4115ac8c23ffd18471645ca6d2832cdb1be65f0"}) (TxIx {unTxIx = 1})]))) :| [ConwayUtxowFailure (UtxoFailure (ValueNotConservedUTxO (Mismatch {mismatchSupplied = MaryValue (Coin 0) (MultiAsset (fromList [(PolicyID {policyID = ScriptHash "737693ec75c198b82cc287418cddd90d762fda772814fd228e74bad7"},fromList [("",1)])])), mismatchExpected = MaryValue (Coin 4827635) (MultiAsset (fromList [(PolicyID {policyID = ScriptHash "737693ec75c198b82cc287418cddd90d762fda772814fd228e74bad7"},fromList [("",1)])]))}))),ConwayUtxowFailure (UtxoFailure (UtxosFailure (CollectErrors [BadTranslation (BabbageContextError (AlonzoContextError (TranslationLogicMissingInput (TxIn (TxId {unTxId = SafeHash "82e7dc25de3699cb0cfd3e55c4115ac8c23ffd18471645ca6d2832cdb1be65f0"}) (TxIx {unTxIx = 1})))))])))]))"#;

        let parsed = parse_tx_submit_error(msg);

        assert_eq!(
            parsed.bad_inputs,
            vec![TxIn {
                tx_id: "82e7dc25de3699cb0cfd3e55c4115ac8c23ffd18471645ca6d2832cdb1be65f0".into(),
                index: 1
            }]
        );

        assert_eq!(
            parsed.value_mismatch,
            Some(ValueMismatch {
                supplied: 0,
                expected: 4827635
            })
        );

        assert_eq!(parsed.missing_inputs.len(), 1);
        assert_eq!(
            parsed.missing_inputs[0].tx_id,
            "82e7dc25de3699cb0cfd3e55c4115ac8c23ffd18471645ca6d2832cdb1be65f0"
        );

        assert!(!parsed.no_collateral_inputs);
        assert!(parsed.insufficient_collateral.is_none());
        assert_eq!(parsed.raw, msg);
    }

    #[test]
    fn insufficient_collateral() {
        let msg = r#"ShelleyTxValidationError ShelleyBasedEraConway (ApplyTxError (ConwayUtxowFailure (UtxoFailure (InsufficientCollateral (DeltaCoin (-4549920)) (Coin 277715))) :| [ConwayUtxowFailure (UtxoFailure NoCollateralInputs),ConwayUtxowFailure (UtxoFailure (BadInputsUTxO (fromList [TxIn (TxId {unTxId = SafeHash "b1e73eb15c6088753206aa356773a037c8d18c392c6803d1d6c1ea940c9f8dac"}) (TxIx {unTxIx = 1})])))]))"#;

        let parsed = parse_tx_submit_error(msg);

        assert_eq!(
            parsed.insufficient_collateral,
            Some(CollateralInfo {
                delta: -4549920,
                provided: 277715
            })
        );

        assert!(parsed.no_collateral_inputs);

        assert_eq!(
            parsed.bad_inputs,
            vec![TxIn {
                tx_id: "b1e73eb15c6088753206aa356773a037c8d18c392c6803d1d6c1ea940c9f8dac".into(),
                index: 1
            }]
        );

        assert!(parsed.missing_inputs.is_empty());
    }

    #[test]
    fn unrecognized_content_is_kept_raw() {
        let parsed = parse_tx_submit_error("socket timeout while contacting node");

        assert_eq!(parsed.raw, "socket timeout while contacting node");
        assert!(parsed.bad_inputs.is_empty());
        assert!(parsed.missing_inputs.is_empty());
        assert!(parsed.value_mismatch.is_none());
        assert!(parsed.insufficient_collateral.is_none());
        assert!(!parsed.no_collateral_inputs);
    }
}
