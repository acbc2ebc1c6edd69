//! Collateral wallet key derivation.
//!
//! The gateway derives exactly one key from the configured mnemonic: the
//! first enterprise (payment-only) key at 1852'/1815'/0'/0/0, used to
//! co-sign collateral inputs. Master key generation follows the Icarus
//! scheme: PBKDF2-HMAC-SHA512 over the BIP-39 entropy, then ed25519-bip32
//! V2 derivation.

use bip39::{Language, Mnemonic};
use cryptoxide::{hmac::Hmac, pbkdf2::pbkdf2, sha2::Sha512};
use ed25519_bip32::{DerivationScheme, XPrv};
use pallas::crypto::hash::Hasher;
use pallas::ledger::addresses::{
    Network as AddressNetwork, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart,
};

use crate::config::Network;
use crate::prelude::Error;

const HARDENED: u32 = 0x8000_0000;

const PURPOSE: u32 = 1852;
const COIN_TYPE: u32 = 1815;

/// Private key for path 1852'/1815'/0'/0/0.
pub fn first_enterprise_key(words: &[String]) -> Result<XPrv, Error> {
    let phrase = words.join(" ");

    let mnemonic = Mnemonic::parse_in(Language::English, &phrase).map_err(Error::wallet)?;

    let root = icarus_master_key(&mnemonic.to_entropy(), b"");

    Ok(root
        .derive(DerivationScheme::V2, PURPOSE | HARDENED)
        .derive(DerivationScheme::V2, COIN_TYPE | HARDENED)
        .derive(DerivationScheme::V2, HARDENED)
        .derive(DerivationScheme::V2, 0)
        .derive(DerivationScheme::V2, 0))
}

/// Bech32 enterprise address of the first payment key.
pub fn first_enterprise_address(words: &[String], network: Network) -> Result<String, Error> {
    let key = first_enterprise_key(words)?;

    let payment_hash = Hasher::<224>::hash(&key.public().public_key());

    let address_network = match network {
        Network::Mainnet => AddressNetwork::Mainnet,
        Network::Preprod => AddressNetwork::Testnet,
    };

    ShelleyAddress::new(
        address_network,
        ShelleyPaymentPart::key_hash(payment_hash),
        ShelleyDelegationPart::Null,
    )
    .to_bech32()
    .map_err(Error::wallet)
}

fn icarus_master_key(entropy: &[u8], password: &[u8]) -> XPrv {
    let mut out = [0u8; 96];

    let mut mac = Hmac::new(Sha512::new(), password);
    pbkdf2(&mut mac, entropy, 4096, &mut out);

    XPrv::normalize_bytes_force3rd(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(mnemonic: &str) -> Vec<String> {
        mnemonic.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn first_enterprise_address_vectors() {
        let cases = [
            (
                "abandon amount liar amount expire adjust cage candy arch gather drum bullet \
                 absurd math era live bid rhythm alien crouch range attend journey unaware",
                "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp",
            ),
            (
                "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo \
                 zoo zoo zoo zoo vote",
                "addr_test1vqlrq4h2xvj7x49shr65uxrsgkfmpq65la8lpvmxn06gprckcj4al",
            ),
            (
                "abuse boss fly battle rubber wasp afraid hamster guide essence vibrant task \
                 banana pencil owner cube social job emotion member joy sting dash trouble",
                "addr_test1vz8hjzqpaqypchy7mt254vz5n5wfwse0hvkg6gl03q5erlstefrjd",
            ),
        ];

        for (mnemonic, expected) in cases {
            let got = first_enterprise_address(&words(mnemonic), Network::Preprod).unwrap();
            assert_eq!(got, expected, "for mnemonic starting {}", &mnemonic[..12]);
        }
    }

    #[test]
    fn signature_verifies_under_derived_public_key() {
        let key = first_enterprise_key(&words(
            "abandon amount liar amount expire adjust cage candy arch gather drum bullet \
             absurd math era live bid rhythm alien crouch range attend journey unaware",
        ))
        .unwrap();

        let message = b"collateral hash stand-in";
        let signature = key.sign::<Vec<u8>>(message);

        assert!(key.public().verify(message, &signature));
    }

    #[test]
    fn invalid_mnemonic_is_rejected() {
        assert!(first_enterprise_key(&words("abandon notaword")).is_err());
    }
}
