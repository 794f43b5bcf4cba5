//! Local wallet identity derivation.
//!
//! BIP39/BIP32 derivation of the identifiers used to locate per-wallet local
//! state, and BIP85 derivation of the child mnemonic that seeds the Lightning
//! node.

use crate::error::{Error, Result};
use crate::types::{Credentials, NetworkIdentity, WalletIdentifier};
use anyhow::Context;
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::{Hash, HashEngine, hmac, sha512};
use bitcoin::key::Secp256k1;
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// BIP-85 application prefix.
const BIP85_PREFIX: u32 = 83696968;
/// BIP-85 application number for BIP39 mnemonics.
const BIP85_BIP39_APP: u32 = 39;
/// BIP-85 language code for English.
const BIP85_ENGLISH: u32 = 0;
/// HMAC key used to turn a derived private key into entropy.
const BIP85_HMAC_KEY: &[u8] = b"bip-entropy-from-k";

/// Word count of the Lightning child mnemonic.
pub const LIGHTNING_WORD_COUNT: u32 = 12;
/// BIP-85 index of the Lightning child mnemonic.
pub const LIGHTNING_BIP85_INDEX: u32 = 0;
/// BIP-85 index of the swap engine child mnemonic.
pub const SWAP_BIP85_INDEX: u32 = 26589;

/// Key material of one software wallet.
pub struct WalletKeys {
    mnemonic: bip39::Mnemonic,
    passphrase: String,
}

impl WalletKeys {
    /// Parse a mnemonic phrase, with an optional BIP39 passphrase.
    pub fn from_mnemonic(phrase: &str, passphrase: Option<&str>) -> Result<Self> {
        let mnemonic =
            bip39::Mnemonic::from_str(phrase).map_err(|e| Error::InvalidMnemonic(format!("{}", e)))?;

        Ok(Self {
            mnemonic,
            passphrase: passphrase.unwrap_or_default().to_string(),
        })
    }

    /// Build from login credentials; fails when they carry no mnemonic.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let mnemonic = credentials
            .mnemonic
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::InvalidMnemonic("missing mnemonic".to_string()))?;
        Self::from_mnemonic(mnemonic, credentials.bip39_passphrase.as_deref())
    }

    /// Get the mnemonic phrase as a string.
    pub fn mnemonic_phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    fn master_xpriv(&self, network: bitcoin::Network) -> anyhow::Result<Xpriv> {
        let seed = self.mnemonic.to_seed(&self.passphrase);
        let xpriv = Xpriv::new_master(network, &seed).context("Failed to derive Xpriv")?;

        Ok(xpriv)
    }

    /// Master extended public key for the network's chain.
    pub fn master_xpub(&self, network: NetworkIdentity) -> Result<Xpub> {
        let secp = Secp256k1::new();
        let master = self.master_xpriv(network.to_bitcoin_network())?;
        Ok(Xpub::from_priv(&secp, &master))
    }

    /// Identifiers of this wallet on `network`.
    pub fn wallet_identifier(&self, network: NetworkIdentity) -> Result<WalletIdentifier> {
        let xpub = self.master_xpub(network)?;
        Ok(wallet_identifier_from_xpub(&xpub, network))
    }

    /// BIP-85 child mnemonic seeding the Lightning node.
    ///
    /// Derivation path: `m/83696968'/39'/0'/12'/0'`
    pub fn lightning_mnemonic(&self) -> Result<String> {
        let master = self.master_xpriv(bitcoin::Network::Bitcoin)?;
        let mnemonic = bip85_mnemonic(&master, LIGHTNING_WORD_COUNT, LIGHTNING_BIP85_INDEX)?;
        Ok(mnemonic.to_string())
    }

    /// Credentials for the Lightning session derived from these keys.
    pub fn lightning_credentials(&self) -> Result<Credentials> {
        Ok(Credentials::from_mnemonic(self.lightning_mnemonic()?, None))
    }

    /// Credentials for the descriptor-wallet swap session.
    ///
    /// Derivation path: `m/83696968'/39'/0'/12'/26589'`
    pub fn swap_credentials(&self) -> Result<Credentials> {
        let master = self.master_xpriv(bitcoin::Network::Bitcoin)?;
        let mnemonic = bip85_mnemonic(&master, LIGHTNING_WORD_COUNT, SWAP_BIP85_INDEX)?;
        Ok(Credentials::from_mnemonic(mnemonic.to_string(), None))
    }
}

/// Identifiers computed from a master xpub, tagged with the network so the same
/// seed yields distinct local state per network.
pub fn wallet_identifier_from_xpub(xpub: &Xpub, network: NetworkIdentity) -> WalletIdentifier {
    let xpub_hash = Sha256::digest(xpub.encode());

    let mut hasher = Sha256::new();
    hasher.update(network.as_str().as_bytes());
    hasher.update(xpub_hash);
    let wallet_hash = hasher.finalize();

    WalletIdentifier {
        xpub_hash_id: hex::encode(xpub_hash),
        wallet_hash_id: hex::encode(wallet_hash),
    }
}

/// Identifiers from a serialized master xpub (hardware wallets).
pub fn wallet_identifier_from_xpub_str(
    master_xpub: &str,
    network: NetworkIdentity,
) -> Result<WalletIdentifier> {
    let xpub = Xpub::from_str(master_xpub)
        .map_err(|e| Error::KeyDerivation(format!("Invalid master xpub: {}", e)))?;
    Ok(wallet_identifier_from_xpub(&xpub, network))
}

/// Derive a BIP39 mnemonic from `master` following BIP-85.
///
/// Derivation path: `m/83696968'/39'/0'/{words}'/{index}'`
pub fn bip85_mnemonic(master: &Xpriv, words: u32, index: u32) -> Result<bip39::Mnemonic> {
    let entropy_len = match words {
        12 => 16,
        18 => 24,
        24 => 32,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Unsupported word count: {}",
                words
            )));
        }
    };

    let secp = Secp256k1::new();
    let path_str = format!(
        "m/{}'/{}'/{}'/{}'/{}'",
        BIP85_PREFIX, BIP85_BIP39_APP, BIP85_ENGLISH, words, index
    );
    let path: DerivationPath = path_str
        .parse()
        .map_err(|e| Error::KeyDerivation(format!("Invalid derivation path: {}", e)))?;

    let derived = master
        .derive_priv(&secp, &path)
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    let mut engine = hmac::HmacEngine::<sha512::Hash>::new(BIP85_HMAC_KEY);
    engine.input(&derived.private_key.secret_bytes());
    let entropy = hmac::Hmac::<sha512::Hash>::from_engine(engine).to_byte_array();

    bip39::Mnemonic::from_entropy(&entropy[..entropy_len])
        .map_err(|e| Error::KeyDerivation(format!("Failed to build mnemonic: {}", e)))
}
