//! Account derivation from a bip39 mnemonic.
//!
//! Keys follow SLIP-0010 for ed25519 along `m/44'/666666'/i'`; only hardened steps exist on
//! this curve.

use bip39::Mnemonic;
use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use super::WalletError;
use crate::utils::ViteAddress;

type HmacSha512 = Hmac<Sha512>;

const MASTER_KEY: &[u8] = b"ed25519 seed";
const HARDENED: u32 = 0x8000_0000;
const PURPOSE: u32 = 44;
const COIN_TYPE: u32 = 666_666;

/// Highest account index. Larger values would collide with the hardened bit.
pub const MAX_ACCOUNT_INDEX: u32 = HARDENED - 1;

/// Entropy size of freshly generated mnemonics, 24 words.
pub const ENTROPY_LEN: usize = 32;

/// Parses a space-separated English mnemonic.
///
/// # Errors
/// Returns [`WalletError::InvalidMnemonic`] for unknown words, a bad word count or a bad
/// checksum.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    Mnemonic::parse_normalized(phrase.trim()).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// Generates a fresh 24-word mnemonic.
///
/// # Errors
/// Never fails for the fixed entropy size; the error is kept for the bip39 signature.
pub fn generate_mnemonic() -> Result<Mnemonic, WalletError> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), entropy.as_mut_slice());
    Mnemonic::from_entropy(entropy.as_slice()).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// 64-byte bip39 seed with an empty passphrase.
#[must_use]
pub fn seed(mnemonic: &Mnemonic) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed_normalized(""))
}

fn hmac_halves(key: &[u8], parts: &[&[u8]]) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    // HMAC accepts keys of any length.
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&digest[..32]);
    right.copy_from_slice(&digest[32..]);
    (left, right)
}

/// Private key at `m/44'/666666'/index'`. `index` must not exceed [`MAX_ACCOUNT_INDEX`].
#[must_use]
pub fn derive_private_key(seed: &[u8], index: u32) -> Zeroizing<[u8; 32]> {
    let (mut key, mut chain_code) = hmac_halves(MASTER_KEY, &[seed]);
    for step in [PURPOSE, COIN_TYPE, index] {
        let hardened = (step | HARDENED).to_be_bytes();
        (key, chain_code) = hmac_halves(chain_code.as_slice(), &[&[0u8], key.as_slice(), &hardened]);
    }
    key
}

/// User address of account `index`.
#[must_use]
pub fn derive_address(seed: &[u8], index: u32) -> ViteAddress {
    let signing = SigningKey::from_bytes(&derive_private_key(seed, index));
    ViteAddress::from_public_key(&signing.verifying_key().to_bytes())
}
