//! Passphrase sealing of entropy.
//!
//! Layout: `[version][iv: 16][tag_len][tag][ciphertext]`, AES-256-GCM keyed by
//! `sha256(passphrase)`. Only version 0 exists.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, Aead, KeyInit},
    aes::Aes256,
    AesGcm,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::WalletError;

type Cipher = AesGcm<Aes256, U16>;

const VERSION: u8 = 0;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

fn cipher(passphrase: &str) -> Cipher {
    let key: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(passphrase.as_bytes()).into());
    Cipher::new(GenericArray::from_slice(key.as_slice()))
}

/// Seals `entropy` under `passphrase` with a fresh random IV.
///
/// # Errors
/// Returns [`WalletError::Decrypt`] if the cipher rejects the input, which only happens for
/// inputs beyond the GCM length limit.
pub fn encrypt(entropy: &[u8], passphrase: &str) -> Result<Vec<u8>, WalletError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    // `aes-gcm` appends the tag to the ciphertext.
    let sealed = cipher(passphrase)
        .encrypt(GenericArray::from_slice(&iv), entropy)
        .map_err(|_| WalletError::Decrypt)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut out = Vec::with_capacity(2 + IV_LEN + TAG_LEN + ciphertext.len());
    out.push(VERSION);
    out.extend_from_slice(&iv);
    out.push(TAG_LEN as u8);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Opens a sealed store.
///
/// # Errors
/// Returns [`WalletError::UnsupportedVersion`] for an unknown layout version and
/// [`WalletError::Decrypt`] for a truncated store, a wrong passphrase or tampered data.
pub fn decrypt(sealed: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let (&version, rest) = sealed.split_first().ok_or(WalletError::Decrypt)?;
    if version > VERSION {
        return Err(WalletError::UnsupportedVersion(version));
    }
    if rest.len() < IV_LEN + 1 {
        return Err(WalletError::Decrypt);
    }
    let (iv, rest) = rest.split_at(IV_LEN);
    let (&tag_len, rest) = rest.split_first().ok_or(WalletError::Decrypt)?;
    if usize::from(tag_len) != TAG_LEN || rest.len() < TAG_LEN {
        return Err(WalletError::Decrypt);
    }
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher(passphrase)
        .decrypt(GenericArray::from_slice(iv), combined.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| WalletError::Decrypt)
}
