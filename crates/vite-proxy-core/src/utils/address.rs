//! Vite account addresses.
//!
//! Text form: `vite_` + hex(20-byte address) + hex(5-byte blake2b checksum), 55 characters.
//! Contract addresses carry the bitwise-inverted checksum. The 21-byte "original" form appends
//! a type byte: `0x00` for user accounts, `0x01` for contracts.

use blake2::{
    digest::consts::{U20, U5},
    Blake2b, Digest,
};
use std::{fmt, str::FromStr};

pub const ADDRESS_PREFIX: &str = "vite_";
pub const ADDRESS_SIZE: usize = 20;
const CHECKSUM_SIZE: usize = 5;
const ADDRESS_TEXT_LEN: usize = ADDRESS_PREFIX.len() + 2 * (ADDRESS_SIZE + CHECKSUM_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    User,
    Contract,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must be {ADDRESS_TEXT_LEN} characters")]
    Length,
    #[error("address must start with {ADDRESS_PREFIX}")]
    Prefix,
    #[error("address is not lowercase hex")]
    Hex,
    #[error("address checksum mismatch")]
    Checksum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViteAddress {
    bytes: [u8; ADDRESS_SIZE],
    kind: AddressType,
}

impl ViteAddress {
    /// User account address for an ed25519 public key: `blake2b-160(pubkey)`.
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = Blake2b::<U20>::digest(public_key);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest);
        Self { bytes, kind: AddressType::User }
    }

    #[must_use]
    pub fn kind(&self) -> AddressType {
        self.kind
    }

    #[must_use]
    pub fn is_contract(&self) -> bool {
        self.kind == AddressType::Contract
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.bytes
    }

    /// 21-byte form: address bytes followed by the type byte.
    #[must_use]
    pub fn original(&self) -> [u8; ADDRESS_SIZE + 1] {
        let mut out = [0u8; ADDRESS_SIZE + 1];
        out[..ADDRESS_SIZE].copy_from_slice(&self.bytes);
        out[ADDRESS_SIZE] = u8::from(self.is_contract());
        out
    }

    /// Rebuilds an address from its 21-byte form.
    ///
    /// # Errors
    /// Returns [`AddressError::Length`] unless `original` is 21 bytes with a type byte of 0 or 1.
    pub fn from_original(original: &[u8]) -> Result<Self, AddressError> {
        if original.len() != ADDRESS_SIZE + 1 {
            return Err(AddressError::Length);
        }
        let kind = match original[ADDRESS_SIZE] {
            0 => AddressType::User,
            1 => AddressType::Contract,
            _ => return Err(AddressError::Length),
        };
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&original[..ADDRESS_SIZE]);
        Ok(Self { bytes, kind })
    }

    fn checksum(bytes: &[u8; ADDRESS_SIZE], kind: AddressType) -> [u8; CHECKSUM_SIZE] {
        let digest = Blake2b::<U5>::digest(bytes);
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&digest);
        if kind == AddressType::Contract {
            for byte in &mut checksum {
                *byte = !*byte;
            }
        }
        checksum
    }
}

impl fmt::Display for ViteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ADDRESS_PREFIX}{}{}",
            hex::encode(self.bytes),
            hex::encode(Self::checksum(&self.bytes, self.kind))
        )
    }
}

impl FromStr for ViteAddress {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.len() != ADDRESS_TEXT_LEN {
            return Err(AddressError::Length);
        }
        let Some(body) = text.strip_prefix(ADDRESS_PREFIX) else {
            return Err(AddressError::Prefix);
        };
        if !body.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(AddressError::Hex);
        }

        let raw = hex::decode(body).map_err(|_| AddressError::Hex)?;
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&raw[..ADDRESS_SIZE]);
        let given = &raw[ADDRESS_SIZE..];

        if given == Self::checksum(&bytes, AddressType::User) {
            Ok(Self { bytes, kind: AddressType::User })
        } else if given == Self::checksum(&bytes, AddressType::Contract) {
            Ok(Self { bytes, kind: AddressType::Contract })
        } else {
            Err(AddressError::Checksum)
        }
    }
}
