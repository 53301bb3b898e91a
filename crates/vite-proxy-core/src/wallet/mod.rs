//! Server-side HD wallets.
//!
//! Each wallet is one bip39 entropy sealed under a passphrase (see [`crypto`]) and stored by
//! its primary address, the account at index 0. Clients address a wallet by its entropy file
//! path, `/vite-proxy/wallets/<primary address>`. There are no files on disk; the path is
//! only a name.
//!
//! Unlocking decrypts the entropy once and keeps the derived seed in memory until the wallet
//! is locked or the process exits.

pub mod crypto;
pub mod derivation;

use dashmap::DashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::{
    storage::{StoreError, WalletRecord, WalletRepository},
    utils::ViteAddress,
};

pub const ENTROPY_FILE_DIR: &str = "/vite-proxy/wallets/";

/// Most addresses a single derivation call returns.
pub const MAX_DERIVE_COUNT: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("error decrypt store")]
    Decrypt,

    #[error("error given store not found")]
    StoreNotFound,

    #[error("the crypto store is locked")]
    Locked,

    #[error("Wallet already exists")]
    AlreadyExists,

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Unsupported wallet store version {0}")]
    UnsupportedVersion(u8),

    #[error("index must be an integer between 0 and {}", derivation::MAX_ACCOUNT_INDEX)]
    IndexOutOfRange,

    #[error("at most {MAX_DERIVE_COUNT} addresses can be derived per call")]
    RangeTooLarge,

    #[error("address derivation failed: {0}")]
    Derivation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => Self::AlreadyExists,
            other => Self::Store(other),
        }
    }
}

/// A wallet that was just written to the store.
#[derive(Debug)]
pub struct StoredWallet {
    pub mnemonic: Zeroizing<String>,
    pub primary_address: ViteAddress,
    pub file_path: String,
}

#[must_use]
pub fn entropy_file_path(address: &ViteAddress) -> String {
    format!("{ENTROPY_FILE_DIR}{address}")
}

/// Parses an entropy file path back into its primary address.
///
/// # Errors
/// Returns [`WalletError::StoreNotFound`] for anything that is not a well-formed path to a
/// valid user address.
pub fn address_from_entropy_file(path: &str) -> Result<ViteAddress, WalletError> {
    let address = path.strip_prefix(ENTROPY_FILE_DIR).ok_or(WalletError::StoreNotFound)?;
    address.parse().map_err(|_| WalletError::StoreNotFound)
}

pub struct WalletService {
    repository: Arc<dyn WalletRepository>,
    unlocked: DashMap<ViteAddress, Zeroizing<[u8; 64]>>,
}

impl WalletService {
    #[must_use]
    pub fn new(repository: Arc<dyn WalletRepository>) -> Self {
        Self { repository, unlocked: DashMap::new() }
    }

    /// Entropy file paths of every stored wallet, oldest first.
    ///
    /// # Errors
    /// Returns [`WalletError::Store`] if the store cannot be read.
    pub async fn list_entropy_files(&self) -> Result<Vec<String>, WalletError> {
        let records = self.repository.list().await?;
        Ok(records.iter().map(|record| entropy_file_path(&record.primary_address)).collect())
    }

    /// Decrypts the wallet stored for `address` and returns its mnemonic.
    ///
    /// # Errors
    /// Returns [`WalletError::StoreNotFound`] when no wallet is stored for `address` and
    /// [`WalletError::Decrypt`] when the passphrase does not open it.
    pub async fn export_mnemonic(
        &self,
        address: &ViteAddress,
        passphrase: &str,
    ) -> Result<Zeroizing<String>, WalletError> {
        let record = self.repository.find(address).await?.ok_or(WalletError::StoreNotFound)?;
        let entropy = crypto::decrypt(&record.encrypted, passphrase).map_err(|_| WalletError::Decrypt)?;
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy).map_err(|_| WalletError::Decrypt)?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    /// # Errors
    /// Same as [`export_mnemonic`](Self::export_mnemonic), plus
    /// [`WalletError::StoreNotFound`] for a malformed path.
    pub async fn unlock(&self, entropy_file: &str, passphrase: &str) -> Result<(), WalletError> {
        let address = address_from_entropy_file(entropy_file)?;
        let phrase = self.export_mnemonic(&address, passphrase).await?;
        let mnemonic = derivation::parse_mnemonic(&phrase)?;
        self.unlocked.insert(address, derivation::seed(&mnemonic));
        tracing::info!(wallet = %address, "wallet unlocked");
        Ok(())
    }

    /// Forgets the in-memory seed. Locking a wallet that is not unlocked is a no-op.
    ///
    /// # Errors
    /// Returns [`WalletError::StoreNotFound`] for a malformed path.
    pub fn lock(&self, entropy_file: &str) -> Result<(), WalletError> {
        let address = address_from_entropy_file(entropy_file)?;
        if self.unlocked.remove(&address).is_some() {
            tracing::info!(wallet = %address, "wallet locked");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_unlocked(&self, address: &ViteAddress) -> bool {
        self.unlocked.contains_key(address)
    }

    /// Addresses for indexes `start..=end` of an unlocked wallet. An empty range gives an
    /// empty list. Derivation runs on the blocking pool with a copy of the seed.
    ///
    /// # Errors
    /// Returns [`WalletError::IndexOutOfRange`] for hardened indexes,
    /// [`WalletError::RangeTooLarge`] past [`MAX_DERIVE_COUNT`] addresses and
    /// [`WalletError::Locked`] unless the wallet is unlocked.
    pub async fn derive_addresses(
        &self,
        entropy_file: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<String>, WalletError> {
        let address = address_from_entropy_file(entropy_file)?;
        if start > derivation::MAX_ACCOUNT_INDEX || end > derivation::MAX_ACCOUNT_INDEX {
            return Err(WalletError::IndexOutOfRange);
        }
        let seed = self
            .unlocked
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or(WalletError::Locked)?;
        if start > end {
            return Ok(Vec::new());
        }
        if end - start >= MAX_DERIVE_COUNT {
            return Err(WalletError::RangeTooLarge);
        }

        tokio::task::spawn_blocking(move || {
            (start..=end)
                .map(|index| derivation::derive_address(seed.as_slice(), index).to_string())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| WalletError::Derivation(err.to_string()))
    }

    /// Seals `phrase` under `passphrase` and stores it by its primary address.
    ///
    /// # Errors
    /// Returns [`WalletError::InvalidMnemonic`] for a bad phrase and
    /// [`WalletError::AlreadyExists`] when the wallet is already stored.
    pub async fn recover(&self, phrase: &str, passphrase: &str) -> Result<StoredWallet, WalletError> {
        let mnemonic = derivation::parse_mnemonic(phrase)?;
        let entropy = Zeroizing::new(mnemonic.to_entropy());
        let primary_address = derivation::derive_address(derivation::seed(&mnemonic).as_slice(), 0);

        let record = WalletRecord { primary_address, encrypted: crypto::encrypt(&entropy, passphrase)? };
        self.repository.insert(&record).await?;
        tracing::info!(wallet = %primary_address, "wallet stored");

        Ok(StoredWallet {
            mnemonic: Zeroizing::new(mnemonic.to_string()),
            primary_address,
            file_path: entropy_file_path(&primary_address),
        })
    }

    /// Stores a wallet for a freshly generated 24-word mnemonic.
    ///
    /// # Errors
    /// Returns [`WalletError::Store`] if the store write fails.
    pub async fn create(&self, passphrase: &str) -> Result<StoredWallet, WalletError> {
        let mnemonic = derivation::generate_mnemonic()?;
        self.recover(&Zeroizing::new(mnemonic.to_string()), passphrase).await
    }
}
