use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    middleware::validation::{address_param, expect_params, index_param, string_param},
    proxy::errors::ProxyError,
    types::JsonRpcRequest,
    wallet::{StoredWallet, WalletService},
};

/// Response shape of the two store-creating method families.
#[derive(Debug, Clone, Copy)]
enum StoreShape {
    /// `{mnemonics, primaryAddress, filePath}`
    EntropyFile,
    /// `{mnemonic, primaryAddr, filename}`
    MnemonicStore,
}

impl StoreShape {
    fn render(self, stored: &StoredWallet) -> Value {
        let mnemonic = stored.mnemonic.as_str();
        let address = stored.primary_address.to_string();
        match self {
            Self::EntropyFile => json!({
                "mnemonics": mnemonic,
                "primaryAddress": address,
                "filePath": stored.file_path,
            }),
            Self::MnemonicStore => json!({
                "mnemonic": mnemonic,
                "primaryAddr": address,
                "filename": stored.file_path,
            }),
        }
    }
}

/// The `wallet` namespace over [`WalletService`].
pub struct WalletHandler {
    wallets: Arc<WalletService>,
}

impl WalletHandler {
    #[must_use]
    pub fn new(wallets: Arc<WalletService>) -> Self {
        Self { wallets }
    }

    /// # Errors
    ///
    /// Validation and wallet errors, or -32601 for methods outside the namespace.
    pub async fn handle(&self, request: &JsonRpcRequest) -> Result<Value, ProxyError> {
        let params = &request.params;
        match request.action() {
            "getEntropyFilesInStandardDir"
            | "getAllEntropyFiles"
            | "listEntropyFilesInStandardDir"
            | "listAllEntropyFiles" => {
                expect_params(params, 0)?;
                Ok(json!(self.wallets.list_entropy_files().await?))
            }
            "exportMnemonic" => {
                expect_params(params, 2)?;
                let address = address_param(params, 0)?;
                let passphrase = string_param(params, 1)?;
                let mnemonic = self.wallets.export_mnemonic(&address, passphrase).await?;
                Ok(Value::String(mnemonic.as_str().to_string()))
            }
            "unlock" => {
                expect_params(params, 2)?;
                let (file, passphrase) = (string_param(params, 0)?, string_param(params, 1)?);
                self.wallets.unlock(file, passphrase).await?;
                Ok(Value::Null)
            }
            "lock" => {
                expect_params(params, 1)?;
                self.wallets.lock(string_param(params, 0)?)?;
                Ok(Value::Null)
            }
            "deriveAddressesByIndexRange" => {
                expect_params(params, 3)?;
                let file = string_param(params, 0)?;
                let (start, end) = (index_param(params, 1)?, index_param(params, 2)?);
                Ok(json!(self.wallets.derive_addresses(file, start, end).await?))
            }
            "recoverEntropyFile" => self.recover(params, StoreShape::EntropyFile).await,
            "recoverEntropyStoreFromMnemonic" => self.recover(params, StoreShape::MnemonicStore).await,
            "createEntropyFile" => self.create(params, StoreShape::EntropyFile).await,
            "newMnemonicAndEntropyStore" => self.create(params, StoreShape::MnemonicStore).await,
            _ => Err(ProxyError::MethodNotFound(request.method.clone())),
        }
    }

    async fn recover(&self, params: &[Value], shape: StoreShape) -> Result<Value, ProxyError> {
        expect_params(params, 2)?;
        let (phrase, passphrase) = (string_param(params, 0)?, string_param(params, 1)?);
        let stored = self.wallets.recover(phrase, passphrase).await?;
        Ok(shape.render(&stored))
    }

    async fn create(&self, params: &[Value], shape: StoreShape) -> Result<Value, ProxyError> {
        expect_params(params, 1)?;
        let stored = self.wallets.create(string_param(params, 0)?).await?;
        Ok(shape.render(&stored))
    }
}
