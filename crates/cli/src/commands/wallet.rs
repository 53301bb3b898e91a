use clap::Subcommand;
use vite_proxy_core::{
    storage::{SqliteWalletStore, WalletRepository},
    wallet::entropy_file_path,
};

use super::utils::{print_info, CliResult};

#[derive(Subcommand)]
pub enum WalletCommands {
    /// List the primary address of every stored wallet
    List {
        /// Print entropy file paths instead of addresses
        #[arg(long)]
        paths: bool,
    },
}

pub async fn handle_wallet_command(
    command: WalletCommands,
    store: SqliteWalletStore,
) -> CliResult<()> {
    match command {
        WalletCommands::List { paths } => {
            let entries = list(&store, paths).await?;
            print_info(&format!("{} stored wallets", entries.len()));
            for entry in entries {
                println!("  {entry}");
            }
            Ok(())
        }
    }
}

async fn list(store: &dyn WalletRepository, paths: bool) -> CliResult<Vec<String>> {
    let records = store.list().await?;
    Ok(records
        .iter()
        .map(|record| {
            if paths {
                entropy_file_path(&record.primary_address)
            } else {
                record.primary_address.to_string()
            }
        })
        .collect())
}
