pub mod config;
pub mod ratelimit;
pub mod utils;
pub mod wallet;

pub use config::{handle_config_command, ConfigCommands};
pub use ratelimit::{handle_ratelimit_command, RatelimitCommands};
pub use wallet::{handle_wallet_command, WalletCommands};
