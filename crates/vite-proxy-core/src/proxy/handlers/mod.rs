//! Handlers for the registered namespaces.

pub mod heartbeat;
pub mod ledger;
pub mod subscribe;
pub mod vpow;
pub mod wallet;

pub use heartbeat::HeartbeatHandler;
pub use ledger::LedgerHandler;
pub use subscribe::SubscribeHandler;
pub use vpow::VpowHandler;
pub use wallet::WalletHandler;
