//! Request routing: one validated JSON-RPC call in, one response out.
//!
//! # Request Processing Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Validation │ ─── Invalid ──► -32002 ValidationError
//! └──────┬──────┘
//!        │ Valid
//!        ▼
//! ┌─────────────┐
//! │ global limit│ ─── Spent ──► -35005
//! └──────┬──────┘   (skipped for heartbeat_*)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │  MethodRouter    │  longest registered prefix of the method
//! └────────┬─────────┘
//!          │
//!    ┌─────┼─────────┬──────────┬───────────┬──────────┐
//!    ▼     ▼         ▼          ▼           ▼          ▼
//! subscribe vpow   wallet     ledger    heartbeat   no match
//!    │     │         │          │           │          │
//!    ▼     ▼         ▼          ▼           ▼          ▼
//!  Hub   PoW svc  WalletSvc  ResponseCache Deadline  random node
//! ```
//!
//! The router is the only place that turns a [`ProxyError`] into a response envelope.

pub mod connection;
pub mod engine;
pub mod errors;
pub mod handlers;

pub use connection::ClientConnection;
pub use engine::{MethodRouter, Namespace, NamespaceHandlers, SharedContext, GLOBAL_LIMIT};
pub use errors::ProxyError;
