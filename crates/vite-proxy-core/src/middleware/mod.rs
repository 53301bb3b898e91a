//! Request middleware: envelope validation and rate limiting.
//!
//! This module holds the **business logic layer** of request admission. Transport adapters
//! (axum handlers, WebSocket framing) live in `crates/server`, while the checks themselves
//! live here so they can be tested without HTTP machinery.
//!
//! # Pipeline
//!
//! ```text
//!   Incoming envelope (serde_json::Value)
//!        │
//!        ▼
//!   ┌─────────────────────────┐
//!   │  1. VALIDATION          │  JsonRpcRequest::from_value()
//!   │     - method string     │
//!   │     - params array      │
//!   │     - id integer >= 0   │
//!   │     - jsonrpc "2.0"     │
//!   └─────────────────────────┘
//!        │ ValidationError?
//!        ├─> -32002 "ValidationError: ..."
//!        │
//!        ▼
//!   ┌─────────────────────────┐
//!   │  2. RATE LIMITING       │  RateLimiter::consume("global", client_key, limit)
//!   │     - skipped for       │
//!   │       heartbeat_*       │
//!   │     - persisted counts  │
//!   └─────────────────────────┘
//!        │ RateLimited?
//!        ├─> -35005 "Rate limit exceeded; please try again later"
//!        │
//!        ▼
//!   MethodRouter namespace dispatch
//! ```
//!
//! Handlers reuse the positional parameter helpers in [`validation`] so every namespace
//! reports parameter errors in the same shape.

pub mod rate_limiting;
pub mod validation;

pub use rate_limiting::{Limit, RateLimiter};
pub use validation::ValidationError;
