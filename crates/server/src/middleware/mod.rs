//! HTTP middleware components for the proxy server.
//!
//! The adapters here handle HTTP-specific concerns and delegate the decisions to
//! `vite_proxy_core`. Rate limiting and envelope validation are not middleware: they run inside
//! the core `MethodRouter`, per JSON-RPC call rather than per HTTP request.

pub mod client_ip;

pub use client_ip::{client_ip_middleware, ClientKey, X_FORWARDED_FOR};
