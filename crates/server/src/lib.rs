//! HTTP and WebSocket front end for the vite-proxy runtime.
//!
//! The binary in `main.rs` builds a [`ViteProxyRuntime`](vite_proxy_core::runtime::ViteProxyRuntime)
//! and serves [`create_app`] over it. Everything protocol-level happens in the core
//! `MethodRouter`; this crate only moves frames in and out.

pub mod app;
pub mod middleware;
pub mod router;
pub mod websocket;

pub use app::{create_app, AppState, ServerError};
