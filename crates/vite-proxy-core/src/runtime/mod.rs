//! Runtime initialization and lifecycle management.
//!
//! The builder turns an [`AppConfig`](crate::config::AppConfig) into a running proxy: node
//! pool, rate limiter (with restored expiries), namespace handlers, chain feed and the trusted
//! proxy refresh. The server crate only adds the HTTP and WebSocket surface on top.
//!
//! # Examples
//!
//! ```no_run
//! use vite_proxy_core::{config::AppConfig, runtime::ViteProxyRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let runtime = ViteProxyRuntime::builder().with_config(config).build().await?;
//!
//!     let router = runtime.router();
//!     // ... set up HTTP and WebSocket routes around `router` ...
//!
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{RuntimeError, ViteProxyRuntimeBuilder};
pub use components::ViteProxyComponents;
pub use lifecycle::ViteProxyRuntime;
