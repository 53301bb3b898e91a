//! Small shared building blocks.
//!
//! - [`address`]: `vite_` address parsing, checksums and the 21-byte original form
//! - [`client_ip`]: rate-limit key resolution behind local and edge reverse proxies
//! - [`timer`]: re-armable, generation-checked deadlines

pub mod address;
pub mod client_ip;
pub mod timer;

pub use address::{AddressError, AddressType, ViteAddress};
pub use client_ip::TrustedProxies;
pub use timer::{Deadline, Firing};
