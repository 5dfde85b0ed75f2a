//! Rerouter - A local forward proxy that redirects selected domains
//!
//! Requests to configured domains are rewritten onto a different origin,
//! optionally patched with literal substitutions, and forwarded there. All
//! other traffic passes through untouched.
//!
//! # Features
//!
//! - **Domain matching**: exact hosts and `*.suffix` / `.suffix` wildcards
//! - **URL rewriting**: origin replacement followed by ordered patches
//! - **Selective decryption**: CONNECT tunnels are decrypted never, always or on demand
//! - **Certificate management**: a local root CA, generated on first use
//!
//! # Example
//!
//! ```no_run
//! use rerouter::{Config, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.json")?;
//!     let server = ProxyServer::new(config)?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
//!     server.run_until_shutdown(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod proxy;
pub mod redirect;
pub mod tls;

#[cfg(test)]
pub mod test_support;

pub use config::Config;
pub use error::{Error, Result};
pub use proxy::ProxyServer;
pub use redirect::{Redirector, SessionHooks};
pub use tls::{CertificateAuthority, GeneratedCa, MitmCertificateGenerator};
