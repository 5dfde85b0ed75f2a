//! Redirect decisions and URL rewriting

pub mod address;
pub mod domain;
mod interceptor;
mod policy;
pub mod rewrite;

pub use address::{normalize, ProxyEndpoint};
pub use domain::{DomainMatcher, DomainPattern};
pub use interceptor::{Redirector, SessionHooks};
pub use policy::{RedirectPolicy, SslDecryptPolicy, SslErrorPolicy};
pub use rewrite::{PatchRule, TargetOrigin, UrlRewriter};
