//! Configuration parsing and management

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::redirect::{
    DomainMatcher, PatchRule, ProxyEndpoint, RedirectPolicy, Redirector, SslDecryptPolicy,
    SslErrorPolicy, TargetOrigin, UrlRewriter,
};

/// Default path of the root CA certificate
pub const DEFAULT_CA_CERT: &str = "rerouter-ca.crt";

/// Default path of the root CA private key
pub const DEFAULT_CA_KEY: &str = "rerouter-ca.key";

/// Main configuration structure.
///
/// Read from a JSON file; comments and trailing commas are accepted and
/// unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the proxy listens on (default `127.0.0.1:8080`)
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Origin that redirected requests are sent to
    pub target_url: String,

    /// When CONNECT tunnels are decrypted
    #[serde(default)]
    pub ssl_decrypt_policy: SslDecryptPolicy,

    /// Whether upstream certificate errors are ignored
    #[serde(default)]
    pub ssl_error_policy: SslErrorPolicy,

    /// Exact hosts or `*.suffix` / `.suffix` wildcards to redirect
    #[serde(default)]
    pub redirect_domains: Vec<String>,

    /// Literal find -> replace pairs applied in file order
    #[serde(default)]
    pub url_patches: IndexMap<String, String>,

    /// Path to the root CA certificate used for decrypted tunnels
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// Path to the root CA private key
    #[serde(default)]
    pub ca_key: Option<String>,

    /// Path to PEM CA certs to trust for upstream TLS in addition to the web roots
    #[serde(default)]
    pub upstream_tls_ca: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config(format!(
                "{} doesn't exist.",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        if content.trim().is_empty() {
            return Err(Error::config(format!("{} is empty.", path.display())));
        }

        Self::parse(&content)
    }

    /// Parse configuration from a JSON string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            json5::from_str(content).map_err(|e| Error::config(format!("Invalid JSON: {}", e)))?;

        if config.target_url.trim().is_empty() {
            return Err(Error::config("target_url must not be empty"));
        }

        Ok(config)
    }

    /// Create a minimal configuration with just the essentials
    pub fn minimal(target_url: String, redirect_domains: Vec<String>) -> Self {
        Self {
            proxy_url: None,
            target_url,
            ssl_decrypt_policy: SslDecryptPolicy::default(),
            ssl_error_policy: SslErrorPolicy::default(),
            redirect_domains,
            url_patches: IndexMap::new(),
            ca_cert: None,
            ca_key: None,
            upstream_tls_ca: None,
            log_level: default_log_level(),
        }
    }

    /// The address the proxy listens on
    pub fn endpoint(&self) -> Result<ProxyEndpoint> {
        ProxyEndpoint::from_proxy_url(self.proxy_url.as_deref())
    }

    /// The origin redirected requests go to
    pub fn target_origin(&self) -> Result<TargetOrigin> {
        TargetOrigin::parse(&self.target_url)
    }

    /// URL patches in configured order
    pub fn patches(&self) -> Vec<PatchRule> {
        self.url_patches
            .iter()
            .map(|(find, replace)| PatchRule::new(find.as_str(), replace.as_str()))
            .collect()
    }

    /// Root CA certificate and key paths, falling back to the defaults
    pub fn ca_paths(&self) -> (String, String) {
        (
            self.ca_cert
                .clone()
                .unwrap_or_else(|| DEFAULT_CA_CERT.to_string()),
            self.ca_key
                .clone()
                .unwrap_or_else(|| DEFAULT_CA_KEY.to_string()),
        )
    }

    /// Build the session hooks described by this configuration
    pub fn redirector(&self) -> Result<Redirector> {
        let policy = RedirectPolicy::new(
            DomainMatcher::new(&self.redirect_domains),
            self.ssl_decrypt_policy,
            self.ssl_error_policy,
        );
        let rewriter = UrlRewriter::new(self.target_origin()?, self.patches());
        Ok(Redirector::new(policy, rewriter))
    }
}
