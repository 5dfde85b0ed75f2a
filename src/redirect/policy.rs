//! TLS decrypt and certificate-error policies

use serde::{Deserialize, Deserializer};

use super::domain::DomainMatcher;

/// Whether CONNECT tunnels are decrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslDecryptPolicy {
    /// Never decrypt; every tunnel is passed through
    Never,
    /// Decrypt every tunnel
    Always,
    /// Decrypt only tunnels to redirect domains
    OnDemand,
}

impl SslDecryptPolicy {
    /// Value used for missing or unrecognized policy strings
    pub const FALLBACK: Self = SslDecryptPolicy::Always;

    /// Parse a policy name, case-insensitively. Unknown names map to [`Self::FALLBACK`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => SslDecryptPolicy::Never,
            "always" => SslDecryptPolicy::Always,
            "ondemand" => SslDecryptPolicy::OnDemand,
            _ => Self::FALLBACK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslDecryptPolicy::Never => "never",
            SslDecryptPolicy::Always => "always",
            SslDecryptPolicy::OnDemand => "ondemand",
        }
    }
}

impl Default for SslDecryptPolicy {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl<'de> Deserialize<'de> for SslDecryptPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref().unwrap_or("")))
    }
}

/// Whether upstream certificate validation errors are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslErrorPolicy {
    /// Accept upstream certificates even when validation fails
    AlwaysIgnore,
    /// Reject upstream certificates that fail validation
    NeverIgnore,
}

impl SslErrorPolicy {
    /// Value used for missing or unrecognized policy strings
    pub const FALLBACK: Self = SslErrorPolicy::AlwaysIgnore;

    /// Parse a policy name, case-insensitively. Unknown names map to [`Self::FALLBACK`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "alwaysignore" => SslErrorPolicy::AlwaysIgnore,
            "neverignore" => SslErrorPolicy::NeverIgnore,
            _ => Self::FALLBACK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslErrorPolicy::AlwaysIgnore => "alwaysignore",
            SslErrorPolicy::NeverIgnore => "neverignore",
        }
    }
}

impl Default for SslErrorPolicy {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl<'de> Deserialize<'de> for SslErrorPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref().unwrap_or("")))
    }
}

/// Per-host decisions derived from immutable configuration
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    domains: DomainMatcher,
    decrypt: SslDecryptPolicy,
    errors: SslErrorPolicy,
}

impl RedirectPolicy {
    pub fn new(domains: DomainMatcher, decrypt: SslDecryptPolicy, errors: SslErrorPolicy) -> Self {
        Self {
            domains,
            decrypt,
            errors,
        }
    }

    /// Should a CONNECT tunnel to `hostname` be decrypted?
    pub fn should_decrypt(&self, hostname: &str) -> bool {
        match self.decrypt {
            SslDecryptPolicy::Never => false,
            SslDecryptPolicy::Always => true,
            SslDecryptPolicy::OnDemand => self.should_redirect(hostname),
        }
    }

    /// Should requests to `hostname` be sent to the target origin?
    pub fn should_redirect(&self, hostname: &str) -> bool {
        self.domains.matches(hostname)
    }

    /// Accept an upstream certificate given the outcome of normal validation
    pub fn accept_certificate_error(&self, validation_succeeded: bool) -> bool {
        match self.errors {
            SslErrorPolicy::AlwaysIgnore => true,
            SslErrorPolicy::NeverIgnore => validation_succeeded,
        }
    }

    pub fn decrypt_policy(&self) -> SslDecryptPolicy {
        self.decrypt
    }

    pub fn error_policy(&self) -> SslErrorPolicy {
        self.errors
    }

    pub fn domains(&self) -> &DomainMatcher {
        &self.domains
    }
}
