//! URL rewriting: origin replacement followed by literal patches

use std::fmt;
use url::Url;

use super::address::normalize;
use crate::error::{Error, Result};

/// Destination that redirected requests are sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOrigin {
    scheme: String,
    host: String,
    port: u16,
}

impl TargetOrigin {
    /// Build the origin from the `target_url` setting
    pub fn parse(target_url: &str) -> Result<Self> {
        if target_url.trim().is_empty() {
            return Err(Error::config("target_url must not be empty"));
        }

        let normalized = normalize(target_url, None);
        let url = Url::parse(&normalized).map_err(|e| {
            Error::config(format!("Invalid target_url '{}': {}", target_url.trim(), e))
        })?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(Error::config(format!(
                "target_url must use http or https, got '{}'",
                scheme
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("target_url '{}' has no host", normalized)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("target_url '{}' has no port", normalized)))?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A literal find/replace applied to the rewritten URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRule {
    pub find: String,
    pub replace: String,
}

impl PatchRule {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// Replace every occurrence of `find`. An empty `find` leaves the text as is.
    pub fn apply(&self, text: &str) -> String {
        if self.find.is_empty() {
            return text.to_string();
        }
        text.replace(&self.find, &self.replace)
    }
}

/// Rewrite `original_url` onto `target` and apply `patches` in order.
///
/// Path, query and fragment of the original are kept. Each patch sees the
/// output of the one before it.
pub fn rewrite(original_url: &str, target: &TargetOrigin, patches: &[PatchRule]) -> Result<String> {
    let mut url = Url::parse(original_url)
        .map_err(|e| Error::invalid_url(format!("'{}': {}", original_url, e)))?;

    url.set_scheme(target.scheme()).map_err(|_| {
        Error::invalid_url(format!(
            "cannot change scheme of '{}' to {}",
            original_url,
            target.scheme()
        ))
    })?;
    url.set_host(Some(target.host()))
        .map_err(|e| Error::invalid_url(format!("cannot set host '{}': {}", target.host(), e)))?;
    url.set_port(Some(target.port())).map_err(|_| {
        Error::invalid_url(format!("cannot set port on '{}'", original_url))
    })?;

    Ok(patches
        .iter()
        .fold(url.to_string(), |acc, patch| patch.apply(&acc)))
}

/// Target origin and patch list bundled for repeated rewriting
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    target: TargetOrigin,
    patches: Vec<PatchRule>,
}

impl UrlRewriter {
    pub fn new(target: TargetOrigin, patches: Vec<PatchRule>) -> Self {
        Self { target, patches }
    }

    pub fn rewrite(&self, original_url: &str) -> Result<String> {
        rewrite(original_url, &self.target, &self.patches)
    }

    pub fn target(&self) -> &TargetOrigin {
        &self.target
    }

    pub fn patches(&self) -> &[PatchRule] {
        &self.patches
    }
}
