//! Address normalization for loosely written `host[:port]` settings

use std::fmt;
use url::Url;

use crate::error::{Error, Result};

/// Host the proxy listens on when `proxy_url` is not configured
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";

/// Port the proxy listens on when `proxy_url` carries none
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Index of the colon in `https://`. A last colon at or before this
/// position belongs to the scheme separator, not to a port.
const SCHEME_COLON_LIMIT: usize = 5;

fn has_http_scheme(address: &str) -> bool {
    address.starts_with("http://") || address.starts_with("https://")
}

fn strip_scheme(address: &str) -> &str {
    address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address)
}

/// Byte offset where the authority of an `http(s)://` string ends
fn authority_end(address: &str) -> usize {
    let start = address.find("://").map(|i| i + 3).unwrap_or(0);
    address[start..]
        .find('/')
        .map(|i| start + i)
        .unwrap_or(address.len())
}

/// Split `host:port` on the port colon. A colon inside IPv6 brackets
/// is part of the host.
fn split_port(authority: &str) -> Option<(&str, &str)> {
    authority
        .rsplit_once(':')
        .filter(|(_, port)| !port.contains(']'))
}

/// The `host[:port]` part of an address, without scheme or path
fn authority(address: &str) -> Option<&str> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }
    let rest = strip_scheme(address).trim_end_matches('/');
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Turn a loose address into an absolute URL string ending in `/`.
///
/// A missing scheme becomes `http://`. When `default_port` is given and the
/// address has no port, the port is inserted after the host. An address
/// that already has a port is left as is and a warning is logged.
pub fn normalize(address: &str, default_port: Option<u16>) -> String {
    let address = address.trim();
    let mut result = if has_http_scheme(address) {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    if let Some(port) = default_port {
        let end = authority_end(&result);
        match result[..end].rfind(':') {
            Some(idx) if idx > SCHEME_COLON_LIMIT && !result[idx..end].contains(']') => {
                tracing::warn!(
                    address = %address,
                    port,
                    "Can't add port: the address has a port number already"
                );
            }
            _ => result.insert_str(end, &format!(":{}", port)),
        }
    }

    let trimmed = result.trim_end_matches('/').len();
    result.truncate(trimmed);
    result.push('/');
    result
}

/// Bare host of an address (`http://host:8080/` -> `host`)
pub fn extract_host(address: &str) -> Option<String> {
    let authority = authority(address)?;
    let host = match split_port(authority) {
        Some((host, _)) => host,
        None => authority,
    };
    Some(host.to_string())
}

/// Bare port of an address; `Ok(None)` when the address has no port
pub fn extract_port(address: &str) -> Result<Option<u16>> {
    let Some(authority) = authority(address) else {
        return Ok(None);
    };
    match split_port(authority) {
        None => Ok(None),
        Some((_, port)) => port.parse::<u16>().map(Some).map_err(|_| {
            Error::invalid_url(format!(
                "invalid port '{}' in address '{}'",
                port,
                address.trim()
            ))
        }),
    }
}

/// The local address the proxy listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    url: String,
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    /// Derive the listen address from the optional `proxy_url` setting
    pub fn from_proxy_url(proxy_url: Option<&str>) -> Result<Self> {
        let url = match proxy_url.map(str::trim).filter(|s| !s.is_empty()) {
            None => normalize(DEFAULT_PROXY_HOST, Some(DEFAULT_PROXY_PORT)),
            Some(address) => {
                let default_port = match extract_port(address)? {
                    Some(_) => None,
                    None => Some(DEFAULT_PROXY_PORT),
                };
                normalize(address, default_port)
            }
        };

        Url::parse(&url)
            .map_err(|e| Error::config(format!("Invalid proxy_url '{}': {}", url, e)))?;

        let host = extract_host(&url)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config(format!("proxy_url '{}' has no host", url)))?;
        let port = extract_port(&url)?.unwrap_or(DEFAULT_PROXY_PORT);

        Ok(Self {
            url,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }

    /// Normalized URL form, e.g. `http://127.0.0.1:8080/`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self {
            url: normalize(DEFAULT_PROXY_HOST, Some(DEFAULT_PROXY_PORT)),
            host: DEFAULT_PROXY_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
