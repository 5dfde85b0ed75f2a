//! Per-host TLS server configs for decrypted tunnels

use lru::LruCache;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ca::CertificateAuthority;
use crate::error::{Error, Result};

const DEFAULT_CAPACITY: usize = 1000;

/// Leaf certificates live one day; refresh well before that.
const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

struct CachedConfig {
    config: Arc<ServerConfig>,
    created_at: Instant,
}

/// Signs leaf certificates on demand and caches the resulting server configs
pub struct MitmCertificateGenerator {
    ca: Arc<CertificateAuthority>,
    cache: Mutex<LruCache<String, CachedConfig>>,
    ttl: Duration,
}

impl std::fmt::Debug for MitmCertificateGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MitmCertificateGenerator")
            .field("cached_hosts", &self.cache_size())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl MitmCertificateGenerator {
    pub fn new(ca: CertificateAuthority) -> Self {
        Self::with_cache(ca, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_cache(ca: CertificateAuthority, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ca: Arc::new(ca),
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, CachedConfig>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Server config presenting a certificate for `hostname`, with h2 and
    /// http/1.1 offered over ALPN
    pub fn server_config_for_host(&self, hostname: &str) -> Result<Arc<ServerConfig>> {
        let key = hostname.to_string();
        {
            let mut cache = self.cache();
            match cache.get(&key) {
                Some(entry) if entry.created_at.elapsed() < self.ttl => {
                    tracing::debug!(hostname = %hostname, "Using cached certificate");
                    return Ok(entry.config.clone());
                }
                Some(_) => {
                    cache.pop(&key);
                }
                None => {}
            }
        }

        tracing::debug!(hostname = %hostname, "Generating new certificate");
        let (cert, private_key) = self.ca.generate_cert_for_host(hostname)?;
        let chain = vec![cert, self.ca.cert_der().clone()];

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, private_key)
            .map_err(|e| Error::tls(format!("Failed to build server config: {}", e)))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let config = Arc::new(config);

        self.cache().put(
            key,
            CachedConfig {
                config: config.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(config)
    }

    /// The CA certificate clients must trust
    pub fn ca_cert_der(&self) -> &CertificateDer<'static> {
        self.ca.cert_der()
    }

    pub fn cache_size(&self) -> usize {
        self.cache().len()
    }
}
