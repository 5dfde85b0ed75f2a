//! Upstream certificate verification routed through the session hooks

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::redirect::SessionHooks;

/// Runs normal WebPKI validation, then lets the hooks accept or reject
/// the outcome.
pub struct HookedCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    hooks: Arc<dyn SessionHooks>,
}

impl std::fmt::Debug for HookedCertVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookedCertVerifier").finish_non_exhaustive()
    }
}

impl HookedCertVerifier {
    pub fn new(roots: RootCertStore, hooks: Arc<dyn SessionHooks>) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::tls(format!("Failed to build certificate verifier: {}", e)))?;
        Ok(Self { inner, hooks })
    }
}

impl ServerCertVerifier for HookedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let outcome = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );
        let hostname = server_name.to_str();

        if let Err(ref e) = outcome {
            tracing::debug!(host = %hostname, error = %e, "Upstream certificate validation failed");
        }

        if self
            .hooks
            .on_certificate_validation(&hostname, outcome.is_ok())
        {
            return Ok(ServerCertVerified::assertion());
        }

        match outcome {
            Err(e) => Err(e),
            Ok(_) => Err(rustls::Error::General(format!(
                "certificate for {} rejected",
                hostname
            ))),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Web PKI roots plus any PEM certificates found at `extra_ca`
pub fn upstream_roots(extra_ca: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_ca {
        let pem = std::fs::read(path).map_err(|e| {
            Error::tls(format!(
                "Failed to read upstream CA '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut BufReader::new(pem.as_slice())) {
            let cert = cert.map_err(|e| {
                Error::tls(format!("Invalid PEM in '{}': {}", path.display(), e))
            })?;
            roots
                .add(cert)
                .map_err(|e| Error::tls(format!("Rejected upstream CA: {}", e)))?;
            added += 1;
        }
        if added == 0 {
            return Err(Error::tls(format!(
                "No certificates found in '{}'",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), count = added, "Loaded upstream CA certificates");
    }

    Ok(roots)
}

/// Client config for upstream connections, offering h2 and http/1.1
pub fn upstream_client_config(
    roots: RootCertStore,
    hooks: Arc<dyn SessionHooks>,
) -> Result<Arc<ClientConfig>> {
    let verifier = HookedCertVerifier::new(roots, hooks)?;
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
