//! Root CA used to sign certificates for decrypted tunnels

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

const CA_COMMON_NAME: &str = "Rerouter Proxy CA";
const CA_ORGANIZATION: &str = "Rerouter";

/// Lifetime of the root CA
const CA_VALIDITY_DAYS: i64 = 3650;

/// Lifetime of per-host leaf certificates
const LEAF_VALIDITY_DAYS: i64 = 1;

/// Parameters shared by CA generation and signing. The issuer name of every
/// leaf must equal the subject of the saved root, so both paths use this.
fn ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, CA_COMMON_NAME);
    params
        .distinguished_name
        .push(DnType::OrganizationName, CA_ORGANIZATION);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

/// A freshly generated CA in PEM form
pub struct GeneratedCa {
    pub cert_pem: String,
    pub key_pem: String,
}

impl GeneratedCa {
    /// Generate a new self-signed root CA
    pub fn generate() -> Result<Self> {
        let mut params = ca_params();
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(CA_VALIDITY_DAYS);

        let key_pair = KeyPair::generate().map_err(|e| Error::certificate(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::certificate(e.to_string()))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Write the certificate and key. The key file is made owner-only on Unix.
    pub fn save(&self, cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<()> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        std::fs::write(cert_path, &self.cert_pem).map_err(|e| {
            Error::certificate(format!(
                "Failed to write certificate to '{}': {}",
                cert_path.display(),
                e
            ))
        })?;
        std::fs::write(key_path, &self.key_pem).map_err(|e| {
            Error::certificate(format!(
                "Failed to write key to '{}': {}",
                key_path.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(key_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(key_path, perms)?;
        }

        Ok(())
    }
}

/// A loaded CA that signs leaf certificates
pub struct CertificateAuthority {
    key_pair: Arc<KeyPair>,
    cert_der: CertificateDer<'static>,
}

impl CertificateAuthority {
    /// Load a CA from PEM-encoded certificate and key
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::certificate(format!("Failed to parse CA private key: {}", e)))?;

        let mut reader = BufReader::new(cert_pem.as_bytes());
        let cert_der = rustls_pemfile::certs(&mut reader)
            .filter_map(|r| r.ok())
            .next()
            .ok_or_else(|| Error::certificate("No certificate found in PEM"))?;

        Ok(Self {
            key_pair: Arc::new(key_pair),
            cert_der,
        })
    }

    /// Load a CA from files
    pub fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
            Error::certificate(format!(
                "Failed to read CA certificate '{}': {}",
                cert_path.display(),
                e
            ))
        })?;
        let key_pem = std::fs::read_to_string(key_path).map_err(|e| {
            Error::certificate(format!(
                "Failed to read CA key '{}': {}",
                key_path.display(),
                e
            ))
        })?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Load the CA from disk, generating and saving a new one when either file
    /// is missing. Clients must trust the certificate at `cert_path`.
    pub fn load_or_generate(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        if cert_path.exists() && key_path.exists() {
            tracing::debug!(cert = %cert_path.display(), "Loading CA certificate");
            return Self::from_files(cert_path, key_path);
        }

        let generated = GeneratedCa::generate()?;
        generated.save(cert_path, key_path)?;
        tracing::info!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Generated new CA certificate; install it as trusted in your client"
        );
        Self::from_pem(&generated.cert_pem, &generated.key_pem)
    }

    /// Sign a short-lived server certificate for `hostname`.
    /// IP literals get an IP address SAN, everything else a DNS name.
    pub fn generate_cert_for_host(
        &self,
        hostname: &str,
    ) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, bare);
        params.subject_alt_names = match bare.parse::<IpAddr>() {
            Ok(ip) => vec![SanType::IpAddress(ip)],
            Err(_) => vec![SanType::DnsName(bare.try_into().map_err(|e| {
                Error::certificate(format!("Invalid hostname '{}': {}", hostname, e))
            })?)],
        };
        params.is_ca = IsCa::NoCa;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::minutes(5);
        params.not_after = params.not_before + time::Duration::days(LEAF_VALIDITY_DAYS);

        let leaf_key = KeyPair::generate().map_err(|e| Error::certificate(e.to_string()))?;

        let issuer = ca_params()
            .self_signed(&self.key_pair)
            .map_err(|e| Error::certificate(format!("Failed to create CA for signing: {}", e)))?;
        let cert = params
            .signed_by(&leaf_key, &issuer, &self.key_pair)
            .map_err(|e| Error::certificate(format!("Failed to sign certificate: {}", e)))?;

        Ok((
            CertificateDer::from(cert.der().to_vec()),
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        ))
    }

    /// The CA certificate in DER format
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }
}
