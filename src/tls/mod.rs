//! TLS and certificate management

mod ca;
mod mitm;
mod verify;

pub use ca::{CertificateAuthority, GeneratedCa};
pub use mitm::MitmCertificateGenerator;
pub use verify::{upstream_client_config, upstream_roots, HookedCertVerifier};
