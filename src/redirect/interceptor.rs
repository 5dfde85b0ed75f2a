//! Hook points the proxy transport calls for every tunnel, request and
//! upstream certificate

use super::policy::RedirectPolicy;
use super::rewrite::UrlRewriter;

/// Decisions the transport delegates to the redirect engine.
///
/// Implementations must be cheap and side-effect free apart from logging;
/// they are called concurrently from every connection task.
pub trait SessionHooks: Send + Sync {
    /// Called once per CONNECT request. Returns true to decrypt the tunnel.
    fn on_tunnel_decision(&self, hostname: &str) -> bool;

    /// Called for every request the proxy can see in clear text.
    /// Returns the URL to send the request to, or `None` to leave it as is.
    fn on_request(&self, request_url: &str, hostname: &str) -> Option<String>;

    /// Called when an upstream TLS certificate has been validated.
    /// Returns true to accept the certificate.
    fn on_certificate_validation(&self, hostname: &str, validation_succeeded: bool) -> bool;
}

/// Session hooks backed by the configured redirect policy and rewriter
#[derive(Debug, Clone)]
pub struct Redirector {
    policy: RedirectPolicy,
    rewriter: UrlRewriter,
}

impl Redirector {
    pub fn new(policy: RedirectPolicy, rewriter: UrlRewriter) -> Self {
        Self { policy, rewriter }
    }

    pub fn policy(&self) -> &RedirectPolicy {
        &self.policy
    }

    pub fn rewriter(&self) -> &UrlRewriter {
        &self.rewriter
    }
}

impl SessionHooks for Redirector {
    fn on_tunnel_decision(&self, hostname: &str) -> bool {
        let decrypt = self.policy.should_decrypt(hostname);
        tracing::debug!(host = %hostname, decrypt, "Tunnel decision");
        decrypt
    }

    fn on_request(&self, request_url: &str, hostname: &str) -> Option<String> {
        if !self.policy.should_redirect(hostname) {
            return None;
        }

        match self.rewriter.rewrite(request_url) {
            Ok(rewritten) => {
                tracing::info!(from = %request_url, to = %rewritten, "Redirecting");
                Some(rewritten)
            }
            Err(e) => {
                tracing::warn!(url = %request_url, error = %e, "Cannot rewrite request URL");
                None
            }
        }
    }

    fn on_certificate_validation(&self, hostname: &str, validation_succeeded: bool) -> bool {
        let accept = self.policy.accept_certificate_error(validation_succeeded);
        if !validation_succeeded {
            tracing::debug!(host = %hostname, accept, "Upstream certificate failed validation");
        }
        accept
    }
}
