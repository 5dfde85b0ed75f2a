//! CONNECT tunnels: decrypted or passed through untouched

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use super::response::{error_response, ProxyBody};
use super::upstream::UpstreamClient;
use crate::error::{Error, Result};
use crate::redirect::SessionHooks;
use crate::tls::MitmCertificateGenerator;

/// URL of a request seen inside a decrypted tunnel to `host:port`
pub(crate) fn tunneled_url(host: &str, port: u16, path_and_query: &str) -> String {
    if port == 443 {
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}:{}{}", host, port, path_and_query)
    }
}

/// Runs CONNECT tunnels once the client connection is upgraded
pub struct TunnelHandler {
    hooks: Arc<dyn SessionHooks>,
    mitm_generator: Arc<MitmCertificateGenerator>,
    upstream: Arc<UpstreamClient>,
}

impl TunnelHandler {
    pub fn new(
        hooks: Arc<dyn SessionHooks>,
        mitm_generator: Arc<MitmCertificateGenerator>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            hooks,
            mitm_generator,
            upstream,
        }
    }

    /// Terminate TLS with a leaf for `host` and serve the requests inside
    pub async fn run_mitm_tunnel(&self, upgraded: Upgraded, host: &str, port: u16) -> Result<()> {
        let server_config = self.mitm_generator.server_config_for_host(host)?;
        let client_tls = TlsAcceptor::from(server_config)
            .accept(TokioIo::new(upgraded))
            .await
            .map_err(|e| Error::tls(format!("Failed to accept TLS from client: {}", e)))?;

        tracing::debug!(host = %host, "TLS handshake with client complete");

        let host = host.to_string();
        let hooks = self.hooks.clone();
        let upstream = self.upstream.clone();

        let service = service_fn(move |req: Request<Incoming>| {
            let host = host.clone();
            let hooks = hooks.clone();
            let upstream = upstream.clone();
            async move {
                Ok::<_, hyper::Error>(
                    handle_tunneled_request(req, &host, port, hooks.as_ref(), &upstream).await,
                )
            }
        });

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder.http1().preserve_header_case(true).half_close(true);

        if let Err(e) = builder
            .serve_connection(TokioIo::new(client_tls), service)
            .await
        {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                tracing::debug!(error = %e, "HTTP service error");
            }
        }

        Ok(())
    }

    /// Copy bytes between the client and `host:port` without looking at them
    pub async fn run_passthrough(&self, upgraded: Upgraded, host: &str, port: u16) -> Result<()> {
        let connect_host = host.trim_start_matches('[').trim_end_matches(']');
        let mut server = TcpStream::connect((connect_host, port))
            .await
            .map_err(|e| Error::proxy(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
        let mut client = TokioIo::new(upgraded);

        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut server).await?;
        tracing::debug!(host = %host, sent, received, "Tunnel closed");
        Ok(())
    }
}

async fn handle_tunneled_request(
    req: Request<Incoming>,
    host: &str,
    port: u16,
    hooks: &dyn SessionHooks,
    upstream: &UpstreamClient,
) -> Response<ProxyBody> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let original = tunneled_url(host, port, path_and_query);
    let final_url = hooks.on_request(&original, host).unwrap_or(original);

    let target = match url::Url::parse(&final_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(url = %final_url, error = %e, "Cannot parse request URL");
            return error_response(&format!("invalid URL '{}'", final_url));
        }
    };

    tracing::debug!(method = %req.method(), url = %target, "Forwarding tunneled request");
    match upstream.forward(req, &target).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(url = %target, error = %e, "Failed to forward request");
            error_response(&e.to_string())
        }
    }
}
