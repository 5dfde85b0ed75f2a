//! Main proxy server

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use super::handler::ProxyHandler;
use super::tunnel::TunnelHandler;
use super::upstream::UpstreamClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::redirect::{ProxyEndpoint, SessionHooks};
use crate::tls::{upstream_client_config, upstream_roots, CertificateAuthority, MitmCertificateGenerator};

/// The main proxy server
pub struct ProxyServer {
    endpoint: ProxyEndpoint,
    hooks: Arc<dyn SessionHooks>,
    mitm_generator: Arc<MitmCertificateGenerator>,
    upstream_roots: RootCertStore,
    listener: Option<TcpListener>,
}

impl ProxyServer {
    /// Create a proxy server from configuration.
    ///
    /// Loads the root CA, generating it on first use, and the upstream
    /// trust roots. Nothing is bound until [`ProxyServer::bind`].
    pub fn new(config: Config) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let hooks: Arc<dyn SessionHooks> = Arc::new(config.redirector()?);

        let (ca_cert, ca_key) = config.ca_paths();
        let ca = CertificateAuthority::load_or_generate(&ca_cert, &ca_key)?;
        let upstream_roots = upstream_roots(config.upstream_tls_ca.as_deref().map(Path::new))?;

        tracing::info!(
            target_url = %config.target_url,
            domains = config.redirect_domains.len(),
            patches = config.url_patches.len(),
            decrypt = config.ssl_decrypt_policy.as_str(),
            errors = config.ssl_error_policy.as_str(),
            "Redirect engine initialized"
        );

        Ok(Self::with_components(
            endpoint,
            hooks,
            Arc::new(MitmCertificateGenerator::new(ca)),
            upstream_roots,
        ))
    }

    /// Create a server from already built parts
    pub fn with_components(
        endpoint: ProxyEndpoint,
        hooks: Arc<dyn SessionHooks>,
        mitm_generator: Arc<MitmCertificateGenerator>,
        upstream_roots: RootCertStore,
    ) -> Self {
        Self {
            endpoint,
            hooks,
            mitm_generator,
            upstream_roots,
            listener: None,
        }
    }

    /// Replace the session hooks, e.g. with a custom implementation
    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the proxy server with graceful shutdown
    pub async fn run_until_shutdown(
        mut self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        let local_addr = self.bind().await?;
        tracing::info!(address = %local_addr, url = %self.endpoint, "Proxy server listening");
        self.serve(shutdown).await
    }

    /// Bind the configured endpoint and return the actual listen address.
    ///
    /// Useful with port 0 to discover the assigned port. Call `serve()`
    /// afterwards to start accepting connections.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let host = self.endpoint.host().to_string();
        let port = self.endpoint.port();

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| Error::proxy(format!("Failed to bind to {}:{}: {}", host, port, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::proxy(format!("Failed to get local address: {}", e)))?;

        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Serve connections on the bound listener until `shutdown` fires
    pub async fn serve(mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::proxy("bind() must be called before serve()"))?;

        let tls_config = upstream_client_config(self.upstream_roots.clone(), self.hooks.clone())?;
        let upstream = Arc::new(UpstreamClient::new(tls_config));
        let tunnel_handler = Arc::new(TunnelHandler::new(
            self.hooks.clone(),
            self.mitm_generator.clone(),
            upstream.clone(),
        ));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    return Ok(());
                }
                result = listener.accept() => {
                    let (stream, client_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    tracing::debug!(client = %client_addr, "New connection");
                    self.spawn_connection(stream, client_addr, &tunnel_handler, &upstream);
                }
            }
        }
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection(
        &self,
        stream: TcpStream,
        client_addr: SocketAddr,
        tunnel_handler: &Arc<TunnelHandler>,
        upstream: &Arc<UpstreamClient>,
    ) {
        let hooks = self.hooks.clone();
        let tunnel_handler = tunnel_handler.clone();
        let upstream = upstream.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let handler =
                    ProxyHandler::new(hooks.clone(), tunnel_handler.clone(), upstream.clone());
                async move { handler.handle(req).await }
            });

            if let Err(e) = http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                if !e.to_string().contains("connection closed") {
                    tracing::debug!(client = %client_addr, error = %e, "Connection error");
                }
            }
        });
    }

    /// The configured listen endpoint
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn mitm_generator(&self) -> &Arc<MitmCertificateGenerator> {
        &self.mitm_generator
    }
}
