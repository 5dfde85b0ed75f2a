//! HTTP request handler for the proxy

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;

use super::response::{bad_request, empty_response, error_response, ProxyBody};
use super::tunnel::TunnelHandler;
use super::upstream::UpstreamClient;
use crate::redirect::SessionHooks;

/// Main proxy request handler
pub struct ProxyHandler {
    hooks: Arc<dyn SessionHooks>,
    tunnel_handler: Arc<TunnelHandler>,
    upstream: Arc<UpstreamClient>,
}

impl ProxyHandler {
    pub fn new(
        hooks: Arc<dyn SessionHooks>,
        tunnel_handler: Arc<TunnelHandler>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            hooks,
            tunnel_handler,
            upstream,
        }
    }

    /// Handle an incoming proxy request
    pub async fn handle(
        self,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, hyper::Error> {
        if req.method() == Method::CONNECT {
            return Ok(self.handle_connect(req));
        }
        Ok(self.handle_http(req).await)
    }

    fn handle_connect(self, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(host) = req.uri().host().map(str::to_string) else {
            tracing::warn!(uri = %req.uri(), "CONNECT without a host");
            return bad_request("CONNECT requires host:port");
        };
        let port = req.uri().port_u16().unwrap_or(443);

        let decrypt = self.hooks.on_tunnel_decision(&host);
        tracing::debug!(host = %host, port, decrypt, "CONNECT request");

        let upgrade = hyper::upgrade::on(req);
        let tunnel_handler = self.tunnel_handler.clone();

        tokio::spawn(async move {
            let upgraded = match upgrade.await {
                Ok(u) => u,
                Err(e) => {
                    tracing::error!(host = %host, error = %e, "Failed to upgrade connection");
                    return;
                }
            };

            let result = if decrypt {
                tunnel_handler.run_mitm_tunnel(upgraded, &host, port).await
            } else {
                tunnel_handler.run_passthrough(upgraded, &host, port).await
            };

            if let Err(e) = result {
                let err_str = e.to_string();
                if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                    tracing::error!(host = %host, error = %e, "Tunnel error");
                }
            }
        });

        empty_response(StatusCode::OK)
    }

    async fn handle_http(self, req: Request<Incoming>) -> Response<ProxyBody> {
        let uri = req.uri();
        let Some(host) = uri.host().map(str::to_string) else {
            tracing::warn!(uri = %uri, "Rejecting request without an absolute URI");
            return bad_request("Proxy requests must use an absolute URI");
        };
        if uri.scheme().is_none() {
            return bad_request("Proxy requests must use an absolute URI");
        }

        let original = uri.to_string();
        let final_url = self.hooks.on_request(&original, &host).unwrap_or(original);

        let target = match url::Url::parse(&final_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %final_url, error = %e, "Cannot parse request URL");
                return bad_request(&format!("Invalid request URL '{}'", final_url));
            }
        };

        tracing::debug!(method = %req.method(), url = %target, "Forwarding request");
        match self.upstream.forward(req, &target).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(url = %target, error = %e, "HTTP forwarding error");
                error_response(&e.to_string())
            }
        }
    }
}
