//! Forwarding requests to their final URL

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HeaderName, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use super::response::ProxyBody;
use crate::error::{Error, Result};

/// Hop-by-hop headers that must not be forwarded (RFC 7230 §6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// `Host` header value for a URL; default ports are omitted
fn host_header(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Request target: absolute for HTTP/2, origin-form for HTTP/1.1
fn request_target(target: &Url, http2: bool) -> String {
    if http2 {
        let mut absolute = target.clone();
        absolute.set_fragment(None);
        return absolute.to_string();
    }
    match target.query() {
        Some(query) => format!("{}?{}", target.path(), query),
        None => target.path().to_string(),
    }
}

/// Rebuild a client request for the upstream at `target`
fn prepare_request<B>(req: Request<B>, target: &Url, http2: bool) -> Result<Request<B>> {
    let (parts, body) = req.into_parts();

    let uri: Uri = request_target(target, http2)
        .parse()
        .map_err(|e| Error::invalid_url(format!("'{}': {}", target, e)))?;

    let mut builder = Request::builder().method(parts.method).uri(uri);
    for (name, value) in parts.headers.iter() {
        if name == HOST || is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if !http2 {
        builder = builder.header(HOST, host_header(target));
    }

    builder
        .body(body)
        .map_err(|e| Error::proxy(format!("Failed to build request: {}", e)))
}

/// Opens a fresh connection per request and relays it
pub struct UpstreamClient {
    tls_config: Arc<ClientConfig>,
}

impl UpstreamClient {
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self { tls_config }
    }

    /// Send `req` to `target`, over TLS when the scheme is `https`.
    /// HTTP/2 is used when the upstream selects it over ALPN.
    pub async fn forward<B>(&self, req: Request<B>, target: &Url) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let host = target
            .host_str()
            .ok_or_else(|| Error::invalid_url(format!("'{}' has no host", target)))?;
        let port = target
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_url(format!("'{}' has no port", target)))?;
        let connect_host = host.trim_start_matches('[').trim_end_matches(']');

        let tcp = TcpStream::connect((connect_host, port))
            .await
            .map_err(|e| Error::proxy(format!("Failed to connect to {}:{}: {}", host, port, e)))?;

        match target.scheme() {
            "http" => send_http1(TokioIo::new(tcp), req, target).await,
            "https" => {
                let server_name = ServerName::try_from(connect_host.to_string())
                    .map_err(|e| Error::proxy(format!("Invalid server name '{}': {}", host, e)))?;
                let tls = TlsConnector::from(self.tls_config.clone())
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::tls(format!("TLS connection to {} failed: {}", host, e)))?;

                let http2 = tls.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
                tracing::debug!(host = %host, h2 = http2, "Upstream TLS handshake complete");

                if http2 {
                    send_http2(TokioIo::new(tls), req, target).await
                } else {
                    send_http1(TokioIo::new(tls), req, target).await
                }
            }
            other => Err(Error::invalid_url(format!(
                "cannot forward to scheme '{}'",
                other
            ))),
        }
    }
}

async fn send_http1<S, B>(io: TokioIo<S>, req: Request<B>, target: &Url) -> Result<Response<ProxyBody>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| Error::proxy(format!("HTTP handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Upstream connection error");
        }
    });

    let resp = sender
        .send_request(prepare_request(req, target, false)?)
        .await
        .map_err(|e| Error::proxy(format!("Request failed: {}", e)))?;
    Ok(resp.map(|body| body.boxed()))
}

async fn send_http2<S, B>(io: TokioIo<S>, req: Request<B>, target: &Url) -> Result<Response<ProxyBody>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io)
        .await
        .map_err(|e| Error::proxy(format!("HTTP/2 handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Upstream HTTP/2 connection error");
        }
    });

    let resp = sender
        .send_request(prepare_request(req, target, true)?)
        .await
        .map_err(|e| Error::proxy(format!("HTTP/2 request failed: {}", e)))?;
    Ok(resp.map(|body| body.boxed()))
}
