//! Test infrastructure for end-to-end proxy tests.
#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rerouter::redirect::SslDecryptPolicy;
use rerouter::tls::{CertificateAuthority, GeneratedCa};
use rerouter::{Config, ProxyServer, SessionHooks};
use rustls::ServerConfig;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

// ---------------------------------------------------------------------------
// test_report! — step recorder for integration tests
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! test_report {
    ($title:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = &name[..name.len() - 3];
        let name = name.strip_suffix("::{{closure}}").unwrap_or(name);
        $crate::common::TestReport::new(name, $title)
    }};
}

pub struct TestReport {
    name: String,
    title: String,
    steps: Mutex<Vec<String>>,
}

impl TestReport {
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            steps: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, step: String) {
        self.steps.lock().unwrap().push(step);
    }

    pub fn note(&self, msg: impl std::fmt::Display) {
        self.record(format!("note: {}", msg));
    }

    pub fn assert_eq<A, E>(&self, label: &str, actual: &A, expected: &E)
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        self.record(format!("{}: {:?} == {:?}", label, actual, expected));
        assert_eq!(actual, expected, "{}", label);
    }

    pub fn assert_true(&self, label: &str, value: bool) {
        self.record(format!("{}: {}", label, value));
        assert!(value, "{}", label);
    }

    pub fn assert_contains(&self, label: &str, haystack: &str, needle: &str) {
        self.record(format!("{}: {:?} contains {:?}", label, haystack, needle));
        assert!(
            haystack.contains(needle),
            "{}: {:?} does not contain {:?}",
            label,
            haystack,
            needle
        );
    }
}

impl Drop for TestReport {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprintln!("{} ({})", self.title, self.name);
            if let Ok(steps) = self.steps.lock() {
                for step in steps.iter() {
                    eprintln!("  {}", step);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TestCa
// ---------------------------------------------------------------------------

/// A CA for test upstream servers, saved to a tempdir.
pub struct TestCa {
    pub ca: CertificateAuthority,
    pub cert_pem: String,
    pub dir: TempDir,
    pub cert_path: String,
}

impl TestCa {
    pub fn generate() -> Self {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let generated = GeneratedCa::generate().unwrap();
        let ca = CertificateAuthority::from_pem(&generated.cert_pem, &generated.key_pem).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("upstream-ca.crt");
        let key_path = dir.path().join("upstream-ca.key");
        generated.save(&cert_path, &key_path).unwrap();

        Self {
            ca,
            cert_pem: generated.cert_pem,
            cert_path: cert_path.to_str().unwrap().to_string(),
            dir,
        }
    }

    /// Server config for `hostname` signed by this CA (h2 + h1 ALPN).
    pub fn server_tls_config(&self, hostname: &str) -> Arc<ServerConfig> {
        let (cert, key) = self.ca.generate_cert_for_host(hostname).unwrap();
        let chain = vec![cert, self.ca.cert_der().clone()];
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

// ---------------------------------------------------------------------------
// TestUpstream — a tiny HTTPS server
// ---------------------------------------------------------------------------

pub type UpstreamResponse = std::pin::Pin<
    Box<
        dyn std::future::Future<
                Output = std::result::Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error>,
            > + Send,
    >,
>;

pub type UpstreamHandler =
    Arc<dyn Fn(Request<Incoming>) -> UpstreamResponse + Send + Sync + 'static>;

pub struct TestUpstream {
    pub addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestUpstream {
    /// Start an HTTPS server for `localhost` signed by `ca`.
    pub async fn start(ca: &TestCa, handler: UpstreamHandler) -> Self {
        let acceptor = TlsAcceptor::from(ca.server_tls_config("localhost"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let acceptor = acceptor.clone();
                        let handler = handler.clone();

                        tokio::spawn(async move {
                            let Ok(tls_stream) = acceptor.accept(stream).await else {
                                return;
                            };
                            let service = service_fn(move |req: Request<Incoming>| {
                                let handler = handler.clone();
                                handler(req)
                            });
                            let _ = auto::Builder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(tls_stream), service)
                                .await;
                        });
                    }
                }
            }
        });

        Self { addr, shutdown_tx }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `https://localhost:<port>` + `path`
    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port(), path)
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn text(body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .unwrap()
}

/// Returns 200 with a fixed body.
pub fn ok_handler(body: &'static str) -> UpstreamHandler {
    Arc::new(move |_req| Box::pin(async move { Ok(text(body.to_string())) }))
}

/// Echoes the request target and Host back.
pub fn echo_handler() -> UpstreamHandler {
    Arc::new(|req: Request<Incoming>| {
        Box::pin(async move {
            let host = req
                .headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .or_else(|| req.uri().authority().map(|a| a.to_string()))
                .unwrap_or_default();
            let path = req
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default();
            Ok(text(format!("host={}\npath={}\n", host, path)))
        })
    })
}

// ---------------------------------------------------------------------------
// TestProxy — wraps ProxyServer with bind + spawn
// ---------------------------------------------------------------------------

pub struct TestProxy {
    pub addr: SocketAddr,
    /// PEM of the proxy's own root CA, generated on start
    pub ca_pem: String,
    _dir: TempDir,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestProxy {
    /// Config redirecting `domains` to `target_url`, decrypting on demand.
    pub fn config(target_url: &str, domains: &[&str]) -> Config {
        let mut config = Config::minimal(
            target_url.to_string(),
            domains.iter().map(|d| d.to_string()).collect(),
        );
        config.ssl_decrypt_policy = SslDecryptPolicy::OnDemand;
        config
    }

    pub async fn start(config: Config) -> Self {
        Self::launch(config, None).await
    }

    pub async fn start_with_hooks(config: Config, hooks: Arc<dyn SessionHooks>) -> Self {
        Self::launch(config, Some(hooks)).await
    }

    async fn launch(mut config: Config, hooks: Option<Arc<dyn SessionHooks>>) -> Self {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("proxy-ca.crt");
        config.proxy_url = Some("127.0.0.1:0".to_string());
        config.ca_cert = Some(cert_path.to_str().unwrap().to_string());
        config.ca_key = Some(dir.path().join("proxy-ca.key").to_str().unwrap().to_string());

        let mut server = ProxyServer::new(config).unwrap();
        if let Some(hooks) = hooks {
            server = server.with_hooks(hooks);
        }
        let ca_pem = std::fs::read_to_string(&cert_path).unwrap();

        let addr = server.bind().await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });

        Self {
            addr,
            ca_pem,
            _dir: dir,
            shutdown_tx,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

fn client_builder(proxy_addr: SocketAddr, trusted_pems: &[&str]) -> reqwest::ClientBuilder {
    let proxy = reqwest::Proxy::all(format!("http://{}", proxy_addr)).unwrap();
    let mut builder = reqwest::Client::builder().proxy(proxy);
    for pem in trusted_pems {
        let cert = reqwest::tls::Certificate::from_pem(pem.as_bytes()).unwrap();
        builder = builder.add_root_certificate(cert);
    }
    builder
}

/// Client routed through the proxy that trusts only the given PEM roots
/// (plus the web roots). Negotiates h2 when offered.
pub fn test_client(proxy_addr: SocketAddr, trusted_pems: &[&str]) -> reqwest::Client {
    client_builder(proxy_addr, trusted_pems).build().unwrap()
}

/// Same as [`test_client`] but HTTP/1.1 only.
pub fn test_client_h1_only(proxy_addr: SocketAddr, trusted_pems: &[&str]) -> reqwest::Client {
    client_builder(proxy_addr, trusted_pems)
        .http1_only()
        .build()
        .unwrap()
}
