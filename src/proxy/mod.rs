//! HTTP proxy server implementation

mod handler;
mod response;
mod server;
mod tunnel;
mod upstream;

pub use handler::ProxyHandler;
pub use response::ProxyBody;
pub use server::ProxyServer;
pub use tunnel::TunnelHandler;
pub use upstream::UpstreamClient;
