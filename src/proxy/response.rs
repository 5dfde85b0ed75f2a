//! Shared HTTP response helpers

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy produces
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|e| match e {}).boxed()
}

fn text_response(status: StatusCode, body: String) -> Response<ProxyBody> {
    let mut resp = Response::new(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}

/// Empty response with the given status, used to accept CONNECT
pub fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

/// 502 Bad Gateway for upstream failures
pub fn error_response(message: &str) -> Response<ProxyBody> {
    text_response(
        StatusCode::BAD_GATEWAY,
        format!("Proxy error: {}\n", message),
    )
}

/// 400 Bad Request for requests the proxy cannot route
pub fn bad_request(message: &str) -> Response<ProxyBody> {
    text_response(StatusCode::BAD_REQUEST, format!("{}\n", message))
}
