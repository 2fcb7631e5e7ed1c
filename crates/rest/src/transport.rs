//! Transport abstraction
//!
//! The engine hands a fully-formed [`RestRequest`] to a [`RestTransport`] and
//! receives an atomic [`RestResponse`] back: the body is fully buffered before
//! the call returns, so a partial read surfaces as a transport error rather
//! than a truncated body. The default implementation drives `reqwest`;
//! deployments with certificate pinning supply their own impl of the trait.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ETAG};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::debug;
use veilnet_domain::constants::API_NETWORK_TIMEOUT;
use veilnet_domain::ApiEndpoint;

/// Classified cause of a transport failure, used by the retry loop to pick
/// between completing, keeping the endpoint, and rotating past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// The caller cancelled the request.
    Cancelled,
    /// The local interface has no connectivity (airplane mode, network down,
    /// roaming disabled). Retrying against a different endpoint cannot help.
    Offline,
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    Other,
}

impl TransportErrorCode {
    pub fn is_cancellation(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for transient local conditions where the next attempt should keep
    /// the same endpoint instead of rotating.
    pub fn is_local_connectivity(self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cancelled => "cancelled",
            Self::Offline => "offline",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A transport-layer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: TransportErrorCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// One attempt's HTTP request, addressed to a concrete endpoint.
///
/// The URL is always `https://<endpoint><path>`; the logical API hostname
/// travels in the `Host` header only.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub endpoint: ApiEndpoint,
    /// Absolute path including the service prefix, e.g. `/app/v1/relays`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// A complete response: status, headers and fully-buffered body.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RestResponse {
    /// The raw `ETag` header value, if present.
    pub fn etag(&self) -> Option<String> {
        self.headers.get(ETAG).and_then(|value| value.to_str().ok()).map(str::to_owned)
    }
}

/// External HTTPS transport consumed by the operation engine.
///
/// Implementations must be cancel-safe: the engine drops the returned future
/// when the operation is cancelled, which must abort the underlying request.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError>;
}

/// Default transport backed by a configured [`reqwest::Client`].
#[derive(Clone)]
pub struct HttpsTransport {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpsTransport {
    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpsTransportBuilder {
        HttpsTransportBuilder::default()
    }
}

/// Builder for [`HttpsTransport`].
#[derive(Debug)]
pub struct HttpsTransportBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    scheme: &'static str,
}

impl Default for HttpsTransportBuilder {
    fn default() -> Self {
        Self { timeout: API_NETWORK_TIMEOUT, user_agent: None, scheme: "https" }
    }
}

impl HttpsTransportBuilder {
    /// Connect timeout applied at the client level; individual requests carry
    /// their own total timeout in [`RestRequest::timeout`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Test-only helper so that the transport can talk to plain-HTTP mock
    /// servers.
    #[cfg(test)]
    pub fn plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    pub fn build(self) -> Result<HttpsTransport, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::new(TransportErrorCode::Other, err.to_string()))?;

        Ok(HttpsTransport { client, scheme: self.scheme })
    }
}

#[async_trait]
impl RestTransport for HttpsTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let url = format!("{}://{}{}", self.scheme, request.endpoint, request.path);
        debug!(method = %request.method, %url, "dispatching request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        debug!(%url, %status, body_len = body.len(), "received response");
        Ok(RestResponse { status, headers, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let code = if error.is_timeout() {
        TransportErrorCode::Timeout
    } else if let Some(io) = find_io_error(&error) {
        match io.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportErrorCode::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                TransportErrorCode::ConnectionReset
            }
            std::io::ErrorKind::NetworkDown
            | std::io::ErrorKind::NetworkUnreachable
            | std::io::ErrorKind::HostUnreachable => TransportErrorCode::Offline,
            _ => TransportErrorCode::Other,
        }
    } else if error.is_connect() {
        TransportErrorCode::ConnectionRefused
    } else {
        TransportErrorCode::Other
    };

    TransportError::new(code, error.to_string())
}

/// Walks the source chain looking for the underlying I/O error.
fn find_io_error(error: &reqwest::Error) -> Option<&std::io::Error> {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn endpoint_of(server: &MockServer) -> ApiEndpoint {
        (*server.address()).into()
    }

    fn request_to(server: &MockServer, req_path: &str) -> RestRequest {
        RestRequest {
            method: Method::GET,
            endpoint: endpoint_of(server),
            path: req_path.to_owned(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn delivers_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app/v1/relays"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc123\"")
                    .set_body_string("{\"countries\":[]}"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpsTransport::builder().plain_http().build().unwrap();
        let response = transport.send(request_to(&server, "/app/v1/relays")).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.etag().as_deref(), Some("\"abc123\""));
        assert_eq!(response.body, b"{\"countries\":[]}");
    }

    #[tokio::test]
    async fn forwards_host_header_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("host", "api.veilnet.net"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request_to(&server, "/app/v1/api-addrs");
        request.headers.insert(reqwest::header::HOST, "api.veilnet.net".parse().unwrap());

        let transport = HttpsTransport::builder().plain_http().build().unwrap();
        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn classifies_refused_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so the connect fails

        let transport = HttpsTransport::builder().plain_http().build().unwrap();
        let request = RestRequest {
            method: Method::GET,
            endpoint: addr.into(),
            path: "/".to_owned(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
        };

        let error = transport.send(request).await.unwrap_err();
        assert_eq!(error.code, TransportErrorCode::ConnectionRefused);
    }

    #[tokio::test]
    async fn classifies_request_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpsTransport::builder().plain_http().build().unwrap();
        let mut request = request_to(&server, "/slow");
        request.timeout = Duration::from_millis(50);

        let error = transport.send(request).await.unwrap_err();
        assert_eq!(error.code, TransportErrorCode::Timeout);
    }
}
