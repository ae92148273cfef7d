//! Single-step HTTP dispatch
//!
//! Builds and sends one interpolated request, applying the run's cookie jar
//! on the way out and absorbing Set-Cookie headers on the way back. Transport
//! failures are classified so step records can distinguish a timeout from a
//! refused connection.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, Method, Url};

use crate::engine::interpolate::ConcreteRequest;
use crate::engine::record::ResponseSnapshot;
use crate::errors::Result;
use crate::sessions::CookieJar;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a failed exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    InvalidRequest,
    Other,
}

/// The result of one dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    Response {
        snapshot: ResponseSnapshot,
        elapsed: Duration,
    },
    TransportError {
        kind: TransportErrorKind,
        message: String,
        elapsed: Duration,
    },
}

/// Sends interpolated requests for the engine.
#[derive(Debug, Clone)]
pub struct StepRunner {
    client: Client,
    timeout: Duration,
}

impl StepRunner {
    pub fn new(timeout: Duration) -> Result<Self> {
        // Cookies are managed by the run's own jar, not reqwest's store,
        // so the jar can be snapshotted into the execution record.
        let client = Client::builder().build()?;
        Ok(Self { client, timeout })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Dispatch one request. Never returns Err for HTTP-level failures; any
    /// status comes back as a `Response` outcome for expectation checks.
    pub async fn dispatch(
        &self,
        request: &ConcreteRequest,
        jar: &mut CookieJar,
    ) -> DispatchOutcome {
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(err) => {
                return DispatchOutcome::TransportError {
                    kind: TransportErrorKind::InvalidRequest,
                    message: format!("invalid URL '{}': {err}", request.url),
                    elapsed: Duration::ZERO,
                }
            }
        };
        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return DispatchOutcome::TransportError {
                    kind: TransportErrorKind::InvalidRequest,
                    message: format!("invalid HTTP method '{}'", request.method),
                    elapsed: Duration::ZERO,
                }
            }
        };

        let host = url.host_str().unwrap_or("").to_string();
        let path = url.path().to_string();
        let is_secure = url.scheme() == "https";

        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query.iter().collect::<Vec<_>>());
        }

        for (name, value) in &request.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                builder = builder.header(name, value);
            } else {
                tracing::warn!(header = %name, "skipping invalid header");
            }
        }

        jar.remove_expired();
        if let Some(cookie_header) = jar.cookie_header(&host, &path, is_secure) {
            if let Ok(value) = HeaderValue::try_from(cookie_header) {
                builder = builder.header(COOKIE, value);
            }
        }

        if let Some(body) = &request.body {
            let has_content_type = request
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();

                // Repeated headers (e.g. multiple Set-Cookie) are joined so
                // the audit snapshot keeps every value.
                let mut headers: IndexMap<String, String> = IndexMap::new();
                for (name, value) in response.headers() {
                    if let Ok(value) = value.to_str() {
                        match headers.get_mut(name.as_str()) {
                            Some(existing) => {
                                existing.push_str(", ");
                                existing.push_str(value);
                            }
                            None => {
                                headers.insert(name.as_str().to_string(), value.to_string());
                            }
                        }
                    }
                }
                for value in response.headers().get_all(SET_COOKIE) {
                    if let Ok(value) = value.to_str() {
                        jar.store_set_cookie(value, &host);
                    }
                }

                let body = response.text().await.unwrap_or_default();
                DispatchOutcome::Response {
                    snapshot: ResponseSnapshot {
                        status,
                        headers,
                        body,
                    },
                    elapsed: start.elapsed(),
                }
            }
            Err(err) => {
                let kind = if err.is_timeout() {
                    TransportErrorKind::Timeout
                } else if err.is_connect() {
                    TransportErrorKind::Connect
                } else {
                    TransportErrorKind::Other
                };
                let message = match kind {
                    TransportErrorKind::Timeout => {
                        format!("request timed out after {:?}", self.timeout)
                    }
                    TransportErrorKind::Connect => format!("connection failed: {err}"),
                    _ => format!("request failed: {err}"),
                };
                DispatchOutcome::TransportError {
                    kind,
                    message,
                    elapsed: start.elapsed(),
                }
            }
        }
    }
}
