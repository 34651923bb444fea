//! HTTP access for revocation and timestamp sources.
//!
//! Sources talk to the network only through [`HttpTransport`], so tests can
//! substitute canned responses. [`UreqTransport`] is the default
//! implementation (feature `http`).

use crate::config::NetworkPolicy;
use crate::error::{Error, Result};
use std::time::Duration;

/// HTTP method used by a [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`, used for CRL downloads
    Get,
    /// `POST`, used for OCSP and TSA requests
    Post,
}

/// One outgoing request.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Absolute URL
    pub url: String,
    /// `Content-Type` of the body (POST only)
    pub content_type: Option<&'static str>,
    /// `Accept` header
    pub accept: Option<&'static str>,
    /// Request body (POST only)
    pub body: Vec<u8>,
    /// HTTP basic authentication
    pub basic_auth: Option<(String, String)>,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("body", &format!("{} bytes", self.body.len()))
            .field("basic_auth", &self.basic_auth.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            content_type: None,
            accept: None,
            body: Vec::new(),
            basic_auth: None,
        }
    }

    /// A `POST` request with a body of `content_type`.
    pub fn post(url: impl Into<String>, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            content_type: Some(content_type),
            accept: None,
            body,
            basic_auth: None,
        }
    }

    /// Set the `Accept` header.
    pub fn with_accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Use HTTP basic authentication.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }
}

/// Blocking HTTP client.
///
/// Implementations return the response body for a 2xx status and
/// [`Error::Transport`] for everything else, including timeouts.
pub trait HttpTransport: Send + Sync {
    /// Perform `request`, giving up after `timeout`.
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<Vec<u8>>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<Vec<u8>> {
        (**self).send(request, timeout)
    }
}

/// Send `request`, retrying failures with exponential backoff.
pub fn send_with_retry(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    policy: &NetworkPolicy,
) -> Result<Vec<u8>> {
    retry_with_backoff(policy, &request.url, || transport.send(request, policy.timeout))
}

/// Run `operation` until it succeeds or `policy.retry_count` retries are
/// used up. The last error is returned.
pub fn retry_with_backoff<T, F>(policy: &NetworkPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut result = operation();
    let mut attempt = 0;

    while let Err(err) = &result {
        if attempt >= policy.retry_count || matches!(err, Error::Cancelled) {
            break;
        }
        attempt += 1;
        let delay = policy.backoff_for(attempt);
        log::debug!("Retry #{} for {} in {:?} after error: {}", attempt, what, delay, err);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        result = operation();
    }

    if let Err(err) = &result {
        log::warn!("Giving up on {} after {} attempt(s): {}", what, attempt + 1, err);
    }
    result
}

/// [`HttpTransport`] backed by `ureq`.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct UreqTransport {
    user_agent: Option<String>,
}

#[cfg(feature = "http")]
impl UreqTransport {
    /// Transport with the default user agent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[cfg(feature = "http")]
impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<Vec<u8>> {
        use std::io::Read;

        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let method = match request.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        };
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("{}/{}", crate::NAME, crate::VERSION));

        let mut req = agent.request(method, &request.url).set("User-Agent", &user_agent);
        if let Some(content_type) = request.content_type {
            req = req.set("Content-Type", content_type);
        }
        if let Some(accept) = request.accept {
            req = req.set("Accept", accept);
        }
        if let Some((user, password)) = &request.basic_auth {
            req = req.set("Authorization", &basic_auth_header(user, password));
        }

        let transport_err = |reason: String| Error::Transport {
            url: request.url.clone(),
            reason,
        };
        let response = match request.method {
            HttpMethod::Get => req.call(),
            HttpMethod::Post => req.send_bytes(&request.body),
        }
        .map_err(|e| transport_err(e.to_string()))?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| transport_err(e.to_string()))?;
        log::debug!("{} {} -> {} bytes", method, request.url, body.len());
        Ok(body)
    }
}

/// Largest response body accepted from a source.
#[cfg(feature = "http")]
const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;

/// `Basic <base64(user:password)>`.
pub fn basic_auth_header(user: &str, password: &str) -> String {
    use base64::Engine;
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(retries: u32) -> NetworkPolicy {
        NetworkPolicy {
            timeout: Duration::from_millis(10),
            retry_count: retries,
            backoff: Duration::ZERO,
        }
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl HttpTransport for Flaky {
        fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::Transport {
                    url: request.url.clone(),
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(b"ok".to_vec())
            }
        }
    }

    #[test]
    fn test_retry_until_success() {
        let transport = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let body = send_with_retry(&transport, &HttpRequest::get("http://a.test"), &fast_policy(2)).unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_exhausted() {
        let transport = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = send_with_retry(&transport, &HttpRequest::get("http://a.test"), &fast_policy(1)).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("Aladdin", "open sesame"), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert_eq!(basic_auth_header("a", "b"), "Basic YTpi");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let req = HttpRequest::post("http://tsa.test", "application/timestamp-query", vec![1, 2])
            .with_basic_auth("user", "secret");
        let debug = format!("{:?}", req);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
