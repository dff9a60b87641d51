//! Rate-limited, cached, retrying HTTP transport
//!
//! All crawl strategies of one source fetch through a single `ApiClient`,
//! which enforces the source's rate limit, serves completed requests from
//! the on-disk response cache, and retries transient failures with
//! exponential backoff. 4xx responses fail immediately.

use crate::client::cache::ResponseCache;
use crate::client::rate_limit::RateLimiter;
use crate::config::SourceConfig;
use crate::{ConfigError, Result, TributaryError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default retry budget for transient failures
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A fully substituted request, ready to send
///
/// This is the canonical form the cache key is computed over.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub method: String,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// HTTP client shared by all strategies of one source
pub struct ApiClient {
    client: Client,
    host: String,
    headers: HeaderMap,
    limiter: RateLimiter,
    cache: Option<ResponseCache>,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl ApiClient {
    /// Builds a client from a source configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The source configuration (host, headers, rate limit)
    ///
    /// # Returns
    ///
    /// * `Ok(ApiClient)` - Successfully built client
    /// * `Err(TributaryError)` - Invalid header or cache directory failure
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConfigError::Validation(format!("invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ConfigError::Validation(format!("invalid header value for '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let cache = match &config.cache_dir {
            Some(dir) => Some(ResponseCache::new(Path::new(dir))?),
            None => None,
        };

        Ok(Self {
            client,
            host: config.host.clone(),
            headers,
            limiter: RateLimiter::new(config.rate_limit),
            cache,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
        })
    }

    /// Overrides the retry budget and backoff base (mainly for tests)
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    /// Fetches a request, serving from the response cache when possible
    pub async fn fetch(&mut self, attrs: &RequestAttributes) -> Result<String> {
        self.fetch_inner(attrs, true).await
    }

    /// Fetches a request, bypassing the cache read
    ///
    /// Used by pagination-level empty-page retries, where a cached empty
    /// response would defeat the retry. The response is still written to
    /// the cache.
    pub async fn fetch_fresh(&mut self, attrs: &RequestAttributes) -> Result<String> {
        self.fetch_inner(attrs, false).await
    }

    async fn fetch_inner(&mut self, attrs: &RequestAttributes, use_cache: bool) -> Result<String> {
        let url = self.full_url(&attrs.url);
        let key = ResponseCache::request_key(&attrs.method, &url, &attrs.params, &attrs.body);

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(body) = cache.get(&key) {
                    tracing::debug!("Cache hit for {} {}", attrs.method, url);
                    return Ok(body);
                }
            }
        }

        let method = Method::from_bytes(attrs.method.to_uppercase().as_bytes()).map_err(|_| {
            ConfigError::Validation(format!("unknown HTTP method '{}'", attrs.method))
        })?;

        let mut attempt = 0;
        let mut delay = self.retry_base_delay;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            tracing::debug!(
                "{} {} (attempt {}/{})",
                attrs.method,
                url,
                attempt,
                self.max_attempts
            );

            let mut request = self
                .client
                .request(method.clone(), url.as_str())
                .headers(self.headers.clone());
            if !attrs.params.is_empty() {
                request = request.query(&attrs.params);
            }
            if !attrs.body.is_empty() {
                request = request.json(&attrs.body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response
                            .text()
                            .await
                            .map_err(|e| TributaryError::Http {
                                url: url.clone(),
                                source: e,
                            })?;
                        if let Some(cache) = &self.cache {
                            if let Err(e) = cache.put(&key, &body) {
                                tracing::warn!("Failed to write response cache: {}", e);
                            }
                        }
                        return Ok(body);
                    }

                    // Client errors are never retried
                    if status.is_client_error() {
                        return Err(TributaryError::ClientStatus {
                            url,
                            status: status.as_u16(),
                        });
                    }

                    tracing::warn!("HTTP {} for {}, will retry", status.as_u16(), url);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!("Transient network error for {}: {}", url, e);
                }
                Err(e) => {
                    return Err(TributaryError::Http { url, source: e });
                }
            }

            if attempt >= self.max_attempts {
                return Err(TributaryError::RetryExhausted {
                    url,
                    attempts: attempt,
                });
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    fn full_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.host, url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(host: &str, cache_dir: Option<String>) -> SourceConfig {
        SourceConfig {
            id: "test".to_string(),
            host: host.to_string(),
            headers: BTreeMap::new(),
            rate_limit: 1000,
            cache_dir,
            debug: false,
            entities: vec![],
        }
    }

    fn get(url: &str) -> RequestAttributes {
        RequestAttributes {
            method: "GET".to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let mut client = ApiClient::new(&test_config(&server.uri(), None)).unwrap();
        let body = client.fetch(&get("/items")).await.unwrap();
        assert_eq!(body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = ApiClient::new(&test_config(&server.uri(), None))
            .unwrap()
            .with_retry(3, Duration::from_millis(1));
        let err = client.fetch(&get("/missing")).await.unwrap_err();
        assert!(matches!(
            err,
            TributaryError::ClientStatus { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn test_server_error_exhausts_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let mut client = ApiClient::new(&test_config(&server.uri(), None))
            .unwrap()
            .with_retry(3, Duration::from_millis(1));
        let err = client.fetch(&get("/flaky")).await.unwrap_err();
        assert!(matches!(
            err,
            TributaryError::RetryExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_cache_prevents_duplicate_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(
            &server.uri(),
            Some(dir.path().to_string_lossy().into_owned()),
        );

        let mut client = ApiClient::new(&config).unwrap();
        assert_eq!(client.fetch(&get("/cached")).await.unwrap(), "body");
        assert_eq!(client.fetch(&get("/cached")).await.unwrap(), "body");
    }

    #[tokio::test]
    async fn test_fetch_fresh_bypasses_cache_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body"))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(
            &server.uri(),
            Some(dir.path().to_string_lossy().into_owned()),
        );

        let mut client = ApiClient::new(&config).unwrap();
        client.fetch(&get("/fresh")).await.unwrap();
        client.fetch_fresh(&get("/fresh")).await.unwrap();
    }

    #[tokio::test]
    async fn test_absolute_url_skips_host_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/abs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        // Host points somewhere unreachable; the absolute URL must win
        let mut client =
            ApiClient::new(&test_config("https://unreachable.invalid", None)).unwrap();
        let body = client
            .fetch(&get(&format!("{}/abs", server.uri())))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }
}
