//! Feed retrieval.
//!
//! No retries happen here. A failed source is recovered by the merge step,
//! which substitutes its last good occurrences from cache.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ConfiguredSource, SourceId};
use crate::constants::DEFAULT_USER_AGENT;
use crate::error::{FetchFailure, HearthError, HearthResult};

/// Network transport used to retrieve raw feed bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchFailure>;
}

/// HTTP(S) transport over a shared reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> HearthResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| HearthError::Config(format!("Could not build HTTP client: {e}")))?;
        Ok(HttpTransport { client })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .unwrap_or_default();
        HttpTransport { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchFailure> {
        let url = normalize_feed_url(url);
        let secs = timeout.as_secs();

        let resp = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, secs))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpError(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, secs))?;

        if body.is_empty() {
            return Err(FetchFailure::ParseRejected("empty response body".into()));
        }

        Ok(body.to_vec())
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout_secs: u64) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout(timeout_secs)
    } else {
        FetchFailure::Unreachable(err.to_string())
    }
}

/// `webcal://` is a subscription hint for calendar apps; the feed itself is HTTPS.
pub fn normalize_feed_url(url: &Url) -> Url {
    let replacement = match url.scheme() {
        "webcal" | "webcals" => "https",
        _ => return url.clone(),
    };
    let rest = &url.as_str()[url.scheme().len()..];
    Url::parse(&format!("{replacement}{rest}")).unwrap_or_else(|_| url.clone())
}

/// Retrieve one source, bounded by `limit` even if the transport ignores it.
pub async fn fetch_source(
    transport: &dyn Transport,
    source: &ConfiguredSource,
    limit: Duration,
) -> Result<Vec<u8>, FetchFailure> {
    debug!(source = %source.id, url = %source.url, "Fetching feed");
    let result = match timeout(limit, transport.fetch(&source.url, limit)).await {
        Ok(result) => result,
        Err(_) => Err(FetchFailure::Timeout(limit.as_secs())),
    };
    if let Err(failure) = &result {
        warn!(source = %source.id, error = %failure, "Feed fetch failed");
    }
    result
}

/// Retrieve every source concurrently. Results keep the order of `sources`.
pub async fn fetch_all(
    transport: &dyn Transport,
    sources: &[ConfiguredSource],
    limit: Duration,
) -> Vec<(SourceId, Result<Vec<u8>, FetchFailure>)> {
    let fetches = sources.iter().map(|source| async move {
        let result = fetch_source(transport, source, limit).await;
        (source.id.clone(), result)
    });
    join_all(fetches).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(id: &str, url: &str) -> ConfiguredSource {
        ConfiguredSource {
            id: id.into(),
            profile_id: "alice".into(),
            profile_color: "#4CAF50".into(),
            url: url.parse().unwrap(),
            priority: 0,
            position: 0,
            kind: None,
        }
    }

    #[test]
    fn test_webcal_is_rewritten_to_https() {
        let url: Url = "webcal://calendar.example.com/feeds/holidays.ics?x=1".parse().unwrap();
        assert_eq!(
            normalize_feed_url(&url).as_str(),
            "https://calendar.example.com/feeds/holidays.ics?x=1"
        );
        let plain: Url = "http://example.com/a.ics".parse().unwrap();
        assert_eq!(normalize_feed_url(&plain), plain);
    }

    #[tokio::test]
    async fn test_http_transport_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alice.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(DEFAULT_USER_AGENT).unwrap();
        let url: Url = format!("{}/alice.ics", server.uri()).parse().unwrap();
        let body = transport.fetch(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(body, b"BEGIN:VCALENDAR");
    }

    #[tokio::test]
    async fn test_http_status_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::default();
        let url: Url = format!("{}/missing.ics", server.uri()).parse().unwrap();
        let err = transport.fetch(&url, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchFailure::HttpError(404));
    }

    #[tokio::test]
    async fn test_slow_source_times_out_without_blocking_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.ics"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("BEGIN:VCALENDAR")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR"))
            .mount(&server)
            .await;

        let sources = vec![
            source("slow", &format!("{}/slow.ics", server.uri())),
            source("fast", &format!("{}/fast.ics", server.uri())),
        ];
        let transport = HttpTransport::default();
        let started = std::time::Instant::now();
        let results = fetch_all(&transport, &sources, Duration::from_millis(300)).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(results[0].0.0, "slow");
        assert!(matches!(results[0].1, Err(FetchFailure::Timeout(_))));
        assert!(results[1].1.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_has_no_retries() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(503)
            })
            .mount(&server)
            .await;

        let transport = HttpTransport::default();
        let src = source("flaky", &format!("{}/flaky.ics", server.uri()));
        let result = fetch_source(&transport, &src, Duration::from_secs(5)).await;

        assert_eq!(result.unwrap_err(), FetchFailure::HttpError(503));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let transport = HttpTransport::default();
        let url: Url = "http://127.0.0.1:9/nothing.ics".parse().unwrap();
        let err = transport.fetch(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Unreachable(_)));
    }
}
