// src/utils/http.rs

//! HTTP client utilities and the upstream session.
//!
//! The upstream only answers JSON requests that carry the cookies of a
//! visited match-centre page. [`Session`] owns that cookie jar: it "opens"
//! the referrer page once, re-opens it when the upstream starts refusing
//! requests, and retries everything else with backoff.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Client, Response};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, FetchError, Result, head_of};
use crate::models::{Config, SessionConfig, UpstreamConfig};
use crate::utils::retry::{RetryPolicy, retry};

const JSON_ACCEPT: &str = "application/json, text/plain;q=0.8, */*;q=0.5";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,*/*;q=0.8";

/// Create a configured asynchronous HTTP client with a cookie store.
pub fn create_client(config: &SessionConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_millis(config.timeout_ms))
        .cookie_store(true)
        .build()?;
    Ok(client)
}

/// Create a client without cookies, for stateless APIs and the auth fallback.
pub fn create_plain_client(config: &SessionConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()?;
    Ok(client)
}

/// Pick the first referrer candidate on the expected host.
pub fn pick_referrer(candidates: &[String], host: &str, default: &str) -> String {
    candidates
        .iter()
        .filter_map(|c| Url::parse(c).ok())
        .find(|u| {
            u.host_str()
                .is_some_and(|h| h.to_ascii_lowercase().ends_with(&host.to_ascii_lowercase()))
        })
        .map(|u| u.to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Decode a response body as JSON, guarding against HTML error pages.
pub fn parse_json_body(
    url: &str,
    content_type: &str,
    body: &str,
) -> std::result::Result<Value, FetchError> {
    let declared_json = content_type.to_ascii_lowercase().contains("application/json");
    if !declared_json {
        let first = body.trim_start().chars().next();
        if !matches!(first, Some('{' | '[')) {
            return Err(FetchError::NonJson {
                url: url.to_string(),
                head: head_of(body),
            });
        }
    }
    serde_json::from_str(body).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        message: e.to_string(),
        head: head_of(body),
    })
}

/// Authenticated upstream session.
///
/// JSON fetches take `&mut self`: a session is never shared by two requests
/// in flight.
pub struct Session {
    client: Client,
    fallback: Option<Client>,
    referrer: String,
    headers: HeaderMap,
    policy: RetryPolicy,
}

impl Session {
    /// Build a session from the configuration. No request is made yet.
    pub fn new(config: &Config) -> Result<Self> {
        let client = create_client(&config.session)?;
        let fallback = if config.session.fallback_on_auth {
            Some(create_plain_client(&config.session)?)
        } else {
            None
        };
        let referrer = referrer_for(&config.upstream);
        let headers = json_headers(&config.upstream, &referrer)?;

        Ok(Self {
            client,
            fallback,
            referrer,
            headers,
            policy: RetryPolicy::from(&config.retry),
        })
    }

    /// The page that establishes the session.
    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    /// Open the referrer page so the cookie jar gets populated.
    pub async fn warm_up(&self) -> std::result::Result<(), FetchError> {
        log::info!("Opening referrer page {}", self.referrer);
        let response = self
            .client
            .get(&self.referrer)
            .header(ACCEPT, HTML_ACCEPT)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: self.referrer.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.referrer.clone(),
                head: head_of(&body),
            });
        }
        Ok(())
    }

    /// Re-open the referrer page; failures are only logged.
    pub async fn refresh(&self) {
        log::info!("Refreshing session via {}", self.referrer);
        if let Err(e) = self.warm_up().await {
            log::warn!("Session refresh failed: {}", e);
        }
    }

    /// Fetch a JSON document with retries and session refresh.
    pub async fn fetch_json(
        &mut self,
        url: &str,
        label: &str,
    ) -> std::result::Result<Value, FetchError> {
        let this = &*self;
        let label = format!("{label} {url}");
        retry(
            &this.policy,
            &label,
            || this.attempt(url),
            || this.refresh(),
        )
        .await
    }

    /// One attempt, with the cookieless fallback on 401/403.
    async fn attempt(&self, url: &str) -> std::result::Result<Value, FetchError> {
        let result = self.request_json(&self.client, url).await;
        match (result, &self.fallback) {
            (Err(e), Some(plain)) if e.is_auth() => match self.request_json(plain, url).await {
                Ok(value) => {
                    log::info!("Cookieless fallback succeeded for {}", url);
                    Ok(value)
                }
                Err(fallback_err) => {
                    log::debug!("Cookieless fallback failed: {}", fallback_err);
                    Err(e)
                }
            },
            (result, _) => result,
        }
    }

    async fn request_json(
        &self,
        client: &Client,
        url: &str,
    ) -> std::result::Result<Value, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response: Response = client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                head: head_of(&body),
            });
        }
        parse_json_body(url, &content_type, &body)
    }
}

fn referrer_for(upstream: &UpstreamConfig) -> String {
    pick_referrer(
        &upstream.referrer_urls,
        &upstream.referrer_host,
        &upstream.default_referrer,
    )
}

fn json_headers(upstream: &UpstreamConfig, referrer: &str) -> Result<HeaderMap> {
    let invalid = |what: &str| AppError::config(format!("invalid header value for {what}"));

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers.insert(
        REFERER,
        HeaderValue::from_str(referrer).map_err(|_| invalid("referer"))?,
    );

    if let Some(key) = upstream.api_key.as_deref().filter(|k| !k.is_empty()) {
        let name = HeaderName::from_bytes(upstream.api_key_header.as_bytes())
            .map_err(|_| invalid("api_key_header"))?;
        let value = HeaderValue::from_str(key).map_err(|_| invalid("api_key"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::models::RetryConfig;
    use crate::utils::stub_server::{Reply, StubServer};

    /// Serves `/matches/` as the referrer page and `/data` from `script`,
    /// repeating the last status once the script runs out.
    async fn upstream(script: &'static [u16]) -> StubServer {
        let served = Arc::new(AtomicUsize::new(0));
        StubServer::start(move |req| {
            if req.path() == "/matches/" {
                return Reply::html(200, "<html>match centre</html>");
            }
            let n = served.fetch_add(1, Ordering::SeqCst);
            match script[n.min(script.len() - 1)] {
                200 => Reply::json(200, json!([{"matchId": 1}])),
                403 => Reply::html(403, "<html>Forbidden</html>"),
                status => Reply::json(status, json!({"error": "busy"})),
            }
        })
        .await
    }

    fn session_for(server: &StubServer, fallback: bool) -> Session {
        let mut config = Config::default();
        config.upstream.referrer_urls = vec![server.url("/matches/")];
        config.upstream.referrer_host = "127.0.0.1".into();
        config.session.fallback_on_auth = fallback;
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            jitter_ms: 0,
        };
        Session::new(&config).unwrap()
    }

    #[test]
    fn test_pick_referrer_prefers_matching_host() {
        let candidates = vec![
            "not a url".to_string(),
            "https://example.com/matches/".to_string(),
            "https://matchcentre.kncb.nl/grades/".to_string(),
        ];
        assert_eq!(
            pick_referrer(&candidates, "matchcentre.kncb.nl", "https://fallback/"),
            "https://matchcentre.kncb.nl/grades/"
        );
        assert_eq!(
            pick_referrer(&[], "matchcentre.kncb.nl", "https://fallback/"),
            "https://fallback/"
        );
    }

    #[test]
    fn test_parse_json_with_json_content_type() {
        let v = parse_json_body("u", "application/json; charset=utf-8", r#"{"a":1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_parse_json_sniffs_untyped_body() {
        let v = parse_json_body("u", "text/plain", "  [1,2]").unwrap();
        assert_eq!(v.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_html_is_rejected_as_non_json() {
        let err = parse_json_body("u", "text/html", "<!doctype html><p>login</p>").unwrap_err();
        assert!(matches!(err, FetchError::NonJson { .. }));
    }

    #[test]
    fn test_broken_json_is_parse_error() {
        let err = parse_json_body("u", "application/json", "{\"a\":").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn test_json_headers_include_api_key() {
        let mut upstream = UpstreamConfig::default();
        upstream.api_key = Some("secret".into());
        let headers = json_headers(&upstream, "https://matchcentre.kncb.nl/matches/").unwrap();
        assert_eq!(headers["x-api-key"], "secret");
        assert_eq!(headers["x-requested-with"], "XMLHttpRequest");
        assert_eq!(headers[REFERER], "https://matchcentre.kncb.nl/matches/");
    }

    #[test]
    fn test_session_builds_from_defaults() {
        let session = Session::new(&Config::default()).unwrap();
        assert_eq!(session.referrer(), "https://matchcentre.kncb.nl/matches/");
    }

    #[tokio::test]
    async fn test_forbidden_falls_back_to_cookieless_request() {
        let server = upstream(&[403, 200]).await;
        let mut session = session_for(&server, true);

        let value = session.fetch_json(&server.url("/data"), "grades").await.unwrap();
        assert_eq!(value, json!([{"matchId": 1}]));
        // Both requests belong to one attempt: no refresh in between.
        assert_eq!(server.calls(), vec!["GET /data", "GET /data"]);
    }

    #[tokio::test]
    async fn test_forbidden_refreshes_session_before_retry() {
        let server = upstream(&[403, 200]).await;
        let mut session = session_for(&server, false);

        let value = session.fetch_json(&server.url("/data"), "grades").await.unwrap();
        assert_eq!(value, json!([{"matchId": 1}]));
        assert_eq!(
            server.calls(),
            vec!["GET /data", "GET /matches/", "GET /data"]
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = upstream(&[500, 500, 200]).await;
        let mut session = session_for(&server, true);

        let value = session.fetch_json(&server.url("/data"), "grades").await.unwrap();
        assert_eq!(value, json!([{"matchId": 1}]));
        assert_eq!(server.calls(), vec!["GET /data"; 3]);

        let first = &server.requests()[0];
        assert_eq!(first.header("x-requested-with"), Some("XMLHttpRequest"));
        assert_eq!(first.header("referer"), Some(session.referrer()));
    }

    #[tokio::test]
    async fn test_retry_budget_is_respected() {
        let server = upstream(&[503]).await;
        let mut session = session_for(&server, true);

        let err = session
            .fetch_json(&server.url("/data"), "grades")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_html_page_is_not_retried() {
        let server = StubServer::start(|_| Reply::html(200, "<html>login</html>")).await;
        let mut session = session_for(&server, true);

        let err = session
            .fetch_json(&server.url("/data"), "grades")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NonJson { .. }));
        assert_eq!(server.requests().len(), 1);
    }
}
