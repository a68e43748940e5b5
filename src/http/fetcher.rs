//! Transport abstraction consumed by the crawler and the probes

use crate::error::NetworkError;
use crate::models::{HttpMethod, SameSitePosture};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep_until, Instant};

/// A single outgoing request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Builds a form submission; GET forms carry the fields in the query string
    pub fn form(method: HttpMethod, action: &str, fields: &[(String, String)]) -> Self {
        let encoded = encode_form(fields);
        match method {
            HttpMethod::Get => {
                let url = match url::Url::parse(action) {
                    Ok(mut parsed) => {
                        parsed.set_query(if encoded.is_empty() { None } else { Some(&encoded) });
                        parsed.to_string()
                    }
                    Err(_) => action.to_string(),
                };
                Self::get(url)
            }
            _ => Self {
                method,
                url: action.to_string(),
                headers: vec![(
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                )],
                body: Some(encoded),
                timeout: None,
            },
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// A cookie set by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// Lowercased SameSite attribute, if any
    pub same_site: Option<String>,
}

impl SetCookie {
    /// Parses a raw `Set-Cookie` header value
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let same_site = parts
            .filter_map(|attr| attr.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("samesite"))
            .map(|(_, v)| v.trim().to_ascii_lowercase());

        Some(Self {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            same_site,
        })
    }
}

/// A received response with its body fully read
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<SetCookie>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts non-2xx responses into a [`NetworkError::Status`]
    pub fn error_for_status(self) -> Result<Self, NetworkError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NetworkError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// Whether the body is worth parsing as HTML
    pub fn is_html(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => true,
        }
    }

    /// Session context string built from the cookies this response set
    pub fn session_context(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }

    /// SameSite posture across every cookie this response set
    pub fn same_site_posture(&self) -> SameSitePosture {
        same_site_posture(&self.cookies)
    }
}

/// Weakest SameSite attribute among `cookies`
pub fn same_site_posture<'a>(cookies: impl IntoIterator<Item = &'a SetCookie>) -> SameSitePosture {
    let mut posture = SameSitePosture::NoCookies;
    for cookie in cookies {
        match cookie.same_site.as_deref() {
            Some("strict") if posture == SameSitePosture::NoCookies => {
                posture = SameSitePosture::Strict
            }
            Some("strict") => {}
            Some("lax") => posture = SameSitePosture::Lax,
            _ => return SameSitePosture::Unrestricted,
        }
    }
    posture
}

/// Cookies the target has set on one session, latest value per name
#[derive(Debug, Default)]
pub struct CookieLedger {
    cookies: RwLock<HashMap<String, SetCookie>>,
}

impl CookieLedger {
    /// Empty values are treated as deletions
    pub async fn record(&self, cookies: &[SetCookie]) {
        if cookies.is_empty() {
            return;
        }
        let mut held = self.cookies.write().await;
        for cookie in cookies {
            if cookie.value.is_empty() {
                held.remove(&cookie.name);
            } else {
                held.insert(cookie.name.clone(), cookie.clone());
            }
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.cookies.read().await.is_empty()
    }

    /// Posture of the cookies a browser would attach to the next request
    pub async fn same_site_posture(&self) -> SameSitePosture {
        same_site_posture(self.cookies.read().await.values())
    }
}

/// Records every cookie its session receives in a [`CookieLedger`].
///
/// Sessions forked from it are independent and not recorded.
pub struct SessionTracker {
    inner: Arc<dyn Fetcher>,
    ledger: Arc<CookieLedger>,
}

impl SessionTracker {
    pub fn new(inner: Arc<dyn Fetcher>, ledger: Arc<CookieLedger>) -> Self {
        Self { inner, ledger }
    }
}

#[async_trait]
impl Fetcher for SessionTracker {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        let response = self.inner.fetch(request).await?;
        self.ledger.record(&response.cookies).await;
        Ok(response)
    }

    fn new_session(&self) -> Result<Arc<dyn Fetcher>, NetworkError> {
        self.inner.new_session()
    }

    fn request_count(&self) -> u64 {
        self.inner.request_count()
    }
}

/// HTTP capability used by the scan core
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs one request; non-2xx statuses are returned, not raised
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError>;

    /// A fetcher sharing configuration but with an empty cookie context
    fn new_session(&self) -> Result<Arc<dyn Fetcher>, NetworkError>;

    /// Total requests issued through this transport
    fn request_count(&self) -> u64 {
        0
    }
}

/// Wraps a fetcher and keeps at least `delay` between consecutive requests.
///
/// Sessions forked from a paced fetcher share its clock.
pub struct PacedFetcher {
    inner: Arc<dyn Fetcher>,
    delay: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl PacedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    async fn wait_turn(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut slot = self.next_slot.lock().await;
        if let Some(at) = *slot {
            sleep_until(at).await;
        }
        *slot = Some(Instant::now() + self.delay);
    }
}

#[async_trait]
impl Fetcher for PacedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        self.wait_turn().await;
        self.inner.fetch(request).await
    }

    fn new_session(&self) -> Result<Arc<dyn Fetcher>, NetworkError> {
        Ok(Arc::new(Self {
            inner: self.inner.new_session()?,
            delay: self.delay,
            next_slot: Arc::clone(&self.next_slot),
        }))
    }

    fn request_count(&self) -> u64 {
        self.inner.request_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_cookies(cookies: &[&str]) -> FetchResponse {
        FetchResponse {
            url: "https://example.com/".to_string(),
            status: 200,
            headers: Vec::new(),
            cookies: cookies.iter().filter_map(|c| SetCookie::parse(c)).collect(),
            body: String::new(),
        }
    }

    #[test]
    fn test_parse_set_cookie() {
        let cookie = SetCookie::parse("sid=abc123; Path=/; HttpOnly; SameSite=Lax")
            .expect("valid cookie");
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.same_site.as_deref(), Some("lax"));

        assert!(SetCookie::parse("garbage").is_none());
        assert!(SetCookie::parse("=value").is_none());
    }

    #[test]
    fn test_same_site_posture() {
        assert_eq!(response_with_cookies(&[]).same_site_posture(), SameSitePosture::NoCookies);
        assert_eq!(
            response_with_cookies(&["a=1; SameSite=Strict", "b=2; SameSite=Lax"])
                .same_site_posture(),
            SameSitePosture::Lax
        );
        assert_eq!(
            response_with_cookies(&["a=1; SameSite=Strict", "b=2"]).same_site_posture(),
            SameSitePosture::Unrestricted
        );
        assert_eq!(
            response_with_cookies(&["a=1; SameSite=None; Secure"]).same_site_posture(),
            SameSitePosture::Unrestricted
        );
    }

    fn cookies(raw: &[&str]) -> Vec<SetCookie> {
        raw.iter().filter_map(|c| SetCookie::parse(c)).collect()
    }

    #[tokio::test]
    async fn test_cookie_ledger_keeps_earlier_session_cookies() {
        let ledger = CookieLedger::default();
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.same_site_posture().await, SameSitePosture::NoCookies);

        ledger.record(&cookies(&["sid=abc123; SameSite=Strict"])).await;
        ledger.record(&[]).await;
        assert!(!ledger.is_empty().await);
        assert_eq!(ledger.same_site_posture().await, SameSitePosture::Strict);

        ledger.record(&cookies(&["theme=dark"])).await;
        assert_eq!(ledger.same_site_posture().await, SameSitePosture::Unrestricted);

        ledger.record(&cookies(&["theme=; Max-Age=0"])).await;
        assert_eq!(ledger.same_site_posture().await, SameSitePosture::Strict);
    }

    struct CookieServer;

    #[async_trait]
    impl Fetcher for CookieServer {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
            let mut response = response_with_cookies(&["sid=s1; SameSite=Lax"]);
            response.url = request.url;
            Ok(response)
        }

        fn new_session(&self) -> Result<Arc<dyn Fetcher>, NetworkError> {
            Ok(Arc::new(CookieServer))
        }
    }

    #[tokio::test]
    async fn test_session_tracker_ignores_forked_sessions() {
        let ledger = Arc::new(CookieLedger::default());
        let tracker = SessionTracker::new(Arc::new(CookieServer), Arc::clone(&ledger));

        let forked = tracker.new_session().expect("fork");
        forked
            .fetch(FetchRequest::get("https://example.com/"))
            .await
            .expect("forked fetch");
        assert!(ledger.is_empty().await);

        tracker
            .fetch(FetchRequest::get("https://example.com/"))
            .await
            .expect("tracked fetch");
        assert_eq!(ledger.same_site_posture().await, SameSitePosture::Lax);
    }

    #[test]
    fn test_form_request_get_uses_query() {
        let fields = vec![("q".to_string(), "a b".to_string())];
        let req = FetchRequest::form(HttpMethod::Get, "https://example.com/search?old=1", &fields);
        assert_eq!(req.url, "https://example.com/search?q=a+b");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_form_request_post_uses_body() {
        let fields = vec![
            ("email".to_string(), "a@b.c".to_string()),
            ("csrf".to_string(), "x&y".to_string()),
        ];
        let req = FetchRequest::form(HttpMethod::Post, "https://example.com/update", &fields);
        assert_eq!(req.body.as_deref(), Some("email=a%40b.c&csrf=x%26y"));
        assert_eq!(req.method, HttpMethod::Post);
    }

    #[test]
    fn test_error_for_status() {
        let mut resp = response_with_cookies(&[]);
        resp.status = 404;
        let err = resp.error_for_status().expect_err("404 is an error");
        assert!(matches!(err, NetworkError::Status { status: 404, .. }));
    }

    #[test]
    fn test_session_context_sorted() {
        let resp = response_with_cookies(&["b=2", "a=1"]);
        assert_eq!(resp.session_context().as_deref(), Some("a=1; b=2"));
        assert!(response_with_cookies(&[]).session_context().is_none());
    }
}
