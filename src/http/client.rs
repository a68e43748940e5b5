//! reqwest-backed [`Fetcher`] with retries and request tracking

use crate::error::{NetworkError, Result, XsrfError};
use crate::http::fetcher::{FetchRequest, FetchResponse, Fetcher, SetCookie};
use crate::models::{HttpMethod, ScanConfig};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
];

/// HTTP client wrapper with a per-session cookie store and request counting
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: Arc<ScanConfig>,
    request_count: Arc<AtomicU64>,
    base_headers: Vec<(String, String)>,
}

impl HttpClient {
    /// Creates a new HttpClient from scan configuration
    pub fn from_config(config: Arc<ScanConfig>) -> Result<Self> {
        let client = build_client(&config)?;

        let mut base_headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let cookies = config.cookie_pairs();
        if !cookies.is_empty() {
            let jar = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            base_headers.push(("Cookie".to_string(), jar));
        }

        Ok(Self {
            client,
            config,
            request_count: Arc::new(AtomicU64::new(0)),
            base_headers,
        })
    }

    fn user_agent(&self) -> Option<&'static str> {
        if !self.config.random_agent {
            return None;
        }
        USER_AGENTS.choose(&mut rand::rng()).copied()
    }

    fn build_request(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut req = self.client.request(method, &request.url);
        for (key, value) in self.base_headers.iter().chain(request.headers.iter()) {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(ua) = self.user_agent() {
            req = req.header(reqwest::header::USER_AGENT, ua);
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }
        if let Some(ref body) = request.body {
            req = req.body(body.clone());
        }
        req
    }

    /// Executes a request with one retry on transport failure or 429
    async fn request_with_retry(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<reqwest::Response, NetworkError> {
        const MAX_ATTEMPTS: u32 = 2;
        const INITIAL_BACKOFF_MS: u64 = 500;

        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                debug!("Retry attempt {attempt} for {}, waiting {backoff:?}", request.url);
                sleep(backoff).await;
            }

            self.request_count.fetch_add(1, Ordering::Relaxed);

            match self.build_request(request).send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!("Response: {status} for {} {}", request.method, response.url());

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!("Rate limited by server, backing off");
                        last_error = Some(NetworkError::RateLimited {
                            url: request.url.clone(),
                        });
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    warn!("Request to {} failed (attempt {attempt}): {e}", request.url);
                    last_error = Some(NetworkError::from_reqwest(&request.url, &e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NetworkError::Connection {
            url: request.url.clone(),
            message: "retries exhausted".to_string(),
        }))
    }
}

fn build_client(config: &ScanConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(&config.user_agent)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        })
        .cookie_store(true)
        .danger_accept_invalid_certs(!config.verify_tls);

    if let Some(ref proxy_url) = config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| XsrfError::ConfigError(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, NetworkError> {
        let response = self.request_with_retry(&request).await?;

        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let cookies = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(SetCookie::parse)
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| NetworkError::from_reqwest(&url, &e))?;

        Ok(FetchResponse {
            url,
            status,
            headers,
            cookies,
            body,
        })
    }

    fn new_session(&self) -> std::result::Result<Arc<dyn Fetcher>, NetworkError> {
        let client = build_client(&self.config).map_err(|e| NetworkError::Connection {
            url: self.config.target.clone(),
            message: e.to_string(),
        })?;
        Ok(Arc::new(Self {
            client,
            config: Arc::clone(&self.config),
            request_count: Arc::clone(&self.request_count),
            base_headers: self.base_headers.clone(),
        }))
    }

    fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}
