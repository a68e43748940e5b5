//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xsrfscan::error::NetworkError;
use xsrfscan::http::{FetchRequest, FetchResponse, Fetcher};
use xsrfscan::models::{HttpMethod, ScanConfig};

/// Creates a test ScanConfig pointing to a wiremock server
pub fn test_config(target: &str) -> ScanConfig {
    ScanConfig {
        target: target.to_string(),
        threads: 2,
        timeout_secs: 10,
        user_agent: "xsrfscan-test/0.1.0".to_string(),
        ..ScanConfig::default()
    }
}

/// Wraps a body in a minimal HTML page
pub fn page(body: &str) -> String {
    format!("<!DOCTYPE html><html><head><title>t</title></head><body>{body}</body></html>")
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, String>,
    /// POST targets that fail at the transport level
    dead_actions: Vec<String>,
    gets: HashMap<String, usize>,
    posts: HashMap<String, usize>,
}

/// In-memory site: GET serves registered pages, POST answers 200 "ok"
#[derive(Clone, Default)]
pub struct MemorySite {
    state: Arc<Mutex<SiteState>>,
    latency: Duration,
}

impl MemorySite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn add_page(&self, url: &str, html: String) {
        self.state
            .lock()
            .expect("site lock")
            .pages
            .insert(url.to_string(), html);
    }

    pub fn kill_action(&self, url: &str) {
        self.state
            .lock()
            .expect("site lock")
            .dead_actions
            .push(url.to_string());
    }

    pub fn get_counts(&self) -> HashMap<String, usize> {
        self.state.lock().expect("site lock").gets.clone()
    }

    pub fn post_count(&self, url: &str) -> usize {
        self.state
            .lock()
            .expect("site lock")
            .posts
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MemorySite {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (status, body) = {
            let mut state = self.state.lock().expect("site lock");
            match request.method {
                HttpMethod::Get => {
                    *state.gets.entry(request.url.clone()).or_insert(0) += 1;
                    match state.pages.get(&request.url) {
                        Some(html) => (200, html.clone()),
                        None => (404, "not found".to_string()),
                    }
                }
                _ => {
                    *state.posts.entry(request.url.clone()).or_insert(0) += 1;
                    if state.dead_actions.contains(&request.url) {
                        return Err(NetworkError::Connection {
                            url: request.url,
                            message: "connection reset".to_string(),
                        });
                    }
                    (200, "ok".to_string())
                }
            }
        };

        Ok(FetchResponse {
            url: request.url,
            status,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            cookies: Vec::new(),
            body,
        })
    }

    fn new_session(&self) -> Result<Arc<dyn Fetcher>, NetworkError> {
        Ok(Arc::new(self.clone()))
    }
}
