//! Scan engine: pre-flight, crawl, classification and PoC assembly

pub mod poc;
pub mod predictability;
pub mod token;
pub mod verdict;

use crate::config;
use crate::crawler::Crawler;
use crate::error::{Result, XsrfError};
use crate::http::{FetchRequest, FetchResponse, Fetcher, HttpClient};
use crate::models::{EndpointState, ScanConfig, ScanReport};
use poc::PocGenerator;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

/// Cloneable handle that stops a running scan
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Stops dispatching new endpoints; in-flight endpoints finish
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Runs one bounded scan job against a single target scope
pub struct ScanEngine {
    config: Arc<ScanConfig>,
    abort: Arc<watch::Sender<bool>>,
}

impl ScanEngine {
    /// Validates the configuration; nothing is fetched yet
    pub fn new(config: ScanConfig) -> Result<Self> {
        config::validate(&config)?;
        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            abort: Arc::new(tx),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort),
        }
    }

    /// Scans through the reqwest-backed client
    pub async fn run(&self) -> Result<ScanReport> {
        let client = HttpClient::from_config(Arc::clone(&self.config))?;
        self.run_with_fetcher(Arc::new(client)).await
    }

    /// Scans through any [`Fetcher`]
    pub async fn run_with_fetcher(&self, fetcher: Arc<dyn Fetcher>) -> Result<ScanReport> {
        let config = Arc::clone(&self.config);
        let mut report = ScanReport::new(&config.target);
        let root = Url::parse(&config.target)?;

        info!("Starting scan of {root}");
        let root_response = fetcher
            .fetch(FetchRequest::get(root.as_str()))
            .await
            .and_then(FetchResponse::error_for_status)
            .map_err(|e| XsrfError::TargetUnreachable(e.to_string()))?;

        let crawler = Crawler::new(
            Arc::clone(&fetcher),
            Arc::clone(&config),
            self.abort.subscribe(),
        );
        let output = crawler.run(root, Some(root_response)).await?;

        let mut findings = output.findings;
        findings.sort_by(|a, b| a.severity.cmp(&b.severity));
        for finding in &findings {
            report.summary.record(finding.verdict);
        }

        if config.poc {
            let generator = PocGenerator::new(&config, output.cookie_values)?;
            for finding in &findings {
                match generator.generate(finding) {
                    Ok(Some(poc)) => report.pocs.push(poc),
                    Ok(None) => {}
                    Err(e) => warn!("PoC generation failed for {}: {e}", finding.form.action),
                }
            }
        }

        let frontier = output.frontier;
        report.summary.pages_visited = frontier
            .visited
            .iter()
            .filter(|e| e.state == EndpointState::Visited)
            .count();
        report.summary.unreachable = frontier.unreachable.len();
        report.summary.total_requests = fetcher.request_count();
        report.aborted = frontier.aborted || *self.abort.borrow();
        report.visited = frontier.visited;
        report.findings = findings;
        report.finish();

        info!(
            "Scan complete: {} forms, {} vulnerable, {} PoCs",
            report.summary.forms_analyzed,
            report.vulnerable().count(),
            report.pocs.len()
        );
        Ok(report)
    }
}
