//! Concurrent crawler: a frontier coordinator plus a bounded pool of workers.
//!
//! Each worker fetches the endpoints the coordinator hands out, extracts
//! links and forms, and classifies every form it is first to claim.

pub mod extractor;
pub mod frontier;
pub mod scope;

use crate::error::Result;
use crate::http::{CookieLedger, FetchRequest, FetchResponse, Fetcher, PacedFetcher, SessionTracker};
use crate::models::{EndpointState, Evidence, ScanConfig, Verdict, VulnerabilityFinding};
use crate::scanner::verdict::{self, ClassifyContext, FormAnalysis};
use frontier::{Frontier, FrontierHandle, FrontierReport, FrontierRules, FormClaim};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

/// Everything the workers produced
#[derive(Debug, Default)]
pub struct CrawlOutput {
    pub findings: Vec<VulnerabilityFinding>,
    /// Values of every cookie the target set during the crawl
    pub cookie_values: HashSet<String>,
    pub frontier: FrontierReport,
}

#[derive(Debug, Default)]
struct WorkerOutput {
    findings: Vec<VulnerabilityFinding>,
    cookie_values: HashSet<String>,
}

/// Crawls one target scope with `config.threads` workers
pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    config: Arc<ScanConfig>,
    abort: watch::Receiver<bool>,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        config: Arc<ScanConfig>,
        abort: watch::Receiver<bool>,
    ) -> Self {
        Self {
            fetcher,
            config,
            abort,
        }
    }

    /// Runs until the frontier drains or the scan is aborted.
    ///
    /// `root_response` is handed to the first worker instead of fetching the root again.
    pub async fn run(
        &self,
        root: Url,
        root_response: Option<FetchResponse>,
    ) -> Result<CrawlOutput> {
        let rules = FrontierRules {
            excluded: scope::resolve_excludes(&root, &self.config.exclude_paths),
            root,
            crawl: self.config.crawl,
            max_depth: self.config.max_depth,
            max_pages: self.config.max_pages.max(1),
        };
        // One ledger for the cookie jar every worker shares
        let ledger = Arc::new(CookieLedger::default());
        if let Some(ref response) = root_response {
            ledger.record(&response.cookies).await;
        }
        let tracked: Arc<dyn Fetcher> =
            Arc::new(SessionTracker::new(Arc::clone(&self.fetcher), Arc::clone(&ledger)));

        let (handle, coordinator) =
            Frontier::new(rules, root_response, self.abort.clone()).spawn();

        let concurrency = self.config.threads.max(1);
        let delay = Duration::from_millis(self.config.delay_ms);
        info!("Crawler starting with {concurrency} workers");

        let mut set = JoinSet::new();
        for id in 0..concurrency {
            let paced: Arc<dyn Fetcher> = Arc::new(PacedFetcher::new(Arc::clone(&tracked), delay));
            let worker = Worker {
                id,
                handle: handle.clone(),
                fetcher: paced,
                session: Arc::clone(&ledger),
                config: Arc::clone(&self.config),
                abort: self.abort.clone(),
            };
            set.spawn(worker.run());
        }
        drop(handle);

        let mut output = CrawlOutput::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker) => {
                    output.findings.extend(worker.findings);
                    output.cookie_values.extend(worker.cookie_values);
                }
                Err(e) => error!("Crawler worker panicked: {e}"),
            }
        }

        output.frontier = coordinator.await.unwrap_or_else(|e| {
            error!("Frontier coordinator failed: {e}");
            FrontierReport::default()
        });
        info!(
            "Crawler finished: {} endpoints, {} forms classified",
            output.frontier.visited.len(),
            output.findings.len()
        );
        Ok(output)
    }
}

struct Worker {
    id: usize,
    handle: FrontierHandle,
    fetcher: Arc<dyn Fetcher>,
    /// Cookies set on the shared session so far
    session: Arc<CookieLedger>,
    config: Arc<ScanConfig>,
    abort: watch::Receiver<bool>,
}

impl Worker {
    async fn run(self) -> WorkerOutput {
        let mut output = WorkerOutput::default();

        while let Some(dispatch) = self.handle.next().await {
            let endpoint = dispatch.endpoint;
            debug!("Worker {} visiting {}", self.id, endpoint.url);

            let fetched = match dispatch.prefetched {
                Some(response) => response.error_for_status(),
                None => match self.fetcher.fetch(FetchRequest::get(&endpoint.url)).await {
                    Ok(response) => response.error_for_status(),
                    Err(e) => Err(e),
                },
            };
            let response = match fetched {
                Ok(response) => response,
                Err(e) => {
                    warn!("Endpoint unreachable: {e}");
                    self.handle.finished(&endpoint, EndpointState::Unreachable).await;
                    continue;
                }
            };

            output
                .cookie_values
                .extend(response.cookies.iter().map(|c| c.value.clone()));

            if self.config.display_headers && !self.config.crawl {
                info!("Response headers for {} (HTTP {}):", response.url, response.status);
                for (name, value) in &response.headers {
                    info!("  {name}: {value}");
                }
            }

            if !response.is_html() {
                self.handle.finished(&endpoint, EndpointState::Visited).await;
                continue;
            }

            let page_url = match Url::parse(&response.url).or_else(|_| Url::parse(&endpoint.url)) {
                Ok(u) => u,
                Err(_) => {
                    self.handle.finished(&endpoint, EndpointState::Visited).await;
                    continue;
                }
            };
            let page = extractor::extract(&page_url, &response.body);
            debug!(
                "{}: {} links, {} forms",
                page_url,
                page.links.len(),
                page.forms.len()
            );
            self.handle
                .discovered(page.links, endpoint.depth, endpoint.url.clone())
                .await;

            let ctx = ClassifyContext {
                fetcher: self.fetcher.as_ref(),
                config: &self.config,
                same_site: self.session.same_site_posture().await,
                fresh_sessions: !self.session.is_empty().await
                    || !self.config.cookies.is_empty(),
            };

            for form in page.forms {
                if *self.abort.borrow() {
                    debug!("Scan aborted; skipping remaining forms on {}", page_url);
                    break;
                }

                let analysis = match self.handle.claim_form(form.key(), form.action.clone()).await {
                    FormClaim::Duplicate => continue,
                    FormClaim::Unreachable => {
                        let mut evidence = Evidence::new(ctx.same_site);
                        evidence
                            .notes
                            .push("Form action was unreachable earlier in the scan".to_string());
                        FormAnalysis {
                            verdict: Verdict::Inconclusive,
                            evidence,
                            action_unreachable: false,
                        }
                    }
                    FormClaim::Fresh => verdict::analyze_form(&ctx, &form).await,
                };

                if analysis.action_unreachable {
                    self.handle.mark_unreachable(form.action.clone()).await;
                }
                info!("{} {} -> {}", form.method, form.action, analysis.verdict);
                output.findings.push(analysis.into_finding(form));
            }

            self.handle.finished(&endpoint, EndpointState::Visited).await;
        }

        output
    }
}
