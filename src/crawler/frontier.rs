//! Frontier coordinator: the only owner of the queue and visited set.
//!
//! Workers talk to it through [`FrontierHandle`]; because a single task
//! dequeues, every endpoint is handed out at most once.

use crate::crawler::scope;
use crate::http::FetchResponse;
use crate::models::{Endpoint, EndpointState, HttpMethod};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use url::Url;

/// Work item handed to a worker
#[derive(Debug)]
pub struct Dispatch {
    pub endpoint: Endpoint,
    /// Response already fetched for this endpoint (the pre-flight root fetch)
    pub prefetched: Option<FetchResponse>,
}

/// Answer to a form claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormClaim {
    /// First time this form is seen; analyze it
    Fresh,
    /// Already analyzed during this scan
    Duplicate,
    /// Its action previously failed at the transport level
    Unreachable,
}

#[derive(Debug)]
enum Command {
    Next {
        reply: oneshot::Sender<Option<Dispatch>>,
    },
    Discovered {
        links: Vec<String>,
        depth: u32,
        source: String,
    },
    Finished {
        key: (String, HttpMethod),
        state: EndpointState,
    },
    ClaimForm {
        key: String,
        action: String,
        reply: oneshot::Sender<FormClaim>,
    },
    MarkUnreachable {
        url: String,
    },
}

/// Scope and limits the coordinator enforces on discovered links
#[derive(Debug, Clone)]
pub struct FrontierRules {
    pub root: Url,
    pub excluded: Vec<Url>,
    pub crawl: bool,
    pub max_depth: u32,
    pub max_pages: usize,
}

/// What the coordinator knows once every worker has left
#[derive(Debug, Default)]
pub struct FrontierReport {
    /// Endpoints in the order they were handed out, with their final state
    pub visited: Vec<Endpoint>,
    pub unreachable: Vec<String>,
    pub aborted: bool,
}

/// Cloneable worker-side handle
#[derive(Clone)]
pub struct FrontierHandle {
    tx: mpsc::Sender<Command>,
}

impl FrontierHandle {
    /// Next endpoint to process, or `None` when the crawl is over
    pub async fn next(&self) -> Option<Dispatch> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Next { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn discovered(&self, links: Vec<String>, depth: u32, source: String) {
        let _ = self
            .tx
            .send(Command::Discovered {
                links,
                depth,
                source,
            })
            .await;
    }

    pub async fn finished(&self, endpoint: &Endpoint, state: EndpointState) {
        let _ = self
            .tx
            .send(Command::Finished {
                key: endpoint.key(),
                state,
            })
            .await;
    }

    pub async fn claim_form(&self, key: String, action: String) -> FormClaim {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::ClaimForm { key, action, reply })
            .await
            .is_err()
        {
            return FormClaim::Duplicate;
        }
        rx.await.unwrap_or(FormClaim::Duplicate)
    }

    pub async fn mark_unreachable(&self, url: String) {
        let _ = self.tx.send(Command::MarkUnreachable { url }).await;
    }
}

/// Frontier state, owned by the coordinator task
pub struct Frontier {
    rules: FrontierRules,
    queue: VecDeque<Dispatch>,
    endpoints: HashMap<(String, HttpMethod), Endpoint>,
    order: Vec<(String, HttpMethod)>,
    form_keys: HashSet<String>,
    unreachable: HashSet<String>,
    waiting: Vec<oneshot::Sender<Option<Dispatch>>>,
    in_flight: usize,
    abort: watch::Receiver<bool>,
    aborted: bool,
}

impl Frontier {
    /// Seeds the frontier with the root endpoint
    pub fn new(
        rules: FrontierRules,
        root_response: Option<FetchResponse>,
        abort: watch::Receiver<bool>,
    ) -> Self {
        let root = Endpoint::new(normalize_url(rules.root.as_str()), HttpMethod::Get, 0, None);
        let mut frontier = Self {
            rules,
            queue: VecDeque::new(),
            endpoints: HashMap::new(),
            order: Vec::new(),
            form_keys: HashSet::new(),
            unreachable: HashSet::new(),
            waiting: Vec::new(),
            in_flight: 0,
            abort,
            aborted: false,
        };
        frontier.endpoints.insert(root.key(), root.clone());
        frontier.queue.push_back(Dispatch {
            endpoint: root,
            prefetched: root_response,
        });
        frontier
    }

    /// Spawns the coordinator; returns the worker handle and the final report
    pub fn spawn(self) -> (FrontierHandle, tokio::task::JoinHandle<FrontierReport>) {
        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(self.run(rx));
        (FrontierHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) -> FrontierReport {
        let mut abort = self.abort.clone();
        let mut watching = true;
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                changed = abort.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                }
            }
            self.dispatch();
        }
        self.into_report()
    }

    fn is_aborted(&mut self) -> bool {
        if !self.aborted && *self.abort.borrow() {
            debug!("Frontier received abort");
            self.aborted = true;
        }
        self.aborted
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Next { reply } => self.waiting.push(reply),
            Command::Discovered {
                links,
                depth,
                source,
            } => self.enqueue_links(links, depth, source),
            Command::Finished { key, state } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if let Some(endpoint) = self.endpoints.get_mut(&key) {
                    endpoint.state = state;
                }
                if state == EndpointState::Unreachable {
                    self.unreachable.insert(key.0);
                }
            }
            Command::ClaimForm { key, action, reply } => {
                let claim = if self.unreachable.contains(&normalize_url(&action)) {
                    FormClaim::Unreachable
                } else if self.form_keys.insert(key) {
                    FormClaim::Fresh
                } else {
                    FormClaim::Duplicate
                };
                let _ = reply.send(claim);
            }
            Command::MarkUnreachable { url } => {
                self.unreachable.insert(normalize_url(&url));
            }
        }
    }

    fn enqueue_links(&mut self, links: Vec<String>, depth: u32, source: String) {
        if !self.rules.crawl || self.is_aborted() {
            return;
        }
        let next_depth = depth + 1;
        if next_depth > self.rules.max_depth {
            return;
        }

        for link in links {
            if self.endpoints.len() >= self.rules.max_pages {
                debug!("Frontier reached max page limit ({})", self.rules.max_pages);
                break;
            }
            if !scope::in_scope(&link, &self.rules.root, &self.rules.excluded) {
                continue;
            }
            let endpoint = Endpoint::new(
                normalize_url(&link),
                HttpMethod::Get,
                next_depth,
                Some(source.clone()),
            );
            if self.endpoints.contains_key(&endpoint.key()) {
                continue;
            }
            self.endpoints.insert(endpoint.key(), endpoint.clone());
            self.queue.push_back(Dispatch {
                endpoint,
                prefetched: None,
            });
        }
    }

    /// Hands queued work to idle workers and releases them once finished
    fn dispatch(&mut self) {
        while !self.waiting.is_empty() {
            if self.is_aborted() {
                for reply in self.waiting.drain(..) {
                    let _ = reply.send(None);
                }
                return;
            }

            match self.queue.pop_front() {
                Some(dispatch) => {
                    let reply = self.waiting.remove(0);
                    self.order.push(dispatch.endpoint.key());
                    self.in_flight += 1;
                    if let Err(returned) = reply.send(Some(dispatch)) {
                        // Worker vanished; put the work back.
                        self.in_flight -= 1;
                        self.order.pop();
                        if let Some(dispatch) = returned {
                            self.queue.push_front(dispatch);
                        }
                    }
                }
                None if self.in_flight == 0 => {
                    for reply in self.waiting.drain(..) {
                        let _ = reply.send(None);
                    }
                }
                None => return,
            }
        }
    }

    fn into_report(self) -> FrontierReport {
        let aborted = self.aborted;
        let Frontier {
            endpoints,
            order,
            unreachable,
            ..
        } = self;
        let visited = order
            .iter()
            .filter_map(|key| endpoints.get(key).cloned())
            .collect();
        let mut unreachable: Vec<String> = unreachable.into_iter().collect();
        unreachable.sort();
        FrontierReport {
            visited,
            unreachable,
            aborted,
        }
    }
}

/// Normalizes a URL for deduplication (strips trailing slash, fragment)
pub fn normalize_url(url: &str) -> String {
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.set_fragment(None);
        let mut result = parsed.to_string();
        if result.ends_with('/') && parsed.path() != "/" {
            result.pop();
        }
        result
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(crawl: bool) -> FrontierRules {
        FrontierRules {
            root: Url::parse("https://example.com/").expect("valid url"),
            excluded: vec![Url::parse("https://example.com/logout").expect("valid url")],
            crawl,
            max_depth: 2,
            max_pages: 10,
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/path/"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com/path#section"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com/path?a=1"),
            "https://example.com/path?a=1"
        );
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
    }

    fn frontier(crawl: bool) -> (watch::Sender<bool>, Frontier) {
        let (tx, rx) = watch::channel(false);
        (tx, Frontier::new(rules(crawl), None, rx))
    }

    #[test]
    fn test_enqueue_filters_scope_and_duplicates() {
        let (_abort, mut frontier) = frontier(true);
        frontier.enqueue_links(
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/a/".to_string(),
                "https://example.com/logout?x=1".to_string(),
                "https://other.org/".to_string(),
                "https://example.com/".to_string(),
            ],
            0,
            "https://example.com/".to_string(),
        );
        let queued: Vec<&str> = frontier.queue.iter().map(|d| d.endpoint.url.as_str()).collect();
        assert_eq!(queued, vec!["https://example.com/", "https://example.com/a"]);
    }

    #[test]
    fn test_enqueue_respects_depth_and_crawl_flag() {
        let (_abort, mut deep) = frontier(true);
        deep.enqueue_links(vec!["https://example.com/deep".to_string()], 2, String::new());
        assert_eq!(deep.queue.len(), 1);

        let (_abort, mut single) = frontier(false);
        single.enqueue_links(vec!["https://example.com/a".to_string()], 0, String::new());
        assert_eq!(single.queue.len(), 1);
    }

    #[test]
    fn test_form_claims() {
        let (_abort, mut frontier) = frontier(true);
        let mut claim = |key: &str, action: &str| {
            let (reply, mut rx) = oneshot::channel();
            frontier.handle(Command::ClaimForm {
                key: key.to_string(),
                action: action.to_string(),
                reply,
            });
            rx.try_recv().expect("claim answered")
        };
        assert_eq!(claim("k1", "https://example.com/a"), FormClaim::Fresh);
        assert_eq!(claim("k1", "https://example.com/a"), FormClaim::Duplicate);

        frontier.handle(Command::MarkUnreachable {
            url: "https://example.com/dead/".to_string(),
        });
        let (reply, mut rx) = oneshot::channel();
        frontier.handle(Command::ClaimForm {
            key: "k2".to_string(),
            action: "https://example.com/dead".to_string(),
            reply,
        });
        assert_eq!(rx.try_recv().expect("claim answered"), FormClaim::Unreachable);
    }

    #[tokio::test]
    async fn test_dispatch_drains_then_releases_workers() {
        let (_abort, frontier) = frontier(false);
        let (handle, task) = frontier.spawn();

        let first = handle.next().await.expect("root dispatched");
        assert_eq!(first.endpoint.url, "https://example.com/");
        handle.finished(&first.endpoint, EndpointState::Visited).await;

        assert!(handle.next().await.is_none());
        drop(handle);

        let report = task.await.expect("coordinator joined");
        assert_eq!(report.visited.len(), 1);
        assert_eq!(report.visited[0].state, EndpointState::Visited);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn test_abort_stops_dispatch() {
        let (abort_tx, frontier) = frontier(true);
        let (handle, task) = frontier.spawn();

        let first = handle.next().await.expect("root dispatched");
        handle
            .discovered(vec!["https://example.com/a".to_string()], 0, first.endpoint.url.clone())
            .await;
        abort_tx.send(true).expect("abort sent");
        handle.finished(&first.endpoint, EndpointState::Visited).await;

        assert!(handle.next().await.is_none());
        drop(handle);
        let report = task.await.expect("coordinator joined");
        assert!(report.aborted);
        assert_eq!(report.visited.len(), 1);
    }
}
