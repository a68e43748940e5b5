//! Configuration management for xsrfscan

use crate::error::{Result, XsrfError};
use crate::models::{ProbeKind, ScanConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// File-based configuration; every section and key is optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    scan: Option<ScanSection>,
    crawl: Option<CrawlSection>,
    analysis: Option<AnalysisSection>,
    poc: Option<PocSection>,
}

#[derive(Debug, Deserialize)]
struct ScanSection {
    target: Option<String>,
    threads: Option<usize>,
    timeout_secs: Option<u64>,
    delay_ms: Option<u64>,
    user_agent: Option<String>,
    random_agent: Option<bool>,
    follow_redirects: Option<bool>,
    verify_tls: Option<bool>,
    proxy: Option<String>,
    cookies: Option<Vec<String>>,
    headers: Option<HashMap<String, String>>,
    display_headers: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CrawlSection {
    enabled: Option<bool>,
    max_depth: Option<u32>,
    max_pages: Option<usize>,
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AnalysisSection {
    enabled: Option<bool>,
    sample_count: Option<usize>,
    min_entropy_bits: Option<f64>,
    token_names: Option<Vec<String>>,
    rejection_markers: Option<Vec<String>>,
    bypass_probes: Option<Vec<ProbeKind>>,
}

#[derive(Debug, Deserialize)]
struct PocSection {
    enabled: Option<bool>,
    auto_submit: Option<bool>,
    malicious: Option<bool>,
    payloads: Option<HashMap<String, String>>,
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses TOML configuration text over the defaults
pub fn parse_config(content: &str) -> Result<ScanConfig> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut config = ScanConfig::default();

    if let Some(scan) = file_config.scan {
        if let Some(target) = scan.target {
            config.target = normalize_target(&target);
        }
        if let Some(threads) = scan.threads {
            config.threads = threads;
        }
        if let Some(timeout) = scan.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(delay) = scan.delay_ms {
            config.delay_ms = delay;
        }
        if let Some(ua) = scan.user_agent {
            config.user_agent = ua;
        }
        if let Some(random) = scan.random_agent {
            config.random_agent = random;
        }
        if let Some(follow) = scan.follow_redirects {
            config.follow_redirects = follow;
        }
        if let Some(verify) = scan.verify_tls {
            config.verify_tls = verify;
        }
        if scan.proxy.is_some() {
            config.proxy = scan.proxy;
        }
        if let Some(cookies) = scan.cookies {
            config.cookies = cookies;
        }
        if let Some(headers) = scan.headers {
            config.headers.extend(headers);
        }
        if let Some(display) = scan.display_headers {
            config.display_headers = display;
        }
    }

    if let Some(crawl) = file_config.crawl {
        if let Some(enabled) = crawl.enabled {
            config.crawl = enabled;
        }
        if let Some(depth) = crawl.max_depth {
            config.max_depth = depth;
        }
        if let Some(pages) = crawl.max_pages {
            config.max_pages = pages;
        }
        if let Some(exclude) = crawl.exclude {
            config.exclude_paths = exclude;
        }
    }

    if let Some(analysis) = file_config.analysis {
        if let Some(enabled) = analysis.enabled {
            config.analysis = enabled;
        }
        if let Some(count) = analysis.sample_count {
            config.sample_count = count;
        }
        if let Some(bits) = analysis.min_entropy_bits {
            config.min_entropy_bits = bits;
        }
        if let Some(names) = analysis.token_names {
            config.token_names = names;
        }
        if let Some(markers) = analysis.rejection_markers {
            config.rejection_markers = markers;
        }
        if let Some(probes) = analysis.bypass_probes {
            config.bypass_probes = probes;
        }
    }

    if let Some(poc) = file_config.poc {
        if let Some(enabled) = poc.enabled {
            config.poc = enabled;
        }
        if let Some(auto) = poc.auto_submit {
            config.poc_auto_submit = auto;
        }
        if let Some(malicious) = poc.malicious {
            config.malicious = malicious;
        }
        if let Some(payloads) = poc.payloads {
            config.malicious_payloads.extend(payloads);
        }
    }

    Ok(config)
}

/// Values supplied on the command line; `None`/`false` leaves the file or default value
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub target: Option<String>,
    /// Comma-separated `name=value` pairs
    pub cookies: Option<String>,
    /// Comma-separated `Name=Value` (or `Name: Value`) pairs
    pub headers: Option<String>,
    pub exclude: Option<String>,
    pub delay_secs: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub threads: Option<usize>,
    pub samples: Option<usize>,
    pub entropy_threshold: Option<f64>,
    pub max_depth: Option<u32>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub crawl: bool,
    pub no_analysis: bool,
    pub malicious: bool,
    pub skip_poc: bool,
    pub no_verify: bool,
    pub random_agent: bool,
    pub display: bool,
}

/// Merges CLI arguments into an existing ScanConfig
pub fn merge_cli_args(config: &mut ScanConfig, cli: CliOverrides) {
    if let Some(target) = cli.target {
        config.target = normalize_target(&target);
    }
    if let Some(cookies) = cli.cookies {
        config.cookies = split_list(&cookies);
    }
    if let Some(headers) = cli.headers {
        for header in split_list(&headers) {
            if let Some((key, value)) = split_header(&header) {
                config.headers.insert(key, value);
            }
        }
    }
    if let Some(exclude) = cli.exclude {
        config.exclude_paths.extend(split_list(&exclude));
    }
    if let Some(delay) = cli.delay_secs {
        config.delay_ms = (delay.max(0.0) * 1000.0).round() as u64;
    }
    if let Some(t) = cli.timeout_secs {
        config.timeout_secs = t;
    }
    if let Some(t) = cli.threads {
        config.threads = t;
    }
    if let Some(n) = cli.samples {
        config.sample_count = n;
    }
    if let Some(bits) = cli.entropy_threshold {
        config.min_entropy_bits = bits;
    }
    if let Some(depth) = cli.max_depth {
        config.max_depth = depth;
    }
    if let Some(ua) = cli.user_agent {
        config.user_agent = ua;
    }
    if let Some(p) = cli.proxy {
        config.proxy = Some(p);
    }

    config.crawl |= cli.crawl;
    config.malicious |= cli.malicious;
    config.random_agent |= cli.random_agent;
    config.display_headers |= cli.display;
    if cli.no_analysis {
        config.analysis = false;
    }
    if cli.skip_poc {
        config.poc = false;
    }
    if cli.no_verify {
        config.verify_tls = false;
    }

    // A session tied to cookies must keep one consistent user agent.
    if !config.cookies.is_empty() {
        config.random_agent = false;
    }
}

/// Rejects configurations no scan can start from
pub fn validate(config: &ScanConfig) -> Result<()> {
    let root = Url::parse(&config.target).map_err(|e| {
        XsrfError::ConfigError(format!("invalid target URL '{}': {e}", config.target))
    })?;
    if !matches!(root.scheme(), "http" | "https") || root.host_str().is_none() {
        return Err(XsrfError::ConfigError(format!(
            "target must be an http(s) URL with a host: {}",
            config.target
        )));
    }
    if config.threads == 0 {
        return Err(XsrfError::ConfigError("threads must be at least 1".to_string()));
    }
    if config.sample_count == 0 {
        return Err(XsrfError::ConfigError("sample count must be at least 1".to_string()));
    }
    if !config.min_entropy_bits.is_finite() || config.min_entropy_bits < 0.0 {
        return Err(XsrfError::ConfigError(format!(
            "entropy threshold must be a non-negative number, got {}",
            config.min_entropy_bits
        )));
    }
    if let Some(ref proxy) = config.proxy {
        Url::parse(proxy)
            .map_err(|e| XsrfError::ConfigError(format!("invalid proxy URL '{proxy}': {e}")))?;
    }
    Ok(())
}

/// Prepends `http://` to targets given without a scheme
pub fn normalize_target(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_header(raw: &str) -> Option<(String, String)> {
    let at = raw.find(['=', ':'])?;
    let (key, value) = (raw[..at].trim(), raw[at + 1..].trim());
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
