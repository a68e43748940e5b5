//! On-disk output: JSON report and PoC documents

pub mod json;
pub mod poc;

use std::path::PathBuf;
use url::{Host, Url};

/// Base directory for all scan output
pub const OUTPUT_ROOT: &str = "xsrfscan-output";

/// `xsrfscan-output/<registrable domain or host>/` for a target URL
pub fn default_output_dir(target: &str) -> PathBuf {
    let label = Url::parse(target)
        .ok()
        .and_then(|u| match u.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.to_ascii_lowercase();
                Some(
                    psl::domain_str(&domain)
                        .map(str::to_string)
                        .unwrap_or(domain),
                )
            }
            Some(host) => Some(host.to_string().replace([':', '[', ']'], "_")),
            None => None,
        })
        .unwrap_or_else(|| "unknown-target".to_string());
    PathBuf::from(OUTPUT_ROOT).join(label)
}
