//! xsrfscan - Cross-Site Request Forgery audit scanner CLI

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use xsrfscan::config::{self, CliOverrides};
use xsrfscan::models::{ScanConfig, ScanReport, Severity, Verdict};
use xsrfscan::report;
use xsrfscan::scanner::ScanEngine;

/// xsrfscan - audits web forms for CSRF weaknesses and writes PoC exploits
#[derive(Parser)]
#[command(name = "xsrfscan", version, about, long_about = None)]
struct Cli {
    /// Root URL to audit (http:// is assumed when no scheme is given)
    #[arg(short, long)]
    url: Option<String>,

    /// Cookies to send, comma-separated name=value pairs
    #[arg(short, long)]
    cookie: Option<String>,

    /// Output directory (default: xsrfscan-output/<domain>/)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Delay between requests of one worker, in seconds
    #[arg(short, long)]
    delay: Option<f64>,

    /// Only print warnings and the final summary
    #[arg(short, long)]
    quiet: bool,

    /// Extra headers, comma-separated Name=Value pairs
    #[arg(short = 'H', long)]
    headers: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Paths to exclude from crawling, comma-separated
    #[arg(short = 'E', long)]
    exclude: Option<String>,

    /// Custom user agent
    #[arg(long)]
    user_agent: Option<String>,

    /// Crawl the whole site instead of only the root page
    #[arg(long)]
    crawl: bool,

    /// Skip multi-sample token analysis
    #[arg(long)]
    no_analysis: bool,

    /// Fill PoC fields with configured payloads
    #[arg(long)]
    malicious: bool,

    /// Do not generate PoC documents
    #[arg(long)]
    skip_poc: bool,

    /// Do not verify TLS certificates
    #[arg(long)]
    no_verify: bool,

    /// Rotate user agents (ignored when cookies are supplied)
    #[arg(long)]
    random_agent: bool,

    /// Also write the full report as JSON
    #[arg(long)]
    json: bool,

    /// Print the headers of each fetched page (disabled with --crawl)
    #[arg(long)]
    display: bool,

    /// Plain terminal output without colors
    #[arg(long)]
    no_colors: bool,

    /// Number of concurrent workers
    #[arg(long)]
    threads: Option<usize>,

    /// Token samples collected per form
    #[arg(long)]
    samples: Option<usize>,

    /// Minimum token entropy in bits
    #[arg(long)]
    entropy_threshold: Option<f64>,

    /// Maximum crawl depth
    #[arg(long)]
    max_depth: Option<u32>,

    /// HTTP/HTTPS proxy URL
    #[arg(long)]
    proxy: Option<String>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════╗
    ║  XSRFSCAN                             ║
    ║  Cross-Site Request Forgery audits    ║
    ╚═══════════════════════════════════════╝
    "#;
    println!("{}", banner.cyan());
}

fn colored_severity(severity: Severity) -> String {
    let label = severity.to_string().color(severity.color());
    match severity {
        Severity::Critical => label.bold().to_string(),
        _ => label.to_string(),
    }
}

fn print_summary(report: &ScanReport) {
    println!("\n{}", "  Scan Summary".bold());
    println!("  {}", "─".repeat(35));

    let mut builder = Builder::default();
    builder.push_record(["Verdict", "Forms"]);
    for verdict in Verdict::ALL {
        builder.push_record([verdict.to_string(), report.summary.count(verdict).to_string()]);
    }
    builder.push_record([
        "Total".to_string(),
        report.summary.forms_analyzed.to_string(),
    ]);
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    println!(
        "\n  {} pages visited, {} unreachable, {} requests",
        report.summary.pages_visited.to_string().cyan(),
        report.summary.unreachable.to_string().yellow(),
        report.summary.total_requests.to_string().cyan(),
    );

    let vulnerable: Vec<_> = report.vulnerable().collect();
    if vulnerable.is_empty() {
        println!("\n  {}", "No exploitable CSRF weakness found.".green());
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(["Severity", "Verdict", "Method", "Action"]);
    for finding in vulnerable {
        builder.push_record([
            colored_severity(finding.severity),
            finding.verdict.to_string(),
            finding.form.method.to_string(),
            finding.form.action.clone(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("\n{table}");

    if report.aborted {
        println!("\n  {}", "Scan aborted; results are partial.".yellow().bold());
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {elapsed_precise} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.no_colors {
        colored::control::set_override(false);
    }

    let filter = if cli.verbose {
        "xsrfscan=debug"
    } else if cli.quiet {
        "xsrfscan=warn"
    } else {
        "xsrfscan=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_ansi(!cli.no_colors)
        .with_target(false)
        .init();

    if !cli.quiet {
        print_banner();
    }

    let mut scan_config = match cli.config {
        Some(ref path) => config::load_config(path)?,
        None => ScanConfig::default(),
    };

    config::merge_cli_args(
        &mut scan_config,
        CliOverrides {
            target: cli.url,
            cookies: cli.cookie,
            headers: cli.headers,
            exclude: cli.exclude,
            delay_secs: cli.delay,
            timeout_secs: cli.timeout,
            threads: cli.threads,
            samples: cli.samples,
            entropy_threshold: cli.entropy_threshold,
            max_depth: cli.max_depth,
            user_agent: cli.user_agent,
            proxy: cli.proxy,
            crawl: cli.crawl,
            no_analysis: cli.no_analysis,
            malicious: cli.malicious,
            skip_poc: cli.skip_poc,
            no_verify: cli.no_verify,
            random_agent: cli.random_agent,
            display: cli.display,
        },
    );

    if scan_config.target.is_empty() {
        eprintln!(
            "  {} a target is required (--url or [scan] target in the config file)",
            "Error:".red().bold()
        );
        std::process::exit(2);
    }

    if scan_config.display_headers && scan_config.crawl {
        warn!("--display is ignored while crawling");
    }

    if !cli.quiet {
        println!("  {} {}", "Target:".bold(), scan_config.target.green());
        println!(
            "  {} {}",
            "Crawl:".bold(),
            (if scan_config.crawl { "enabled" } else { "root only" }).cyan()
        );
        println!(
            "  {} {}\n",
            "Threads:".bold(),
            scan_config.threads.to_string().cyan()
        );
    }

    let engine = ScanEngine::new(scan_config)?;

    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  {}", "Interrupted, finishing in-flight requests...".yellow());
            abort.abort();
        }
    });

    let pb = spinner(cli.quiet);
    pb.set_message(format!("Scanning {}", engine.config().target));
    let result = engine.run().await;
    pb.finish_and_clear();
    let result = result?;

    print_summary(&result);

    let output_dir = cli
        .output
        .unwrap_or_else(|| report::default_output_dir(&result.target));
    let written = report::poc::write_all(&result.pocs, &output_dir, "csrf-poc")?;
    for path in &written {
        println!("  {} {}", "PoC saved to:".bold(), path.display().to_string().green());
    }

    if cli.json {
        let json_path = output_dir.join("report.json");
        report::json::export(&result, &json_path)?;
        println!(
            "  {} {}",
            "Report saved to:".bold(),
            json_path.display().to_string().green()
        );
    }

    Ok(())
}
