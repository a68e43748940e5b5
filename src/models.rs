//! Core data models for xsrfscan

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Severity level for security findings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

impl Severity {
    /// Returns the color name for terminal output
    pub fn color(&self) -> &str {
        match self {
            Severity::Critical => "red",
            Severity::High => "bright red",
            Severity::Medium => "yellow",
            Severity::Low => "blue",
            Severity::Info => "white",
        }
    }

    /// One level less severe, bottoming out at Info
    pub fn lowered(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::Info => Severity::Info,
        }
    }
}

/// HTTP method of an endpoint or form
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parses a form `method` attribute; anything unrecognised is GET
    pub fn from_form_attr(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "post" => HttpMethod::Post,
            "put" => HttpMethod::Put,
            "patch" => HttpMethod::Patch,
            "delete" => HttpMethod::Delete,
            _ => HttpMethod::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods that are expected to mutate server-side state
    pub fn is_state_changing(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an endpoint inside the frontier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndpointState {
    Queued,
    Visited,
    Unreachable,
}

/// A crawlable endpoint, identified by (url, method)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub method: HttpMethod,
    pub depth: u32,
    pub source: Option<String>,
    pub state: EndpointState,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, method: HttpMethod, depth: u32, source: Option<String>) -> Self {
        Self {
            url: url.into(),
            method,
            depth,
            source,
            state: EndpointState::Queued,
        }
    }

    /// Identity used for deduplication
    pub fn key(&self) -> (String, HttpMethod) {
        (self.url.clone(), self.method)
    }
}

/// Kind of a form control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Hidden,
    Text,
    Email,
    Password,
    Search,
    Number,
    Url,
    Tel,
    Checkbox,
    Radio,
    Submit,
    File,
    Select,
    TextArea,
    Other(String),
}

impl FieldKind {
    /// Maps an `<input type=...>` value to a kind (missing type is text)
    pub fn from_input_type(raw: Option<&str>) -> Self {
        let lower = raw.unwrap_or("text").trim().to_ascii_lowercase();
        match lower.as_str() {
            "" | "text" => FieldKind::Text,
            "hidden" => FieldKind::Hidden,
            "email" => FieldKind::Email,
            "password" => FieldKind::Password,
            "search" => FieldKind::Search,
            "number" => FieldKind::Number,
            "url" => FieldKind::Url,
            "tel" => FieldKind::Tel,
            "checkbox" => FieldKind::Checkbox,
            "radio" => FieldKind::Radio,
            "submit" | "button" | "image" | "reset" => FieldKind::Submit,
            "file" => FieldKind::File,
            _ => FieldKind::Other(lower),
        }
    }

    /// Lowercase label used for payload lookup
    pub fn label(&self) -> &str {
        match self {
            FieldKind::Hidden => "hidden",
            FieldKind::Text => "text",
            FieldKind::Email => "email",
            FieldKind::Password => "password",
            FieldKind::Search => "search",
            FieldKind::Number => "number",
            FieldKind::Url => "url",
            FieldKind::Tel => "tel",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Radio => "radio",
            FieldKind::Submit => "submit",
            FieldKind::File => "file",
            FieldKind::Select => "select",
            FieldKind::TextArea => "textarea",
            FieldKind::Other(name) => name,
        }
    }

    /// Whether a victim would normally type a value into this control
    pub fn is_user_editable(&self) -> bool {
        matches!(
            self,
            FieldKind::Text
                | FieldKind::Email
                | FieldKind::Password
                | FieldKind::Search
                | FieldKind::Number
                | FieldKind::Url
                | FieldKind::Tel
                | FieldKind::TextArea
                | FieldKind::Other(_)
        )
    }
}

/// A single named form control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub default_value: String,
}

impl FormField {
    pub fn new(name: impl Into<String>, kind: FieldKind, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            default_value: default_value.into(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.kind == FieldKind::Hidden
    }
}

/// An HTML form discovered on a page; `action` is always absolute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Form {
    /// Page the form was found on
    pub source: String,
    pub method: HttpMethod,
    pub action: String,
    pub fields: Vec<FormField>,
}

impl Form {
    /// Deduplication key: method, action and the set of field names
    pub fn key(&self) -> String {
        let names: BTreeSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        format!(
            "{} {} [{}]",
            self.method,
            self.action,
            names.into_iter().collect::<Vec<_>>().join(",")
        )
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One observation of a token value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSample {
    pub field_name: String,
    pub value: String,
    pub collected_at: DateTime<Utc>,
    /// Session cookies in effect for this fetch, `None` when no session is in play
    pub session: Option<String>,
}

/// Final classification of a form
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verdict {
    Protected,
    MissingToken,
    StaticToken,
    WeakToken,
    ValidationBypass,
    Inconclusive,
}

impl Verdict {
    /// Verdicts that represent an exploitable weakness
    pub fn is_vulnerable(&self) -> bool {
        matches!(
            self,
            Verdict::MissingToken | Verdict::StaticToken | Verdict::WeakToken | Verdict::ValidationBypass
        )
    }

    pub const ALL: [Verdict; 6] = [
        Verdict::ValidationBypass,
        Verdict::StaticToken,
        Verdict::WeakToken,
        Verdict::MissingToken,
        Verdict::Inconclusive,
        Verdict::Protected,
    ];
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Protected => "Protected",
            Verdict::MissingToken => "Missing-Token",
            Verdict::StaticToken => "Static-Token",
            Verdict::WeakToken => "Weak-Token",
            Verdict::ValidationBypass => "Validation-Bypass",
            Verdict::Inconclusive => "Inconclusive",
        };
        f.write_str(label)
    }
}

/// Predictability grade of a sampled token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenGrade {
    Static,
    Weak,
    Strong,
    Inconclusive,
}

/// Apparent encoding of a token value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenEncoding {
    Md5Hex,
    Sha1Hex,
    Sha256Hex,
    Sha512Hex,
    Hex,
    Uuid,
    Numeric,
    Base64,
    Opaque,
}

/// Statistics computed over a set of token samples
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictabilityReport {
    pub grade: TokenGrade,
    pub samples: Vec<TokenSample>,
    pub distinct_values: usize,
    pub min_length: usize,
    pub max_length: usize,
    pub static_prefix: String,
    pub static_suffix: String,
    /// Estimated bits of entropy in the varying portion
    pub entropy_bits: f64,
    pub encoding: TokenEncoding,
    /// Same value observed under two different session contexts
    pub cross_session_reuse: bool,
}

/// Differential probe variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Submit the form exactly as served
    Replay,
    /// Submit without the token field
    StripToken,
    /// Submit with a random value of the same length
    TamperToken,
    /// Submit a token harvested from an independent session
    ForeignSessionToken,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProbeKind::Replay => "replay",
            ProbeKind::StripToken => "strip-token",
            ProbeKind::TamperToken => "tamper-token",
            ProbeKind::ForeignSessionToken => "foreign-session-token",
        };
        f.write_str(label)
    }
}

/// Result of one probe submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProbeOutcome {
    /// Server accepted the submission
    Accepted { status: u16 },
    /// Server rejected it with a token-related signal
    Rejected { status: u16, marker: Option<String> },
    /// Server refused for a reason unrelated to the token (auth, missing route, error)
    Blocked { status: u16 },
    /// The probe could not be completed
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub probe: ProbeKind,
    pub outcome: ProbeOutcome,
    /// Submitted token value, when one was sent
    pub token_value: Option<String>,
}

/// SameSite posture of the session cookies a browser sends with the form
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SameSitePosture {
    NoCookies,
    /// At least one cookie has no SameSite or SameSite=None
    Unrestricted,
    Lax,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenEvidence {
    pub field_name: String,
    pub initial_value: String,
}

/// Everything observed while classifying a form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub token: Option<TokenEvidence>,
    pub predictability: Option<PredictabilityReport>,
    pub probes: Vec<ProbeResult>,
    pub same_site: SameSitePosture,
    pub notes: Vec<String>,
}

impl Evidence {
    pub fn new(same_site: SameSitePosture) -> Self {
        Self {
            token: None,
            predictability: None,
            probes: Vec::new(),
            same_site,
            notes: Vec::new(),
        }
    }

    /// First probe that the server accepted
    pub fn accepted_probe(&self) -> Option<&ProbeResult> {
        self.probes
            .iter()
            .find(|p| matches!(p.outcome, ProbeOutcome::Accepted { .. }))
    }

    /// Whether any probe failed at the transport level
    pub fn has_failed_probe(&self) -> bool {
        self.probes
            .iter()
            .any(|p| matches!(p.outcome, ProbeOutcome::Failed { .. }))
    }
}

/// Classification result for one form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    pub id: String,
    pub form: Form,
    pub verdict: Verdict,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub cwe_id: String,
    pub owasp_category: String,
    pub evidence: Evidence,
}

impl VulnerabilityFinding {
    /// Creates a finding with a generated UUID and verdict-specific wording
    pub fn new(form: Form, verdict: Verdict, severity: Severity, evidence: Evidence) -> Self {
        let (title, recommendation) = match verdict {
            Verdict::Protected => (
                "CSRF Token Enforced",
                "No action required.",
            ),
            Verdict::MissingToken => (
                "Missing CSRF Token",
                "Add a per-session, unpredictable anti-CSRF token to every state-changing form \
                 and verify it server-side.",
            ),
            Verdict::StaticToken => (
                "Static CSRF Token",
                "Generate the anti-CSRF token with a CSPRNG per session (or per request) and bind \
                 it to the user's session.",
            ),
            Verdict::WeakToken => (
                "Predictable CSRF Token",
                "Derive tokens from at least 128 bits of CSPRNG output instead of counters, \
                 timestamps or user data.",
            ),
            Verdict::ValidationBypass => (
                "CSRF Token Not Enforced",
                "Reject every state-changing request whose token is missing or does not match \
                 the session's token.",
            ),
            Verdict::Inconclusive => (
                "CSRF Analysis Inconclusive",
                "Review this form manually.",
            ),
        };

        let description = format!(
            "{} form at {} submitting to {} classified as {}.",
            form.method, form.source, form.action, verdict
        );

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            form,
            verdict,
            severity,
            title: title.to_string(),
            description,
            recommendation: recommendation.to_string(),
            cwe_id: "CWE-352".to_string(),
            owasp_category: "A01:2021 Broken Access Control".to_string(),
            evidence,
        }
    }
}

/// A generated proof-of-concept document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocDocument {
    pub id: String,
    pub finding_id: String,
    pub form_key: String,
    pub action: String,
    pub method: HttpMethod,
    pub fields: Vec<(String, String)>,
    pub markup: String,
    pub auto_submit: bool,
    pub malicious: bool,
}

/// Per-run counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub protected: usize,
    pub missing_token: usize,
    pub static_token: usize,
    pub weak_token: usize,
    pub validation_bypass: usize,
    pub inconclusive: usize,
    pub pages_visited: usize,
    pub forms_analyzed: usize,
    pub unreachable: usize,
    pub total_requests: u64,
}

impl ScanSummary {
    pub fn record(&mut self, verdict: Verdict) {
        *self.slot(verdict) += 1;
        self.forms_analyzed += 1;
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        match verdict {
            Verdict::Protected => self.protected,
            Verdict::MissingToken => self.missing_token,
            Verdict::StaticToken => self.static_token,
            Verdict::WeakToken => self.weak_token,
            Verdict::ValidationBypass => self.validation_bypass,
            Verdict::Inconclusive => self.inconclusive,
        }
    }

    fn slot(&mut self, verdict: Verdict) -> &mut usize {
        match verdict {
            Verdict::Protected => &mut self.protected,
            Verdict::MissingToken => &mut self.missing_token,
            Verdict::StaticToken => &mut self.static_token,
            Verdict::WeakToken => &mut self.weak_token,
            Verdict::ValidationBypass => &mut self.validation_bypass,
            Verdict::Inconclusive => &mut self.inconclusive,
        }
    }
}

/// Result of a complete scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub scan_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub findings: Vec<VulnerabilityFinding>,
    pub pocs: Vec<PocDocument>,
    pub visited: Vec<Endpoint>,
    pub summary: ScanSummary,
    /// The scan was stopped before the frontier drained
    pub aborted: bool,
}

impl ScanReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            scan_id: uuid::Uuid::new_v4().to_string(),
            started_at: Local::now(),
            finished_at: None,
            findings: Vec::new(),
            pocs: Vec::new(),
            visited: Vec::new(),
            summary: ScanSummary::default(),
            aborted: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    /// Findings with an exploitable verdict
    pub fn vulnerable(&self) -> impl Iterator<Item = &VulnerabilityFinding> {
        self.findings.iter().filter(|f| f.verdict.is_vulnerable())
    }
}

/// Immutable configuration snapshot for one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root URL of the scan
    pub target: String,
    /// Follow discovered links; when false only the root is visited
    pub crawl: bool,
    /// Paths (relative to the root) that must not be visited
    pub exclude_paths: Vec<String>,
    /// Worker pool size
    pub threads: usize,
    /// Delay each worker observes between its requests
    pub delay_ms: u64,
    pub timeout_secs: u64,
    pub max_depth: u32,
    pub max_pages: usize,
    pub follow_redirects: bool,
    pub verify_tls: bool,
    pub proxy: Option<String>,
    /// Cookie jar as `name=value` pairs
    pub cookies: Vec<String>,
    pub headers: HashMap<String, String>,
    pub user_agent: String,
    /// Rotate through built-in user agents on each request
    pub random_agent: bool,
    /// Log the headers of every page response; ignored while crawling
    pub display_headers: bool,
    /// Independent fetches used for predictability analysis
    pub sample_count: usize,
    /// Minimum estimated entropy (bits) for a token to count as strong
    pub min_entropy_bits: f64,
    /// Case-insensitive name fragments identifying token fields
    pub token_names: Vec<String>,
    /// Case-insensitive body markers of an explicit rejection
    pub rejection_markers: Vec<String>,
    /// Validation-bypass probes run against strong tokens
    pub bypass_probes: Vec<ProbeKind>,
    /// Run multi-sample predictability analysis
    pub analysis: bool,
    /// Generate PoC documents
    pub poc: bool,
    pub poc_auto_submit: bool,
    /// Fill PoC fields with payloads instead of placeholders
    pub malicious: bool,
    /// Payloads keyed by field kind label, `default` as fallback
    pub malicious_payloads: HashMap<String, String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            crawl: false,
            exclude_paths: Vec::new(),
            threads: 4,
            delay_ms: 0,
            timeout_secs: 15,
            max_depth: 3,
            max_pages: 500,
            follow_redirects: true,
            verify_tls: true,
            proxy: None,
            cookies: Vec::new(),
            headers: HashMap::new(),
            user_agent: format!("xsrfscan/{}", env!("CARGO_PKG_VERSION")),
            random_agent: false,
            display_headers: false,
            sample_count: 5,
            min_entropy_bits: 48.0,
            token_names: [
                "csrf",
                "xsrf",
                "token",
                "authenticity",
                "nonce",
                "__requestverification",
                "antiforgery",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rejection_markers: [
                "csrf",
                "invalid token",
                "token mismatch",
                "token expired",
                "forbidden",
                "request verification",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            bypass_probes: vec![ProbeKind::StripToken, ProbeKind::TamperToken],
            analysis: true,
            poc: true,
            poc_auto_submit: true,
            malicious: false,
            malicious_payloads: [
                ("default", "pwned-by-csrf"),
                ("email", "attacker@evil.example"),
                ("password", "Pwn3d-by-CSRF!"),
                ("url", "https://evil.example/"),
                ("number", "0"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }
}

impl ScanConfig {
    /// Cookie jar split into (name, value) pairs
    pub fn cookie_pairs(&self) -> Vec<(String, String)> {
        self.cookies
            .iter()
            .filter_map(|c| c.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form() -> Form {
        Form {
            source: "https://example.com/profile".to_string(),
            method: HttpMethod::Post,
            action: "https://example.com/update".to_string(),
            fields: vec![
                FormField::new("email", FieldKind::Email, ""),
                FormField::new("csrf", FieldKind::Hidden, "abc"),
            ],
        }
    }

    #[test]
    fn test_form_key_ignores_field_order() {
        let form = sample_form();
        let mut reordered = form.clone();
        reordered.fields.reverse();
        reordered.source = "https://example.com/other".to_string();
        assert_eq!(form.key(), reordered.key());
        assert_eq!(form.key(), "POST https://example.com/update [csrf,email]");
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::from_form_attr("POST"), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(" delete "), HttpMethod::Delete);
        assert_eq!(HttpMethod::from_form_attr("dialog"), HttpMethod::Get);
        assert!(!HttpMethod::Get.is_state_changing());
        assert!(HttpMethod::Put.is_state_changing());
    }

    #[test]
    fn test_field_kind_from_input_type() {
        assert_eq!(FieldKind::from_input_type(None), FieldKind::Text);
        assert_eq!(FieldKind::from_input_type(Some("HIDDEN")), FieldKind::Hidden);
        assert_eq!(
            FieldKind::from_input_type(Some("color")),
            FieldKind::Other("color".to_string())
        );
        assert!(sample_form().fields[1].is_hidden());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ScanSummary::default();
        summary.record(Verdict::StaticToken);
        summary.record(Verdict::StaticToken);
        summary.record(Verdict::Protected);
        assert_eq!(summary.count(Verdict::StaticToken), 2);
        assert_eq!(summary.count(Verdict::Protected), 1);
        assert_eq!(summary.forms_analyzed, 3);
    }

    #[test]
    fn test_severity_lowered() {
        assert_eq!(Severity::High.lowered(), Severity::Medium);
        assert_eq!(Severity::Info.lowered(), Severity::Info);
    }

    #[test]
    fn test_cookie_pairs() {
        let config = ScanConfig {
            cookies: vec!["PHPSESSID=abc".to_string(), " _gid = x1 ".to_string(), "bogus".to_string()],
            ..ScanConfig::default()
        };
        assert_eq!(
            config.cookie_pairs(),
            vec![
                ("PHPSESSID".to_string(), "abc".to_string()),
                ("_gid".to_string(), "x1".to_string())
            ]
        );
    }
}
