//! Proof-of-concept exploit documents for vulnerable POST forms

use crate::error::Result;
use crate::models::{
    FieldKind, HttpMethod, PocDocument, ProbeKind, ScanConfig, Verdict, VulnerabilityFinding,
};
use crate::scanner::verdict;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "poc.html";

/// Observed cookie values shorter than this (`1`, `en`, `true`) are not session secrets
const MIN_OBSERVED_SECRET_LEN: usize = 8;

const POC_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>CSRF PoC - {{ action }}</title>
</head>
<body>
    <h1>CSRF proof of concept</h1>
    <p>{{ title }}: {{ method }} {{ action }}</p>
    <form id="xsrfscan-poc" action="{{ action }}" method="{{ method }}">
{%- for field in fields %}
        <input type="hidden" name="{{ field.name }}" value="{{ field.value }}">
{%- endfor %}
{%- if not auto_submit %}
        <input type="submit" value="Submit request">
{%- endif %}
    </form>
{%- if auto_submit %}
    <script>document.getElementById("xsrfscan-poc").submit();</script>
{%- endif %}
</body>
</html>
"#;

#[derive(Serialize)]
struct TemplateField<'a> {
    name: &'a str,
    value: &'a str,
}

/// Renders PoC documents; values matching any known secret are replaced
pub struct PocGenerator {
    tera: Tera,
    secrets: HashSet<String>,
    auto_submit: bool,
    malicious: bool,
    payloads: HashMap<String, String>,
}

impl PocGenerator {
    /// `observed` are cookie values the target set during the scan.
    ///
    /// Every configured cookie value is scrubbed; observed ones only when long
    /// enough to be a session identifier.
    pub fn new(config: &ScanConfig, observed: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, POC_TEMPLATE)?;

        let secrets = observed
            .into_iter()
            .filter(|s| s.chars().count() >= MIN_OBSERVED_SECRET_LEN)
            .chain(config.cookie_pairs().into_iter().map(|(_, v)| v))
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            tera,
            secrets,
            auto_submit: config.poc_auto_submit,
            malicious: config.malicious,
            payloads: config.malicious_payloads.clone(),
        })
    }

    /// PoC for a finding, or `None` when the finding does not warrant one
    pub fn generate(&self, finding: &VulnerabilityFinding) -> Result<Option<PocDocument>> {
        if !finding.verdict.is_vulnerable() || finding.form.method != HttpMethod::Post {
            return Ok(None);
        }

        let fields = self.fields_for(finding);
        let template_fields: Vec<TemplateField<'_>> = fields
            .iter()
            .map(|(name, value)| TemplateField { name, value })
            .collect();

        let mut context = Context::new();
        context.insert("title", &finding.title);
        context.insert("action", &finding.form.action);
        context.insert("method", finding.form.method.as_str());
        context.insert("fields", &template_fields);
        context.insert("auto_submit", &self.auto_submit);
        let markup = self.tera.render(TEMPLATE_NAME, &context)?;

        Ok(Some(PocDocument {
            id: uuid::Uuid::new_v4().to_string(),
            finding_id: finding.id.clone(),
            form_key: finding.form.key(),
            action: finding.form.action.clone(),
            method: finding.form.method,
            fields,
            markup,
            auto_submit: self.auto_submit,
            malicious: self.malicious,
        }))
    }

    fn fields_for(&self, finding: &VulnerabilityFinding) -> Vec<(String, String)> {
        let token_field = finding
            .evidence
            .token
            .as_ref()
            .map(|t| t.field_name.as_str());
        let bypass = match finding.verdict {
            Verdict::ValidationBypass => finding.evidence.accepted_probe(),
            _ => None,
        };

        let mut fields = Vec::new();
        for field in &finding.form.fields {
            if matches!(field.kind, FieldKind::Submit | FieldKind::File) {
                continue;
            }

            let value = if Some(field.name.as_str()) == token_field {
                match bypass.map(|p| (p.probe, p.token_value.as_deref())) {
                    Some((ProbeKind::StripToken, _)) => continue,
                    Some((ProbeKind::TamperToken, Some(sent))) => sent.to_string(),
                    Some((ProbeKind::TamperToken, None)) => {
                        verdict::tampered_value(&field.default_value)
                    }
                    Some((ProbeKind::ForeignSessionToken, _)) => {
                        "ATTACKER_SESSION_TOKEN".to_string()
                    }
                    Some((ProbeKind::Replay, _)) | None => field.default_value.clone(),
                }
            } else if field.kind.is_user_editable() {
                if self.malicious {
                    self.payloads
                        .get(field.kind.label())
                        .or_else(|| self.payloads.get("default"))
                        .cloned()
                        .unwrap_or_else(|| placeholder(&field.name))
                } else if field.default_value.is_empty() {
                    placeholder(&field.name)
                } else {
                    field.default_value.clone()
                }
            } else {
                field.default_value.clone()
            };

            let value = if self.secrets.contains(&value) {
                placeholder(&field.name)
            } else {
                value
            };
            fields.push((field.name.clone(), value));
        }
        fields
    }
}

fn placeholder(name: &str) -> String {
    format!("ATTACKER_CONTROLLED_{name}")
}
