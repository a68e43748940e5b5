//! Per-form CSRF verdicts from token posture, predictability and differential probes

use crate::http::{FetchRequest, FetchResponse, Fetcher};
use crate::models::{
    Evidence, FieldKind, Form, HttpMethod, ProbeKind, ProbeOutcome, ProbeResult, SameSitePosture,
    ScanConfig, Severity, TokenEvidence, TokenGrade, Verdict, VulnerabilityFinding,
};
use crate::scanner::predictability;
use crate::scanner::token::{self, TokenPosture};
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::debug;

/// Statuses a server uses to refuse a forged or incomplete token
const TOKEN_REJECTION_STATUSES: &[u16] = &[400, 403, 419, 422];

/// What the classifier needs besides the form itself
pub struct ClassifyContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub config: &'a ScanConfig,
    /// SameSite posture of the cookies the session has accumulated
    pub same_site: SameSitePosture,
    /// Sample through independent sessions (the session holds cookies)
    pub fresh_sessions: bool,
}

/// Verdict plus everything that led to it
#[derive(Debug, Clone)]
pub struct FormAnalysis {
    pub verdict: Verdict,
    pub evidence: Evidence,
    /// A submission to the form's action failed at the transport level
    pub action_unreachable: bool,
}

impl FormAnalysis {
    pub fn into_finding(self, form: Form) -> VulnerabilityFinding {
        let severity = severity(self.verdict, form.method, self.evidence.same_site);
        VulnerabilityFinding::new(form, self.verdict, severity, self.evidence)
    }
}

/// Classifies one form
pub async fn analyze_form(ctx: &ClassifyContext<'_>, form: &Form) -> FormAnalysis {
    let mut evidence = Evidence::new(ctx.same_site);

    let (field_name, sample_value) = match token::classify(form, &ctx.config.token_names) {
        TokenPosture::NoTokenField => {
            let replay = run_probe(ctx, form, None, ProbeKind::Replay).await;
            let verdict = match replay.outcome {
                ProbeOutcome::Accepted { .. } => Verdict::MissingToken,
                _ => {
                    evidence
                        .notes
                        .push("Form without a token field was not accepted on replay".to_string());
                    Verdict::Inconclusive
                }
            };
            let action_unreachable = matches!(replay.outcome, ProbeOutcome::Failed { .. });
            evidence.probes.push(replay);
            return FormAnalysis {
                verdict,
                evidence,
                action_unreachable,
            };
        }
        TokenPosture::TokenFieldPresent {
            field_name,
            sample_value,
        } => (field_name, sample_value),
    };

    evidence.token = Some(TokenEvidence {
        field_name: field_name.clone(),
        initial_value: sample_value.clone(),
    });

    let grade = if ctx.config.analysis {
        let report = predictability::analyze(
            ctx.fetcher,
            form,
            &field_name,
            ctx.config.sample_count,
            ctx.config.min_entropy_bits,
            ctx.fresh_sessions,
        )
        .await;
        let grade = report.grade;
        evidence.predictability = Some(report);
        grade
    } else {
        evidence
            .notes
            .push("Token graded from a single observed value".to_string());
        predictability::single_sample_grade(&sample_value, ctx.config.min_entropy_bits)
    };

    let verdict = match grade {
        TokenGrade::Static => Verdict::StaticToken,
        TokenGrade::Weak => Verdict::WeakToken,
        TokenGrade::Inconclusive => {
            evidence
                .notes
                .push("Too few token samples could be collected".to_string());
            Verdict::Inconclusive
        }
        TokenGrade::Strong => {
            for kind in &ctx.config.bypass_probes {
                let result = run_probe(ctx, form, Some(&field_name), *kind).await;
                debug!("{} probe on {}: {:?}", kind, form.action, result.outcome);
                evidence.probes.push(result);
            }
            decide_from_probes(&evidence.probes)
        }
    };

    let action_unreachable = evidence.has_failed_probe();
    FormAnalysis {
        verdict,
        evidence,
        action_unreachable,
    }
}

/// Folds probe outcomes into a verdict.
///
/// `Replay` results are a baseline: a token-bearing submission the server
/// refuses leaves nothing to compare bypasses against.
pub fn decide_from_probes(probes: &[ProbeResult]) -> Verdict {
    let (baseline, bypass): (Vec<&ProbeResult>, Vec<&ProbeResult>) =
        probes.iter().partition(|p| p.probe == ProbeKind::Replay);

    if bypass.is_empty() {
        return Verdict::Inconclusive;
    }
    if bypass
        .iter()
        .any(|p| matches!(p.outcome, ProbeOutcome::Accepted { .. }))
    {
        return Verdict::ValidationBypass;
    }
    if baseline
        .iter()
        .any(|p| !matches!(p.outcome, ProbeOutcome::Accepted { .. }))
    {
        return Verdict::Inconclusive;
    }
    if bypass
        .iter()
        .all(|p| matches!(p.outcome, ProbeOutcome::Rejected { .. }))
    {
        Verdict::Protected
    } else {
        Verdict::Inconclusive
    }
}

/// Severity of a verdict for a form submitted with `method`
pub fn severity(verdict: Verdict, method: HttpMethod, same_site: SameSitePosture) -> Severity {
    let base = match verdict {
        Verdict::StaticToken | Verdict::ValidationBypass | Verdict::MissingToken => Severity::High,
        Verdict::WeakToken => Severity::Medium,
        Verdict::Protected | Verdict::Inconclusive => return Severity::Info,
    };
    if !method.is_state_changing() {
        return Severity::Info;
    }
    match same_site {
        SameSitePosture::Strict | SameSitePosture::Lax => base.lowered(),
        SameSitePosture::NoCookies | SameSitePosture::Unrestricted => base,
    }
}

/// Judges a probe response by status and rejection markers
pub fn judge(response: &FetchResponse, rejection_markers: &[String]) -> ProbeOutcome {
    let body = response.body.to_lowercase();
    let marker = rejection_markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .find(|m| !m.is_empty() && body.contains(m.as_str()));

    match response.status {
        status if TOKEN_REJECTION_STATUSES.contains(&status) => {
            ProbeOutcome::Rejected { status, marker }
        }
        status @ 200..=399 => match marker {
            Some(marker) => ProbeOutcome::Rejected {
                status,
                marker: Some(marker),
            },
            None => ProbeOutcome::Accepted { status },
        },
        status => ProbeOutcome::Blocked { status },
    }
}

/// Name/value pairs a browser would submit with the form's defaults
pub fn submission_fields(form: &Form) -> Vec<(String, String)> {
    form.fields
        .iter()
        .filter(|f| !matches!(f.kind, FieldKind::Submit | FieldKind::File))
        .map(|f| (f.name.clone(), f.default_value.clone()))
        .collect()
}

/// Random alphanumeric value of `len` characters that differs from `original`
pub fn tampered_value(original: &str) -> String {
    let len = match original.chars().count() {
        0 => 32,
        n => n,
    };
    let mut rng = rand::rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        if candidate != original {
            return candidate;
        }
    }
}

async fn run_probe(
    ctx: &ClassifyContext<'_>,
    form: &Form,
    token_field: Option<&str>,
    kind: ProbeKind,
) -> ProbeResult {
    let mut fields = submission_fields(form);
    let mut token_value = None;

    if let Some(name) = token_field {
        let current = match kind {
            ProbeKind::Replay => Some(
                harvest_token(ctx.fetcher, form, name)
                    .await
                    .or_else(|| form.field(name).map(|f| f.default_value.clone()))
                    .unwrap_or_default(),
            ),
            ProbeKind::StripToken => None,
            ProbeKind::TamperToken => {
                let original = form.field(name).map(|f| f.default_value.as_str()).unwrap_or("");
                Some(tampered_value(original))
            }
            ProbeKind::ForeignSessionToken => {
                let foreign = match ctx.fetcher.new_session() {
                    Ok(session) => harvest_token(session.as_ref(), form, name).await,
                    Err(e) => {
                        debug!("No independent session for {}: {e}", form.action);
                        None
                    }
                };
                match foreign {
                    Some(value) => Some(value),
                    None => {
                        return ProbeResult {
                            probe: kind,
                            outcome: ProbeOutcome::Failed {
                                error: "could not harvest a token from an independent session"
                                    .to_string(),
                            },
                            token_value: None,
                        }
                    }
                }
            }
        };

        match current {
            Some(value) => {
                set_field(&mut fields, name, &value);
                token_value = Some(value);
            }
            None => fields.retain(|(n, _)| n != name),
        }
    }

    let request = FetchRequest::form(form.method, &form.action, &fields);
    let outcome = match ctx.fetcher.fetch(request).await {
        Ok(response) => judge(&response, &ctx.config.rejection_markers),
        Err(e) => ProbeOutcome::Failed {
            error: e.to_string(),
        },
    };

    ProbeResult {
        probe: kind,
        outcome,
        token_value,
    }
}

/// Re-fetches the form's page and reads the token it serves now
async fn harvest_token(fetcher: &dyn Fetcher, form: &Form, field_name: &str) -> Option<String> {
    let response = fetcher.fetch(FetchRequest::get(&form.source)).await.ok()?;
    if !response.is_success() {
        return None;
    }
    predictability::token_in_page(&response, form, field_name)
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(kind: ProbeKind, outcome: ProbeOutcome) -> ProbeResult {
        ProbeResult {
            probe: kind,
            outcome,
            token_value: None,
        }
    }

    fn accepted() -> ProbeOutcome {
        ProbeOutcome::Accepted { status: 200 }
    }

    fn rejected() -> ProbeOutcome {
        ProbeOutcome::Rejected {
            status: 403,
            marker: None,
        }
    }

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            url: "https://example.com/save".to_string(),
            status,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_judge_by_status() {
        let markers = ScanConfig::default().rejection_markers;
        assert_eq!(judge(&response(200, "Saved"), &markers), accepted());
        assert_eq!(
            judge(&response(302, ""), &markers),
            ProbeOutcome::Accepted { status: 302 }
        );
        for status in [400, 403, 419, 422] {
            assert!(matches!(
                judge(&response(status, ""), &markers),
                ProbeOutcome::Rejected { .. }
            ));
        }
        for status in [401, 404, 405, 500, 503] {
            assert_eq!(
                judge(&response(status, ""), &markers),
                ProbeOutcome::Blocked { status }
            );
        }
    }

    #[test]
    fn test_judge_by_marker() {
        let markers = ScanConfig::default().rejection_markers;
        assert_eq!(
            judge(&response(200, "<p>Invalid Token, please retry</p>"), &markers),
            ProbeOutcome::Rejected {
                status: 200,
                marker: Some("invalid token".to_string())
            }
        );
    }

    #[test]
    fn test_decide_from_probes() {
        use ProbeKind::*;
        assert_eq!(decide_from_probes(&[]), Verdict::Inconclusive);
        assert_eq!(
            decide_from_probes(&[probe(StripToken, rejected()), probe(TamperToken, rejected())]),
            Verdict::Protected
        );
        assert_eq!(
            decide_from_probes(&[probe(StripToken, rejected()), probe(TamperToken, accepted())]),
            Verdict::ValidationBypass
        );
        assert_eq!(
            decide_from_probes(&[
                probe(StripToken, rejected()),
                probe(TamperToken, ProbeOutcome::Blocked { status: 404 })
            ]),
            Verdict::Inconclusive
        );
        assert_eq!(
            decide_from_probes(&[probe(Replay, rejected()), probe(StripToken, rejected())]),
            Verdict::Inconclusive
        );
        assert_eq!(
            decide_from_probes(&[probe(Replay, accepted()), probe(StripToken, rejected())]),
            Verdict::Protected
        );
    }

    #[test]
    fn test_additional_probes_never_restore_protected() {
        use ProbeKind::*;
        let outcomes = [
            accepted(),
            rejected(),
            ProbeOutcome::Blocked { status: 401 },
            ProbeOutcome::Failed {
                error: "timeout".to_string(),
            },
        ];
        let kinds = [Replay, StripToken, TamperToken, ForeignSessionToken];

        let mut sets: Vec<Vec<ProbeResult>> = vec![Vec::new()];
        for _ in 0..3 {
            let mut grown = Vec::new();
            for set in &sets {
                for kind in kinds {
                    for outcome in &outcomes {
                        let mut next = set.clone();
                        next.push(probe(kind, outcome.clone()));
                        grown.push(next);
                    }
                }
            }
            for bigger in &grown {
                let smaller = &bigger[..bigger.len() - 1];
                let before = decide_from_probes(smaller);
                let after = decide_from_probes(bigger);
                let probed = smaller.iter().any(|p| p.probe != Replay);
                if probed && before != Verdict::Protected {
                    assert_ne!(
                        after,
                        Verdict::Protected,
                        "{smaller:?} was {before}, {bigger:?} became Protected"
                    );
                }
                if before == Verdict::ValidationBypass {
                    assert_eq!(after, Verdict::ValidationBypass);
                }
            }
            sets = grown;
        }
    }

    #[test]
    fn test_severity() {
        use SameSitePosture::*;
        assert_eq!(severity(Verdict::StaticToken, HttpMethod::Post, Unrestricted), Severity::High);
        assert_eq!(severity(Verdict::MissingToken, HttpMethod::Post, NoCookies), Severity::High);
        assert_eq!(severity(Verdict::WeakToken, HttpMethod::Post, NoCookies), Severity::Medium);
        assert_eq!(severity(Verdict::ValidationBypass, HttpMethod::Post, Lax), Severity::Medium);
        assert_eq!(severity(Verdict::WeakToken, HttpMethod::Post, Strict), Severity::Low);
        assert_eq!(severity(Verdict::MissingToken, HttpMethod::Get, NoCookies), Severity::Info);
        assert_eq!(severity(Verdict::Protected, HttpMethod::Post, NoCookies), Severity::Info);
        assert_eq!(severity(Verdict::Inconclusive, HttpMethod::Post, NoCookies), Severity::Info);
    }

    #[test]
    fn test_tampered_value_same_length() {
        let original = "a8F3kLm2Qz9xW4pR";
        for _ in 0..20 {
            let tampered = tampered_value(original);
            assert_eq!(tampered.len(), original.len());
            assert_ne!(tampered, original);
        }
        assert_eq!(tampered_value("").len(), 32);
    }

    #[test]
    fn test_submission_fields_skip_buttons() {
        let form = Form {
            source: "https://example.com/".to_string(),
            method: HttpMethod::Post,
            action: "https://example.com/save".to_string(),
            fields: vec![
                crate::models::FormField::new("email", FieldKind::Email, "a@b.c"),
                crate::models::FormField::new("go", FieldKind::Submit, "Save"),
            ],
        };
        assert_eq!(
            submission_fields(&form),
            vec![("email".to_string(), "a@b.c".to_string())]
        );
    }
}
