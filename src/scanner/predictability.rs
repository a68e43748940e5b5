//! Token predictability analysis over independently fetched samples
//!
//! A token only protects a form if an attacker cannot know or guess it. The
//! analyzer re-fetches the page that served the form, collects the token
//! each time and grades the samples:
//!
//! - identical values, or a value reused across two sessions, are static
//! - a varying portion with too little Shannon entropy is weak
//! - anything else is strong and goes on to the validation-bypass probes

use crate::crawler::extractor;
use crate::http::{FetchRequest, FetchResponse, Fetcher};
use crate::models::{Form, PredictabilityReport, TokenEncoding, TokenGrade, TokenSample};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Collects up to `count` samples of `field_name` by re-fetching the form's page.
///
/// With `fresh_sessions` every fetch goes through an independent cookie context.
pub async fn collect_samples(
    fetcher: &dyn Fetcher,
    form: &Form,
    field_name: &str,
    count: usize,
    fresh_sessions: bool,
) -> Vec<TokenSample> {
    let mut samples = Vec::with_capacity(count);

    for i in 0..count {
        let forked: Arc<dyn Fetcher>;
        let active: &dyn Fetcher = if fresh_sessions {
            match fetcher.new_session() {
                Ok(session) => {
                    forked = session;
                    forked.as_ref()
                }
                Err(e) => {
                    warn!("Could not open a fresh session for sample {i}: {e}");
                    fetcher
                }
            }
        } else {
            fetcher
        };

        let response = match active.fetch(FetchRequest::get(&form.source)).await {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                debug!("Sample {i} of {} returned HTTP {}", form.source, resp.status);
                continue;
            }
            Err(e) => {
                debug!("Sample {i} of {} failed: {e}", form.source);
                continue;
            }
        };

        match token_in_page(&response, form, field_name) {
            Some(value) => samples.push(TokenSample {
                field_name: field_name.to_string(),
                value,
                collected_at: Utc::now(),
                session: response.session_context(),
            }),
            None => debug!("Sample {i}: form {} no longer carries {field_name}", form.action),
        }
    }

    samples
}

/// Current value of `field_name` in the same form (action and method) on a fetched page
pub fn token_in_page(response: &FetchResponse, form: &Form, field_name: &str) -> Option<String> {
    let page_url = Url::parse(&response.url).ok()?;
    extractor::extract(&page_url, &response.body)
        .forms
        .into_iter()
        .filter(|f| f.action == form.action && f.method == form.method)
        .find_map(|f| f.field(field_name).map(|field| field.default_value.clone()))
}

/// Fetches samples and grades them
pub async fn analyze(
    fetcher: &dyn Fetcher,
    form: &Form,
    field_name: &str,
    sample_count: usize,
    min_entropy_bits: f64,
    fresh_sessions: bool,
) -> PredictabilityReport {
    let samples = collect_samples(fetcher, form, field_name, sample_count, fresh_sessions).await;
    debug!(
        "Collected {}/{} samples of {} for {}",
        samples.len(),
        sample_count,
        field_name,
        form.action
    );
    grade(samples, min_entropy_bits)
}

/// Grades a sample set. Precedence: Static > Weak > Strong > Inconclusive.
pub fn grade(samples: Vec<TokenSample>, min_entropy_bits: f64) -> PredictabilityReport {
    let values: Vec<&str> = samples.iter().map(|s| s.value.as_str()).collect();
    let distinct_values = values.iter().collect::<HashSet<_>>().len();
    let min_length = values.iter().map(|v| v.chars().count()).min().unwrap_or(0);
    let max_length = values.iter().map(|v| v.chars().count()).max().unwrap_or(0);

    let (static_prefix, static_suffix, varying) = split_static_parts(&values);
    let entropy_bits = varying_entropy_bits(&varying);
    let cross_session_reuse = reused_across_sessions(&samples);
    let encoding = values
        .first()
        .map(|v| detect_encoding(v))
        .unwrap_or(TokenEncoding::Opaque);

    let grade = if samples.len() < 2 {
        TokenGrade::Inconclusive
    } else if distinct_values == 1 || cross_session_reuse {
        TokenGrade::Static
    } else if entropy_bits < min_entropy_bits {
        TokenGrade::Weak
    } else {
        TokenGrade::Strong
    };

    PredictabilityReport {
        grade,
        samples,
        distinct_values,
        min_length,
        max_length,
        static_prefix,
        static_suffix,
        entropy_bits,
        encoding,
        cross_session_reuse,
    }
}

/// Estimate for a single observed value, used when analysis is disabled
pub fn single_sample_grade(value: &str, min_entropy_bits: f64) -> TokenGrade {
    if value.is_empty() {
        return TokenGrade::Weak;
    }
    let bits = varying_entropy_bits(&[value.chars().collect()]);
    if bits < min_entropy_bits {
        TokenGrade::Weak
    } else {
        TokenGrade::Strong
    }
}

/// Splits samples into the prefix and suffix they all share and their varying middles
fn split_static_parts(values: &[&str]) -> (String, String, Vec<Vec<char>>) {
    let chars: Vec<Vec<char>> = values.iter().map(|v| v.chars().collect()).collect();
    if chars.len() < 2 {
        return (String::new(), String::new(), chars);
    }

    let shortest = chars.iter().map(Vec::len).min().unwrap_or(0);
    let prefix_len = (0..shortest)
        .take_while(|&i| chars.iter().all(|c| c[i] == chars[0][i]))
        .count();
    let suffix_len = (0..shortest - prefix_len)
        .take_while(|&i| {
            let first = &chars[0];
            chars
                .iter()
                .all(|c| c[c.len() - 1 - i] == first[first.len() - 1 - i])
        })
        .count();

    let first = &chars[0];
    let prefix: String = first[..prefix_len].iter().collect();
    let suffix: String = first[first.len() - suffix_len..].iter().collect();
    let varying = chars
        .iter()
        .map(|c| c[prefix_len..c.len() - suffix_len].to_vec())
        .collect();

    (prefix, suffix, varying)
}

/// Shannon entropy of the pooled varying characters times their mean length
fn varying_entropy_bits(varying: &[Vec<char>]) -> f64 {
    let total: usize = varying.iter().map(Vec::len).sum();
    if total == 0 {
        return 0.0;
    }

    let mut frequencies: HashMap<char, usize> = HashMap::new();
    for c in varying.iter().flatten() {
        *frequencies.entry(*c).or_insert(0) += 1;
    }

    let len = total as f64;
    let per_char: f64 = frequencies
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum();

    per_char * (len / varying.len() as f64)
}

fn reused_across_sessions(samples: &[TokenSample]) -> bool {
    let mut sessions_by_value: HashMap<&str, HashSet<&str>> = HashMap::new();
    for sample in samples {
        if let Some(ref session) = sample.session {
            sessions_by_value
                .entry(sample.value.as_str())
                .or_default()
                .insert(session.as_str());
        }
    }
    sessions_by_value.values().any(|sessions| sessions.len() > 1)
}

const UUID_PATTERN: &str = r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

/// Guesses how a token value was produced
pub fn detect_encoding(value: &str) -> TokenEncoding {
    if value.is_empty() {
        return TokenEncoding::Opaque;
    }
    if let Ok(re) = Regex::new(UUID_PATTERN) {
        if re.is_match(value) {
            return TokenEncoding::Uuid;
        }
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return TokenEncoding::Numeric;
    }
    if value.chars().all(|c| c.is_ascii_hexdigit()) {
        return match value.len() {
            32 => TokenEncoding::Md5Hex,
            40 => TokenEncoding::Sha1Hex,
            64 => TokenEncoding::Sha256Hex,
            128 => TokenEncoding::Sha512Hex,
            _ => TokenEncoding::Hex,
        };
    }
    if is_base64_text(value) {
        return TokenEncoding::Base64;
    }
    TokenEncoding::Opaque
}

/// Base64 that decodes to mostly readable text
fn is_base64_text(candidate: &str) -> bool {
    let decoded = general_purpose::STANDARD
        .decode(candidate)
        .or_else(|_| general_purpose::URL_SAFE.decode(candidate));
    match decoded {
        Ok(bytes) if !bytes.is_empty() => {
            let readable = bytes
                .iter()
                .filter(|&&b| b.is_ascii_graphic() || b == b' ')
                .count();
            readable as f64 / bytes.len() as f64 > 0.85
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distr::Alphanumeric;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn samples(values: &[&str], session: Option<&str>) -> Vec<TokenSample> {
        values
            .iter()
            .map(|v| TokenSample {
                field_name: "csrf".to_string(),
                value: v.to_string(),
                collected_at: Utc::now(),
                session: session.map(str::to_string),
            })
            .collect()
    }

    #[test]
    fn test_identical_samples_are_static() {
        for n in 2..=6 {
            let values = vec!["d41d8cd98f00b204e9800998ecf8427e"; n];
            let report = grade(samples(&values, None), 48.0);
            assert_eq!(report.grade, TokenGrade::Static, "n = {n}");
            assert_eq!(report.distinct_values, 1);
            assert_eq!(report.entropy_bits, 0.0);
            assert_eq!(report.encoding, TokenEncoding::Md5Hex);
        }
    }

    #[test]
    fn test_random_tokens_are_strong() {
        for seed in 0..300u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let n = rng.random_range(2..=5);
            let len = rng.random_range(16..=48);
            let values: Vec<String> = (0..n)
                .map(|_| (&mut rng).sample_iter(Alphanumeric).take(len).map(char::from).collect())
                .collect();
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();

            let report = grade(samples(&refs, None), 48.0);
            assert_eq!(
                report.grade,
                TokenGrade::Strong,
                "seed {seed}: {} bits for {values:?}",
                report.entropy_bits
            );
        }
    }

    #[test]
    fn test_timestamp_token_is_weak() {
        let values = [
            "user42-1717171717",
            "user42-1717171718",
            "user42-1717171721",
            "user42-1717171725",
        ];
        let report = grade(samples(&values, None), 48.0);
        assert_eq!(report.grade, TokenGrade::Weak);
        assert_eq!(report.static_prefix, "user42-17171717");
        assert!(report.entropy_bits < 10.0);
    }

    #[test]
    fn test_cross_session_reuse_is_static() {
        let mut set = samples(&["tokA93kdLq0zP1mX7", "tokA93kdLq0zP1mX7"], Some("sid=1"));
        set[1].session = Some("sid=2".to_string());
        set.extend(samples(&["zzQ8pL2mN4vB6xC0rT"], Some("sid=3")));

        let report = grade(set, 48.0);
        assert!(report.cross_session_reuse);
        assert_eq!(report.grade, TokenGrade::Static);
    }

    #[test]
    fn test_same_session_repeat_is_not_reuse() {
        let mut rng = StdRng::seed_from_u64(7);
        let a: String = (&mut rng).sample_iter(Alphanumeric).take(32).map(char::from).collect();
        let b: String = (&mut rng).sample_iter(Alphanumeric).take(32).map(char::from).collect();
        let report = grade(samples(&[&a, &a, &b], Some("sid=1")), 48.0);
        assert!(!report.cross_session_reuse);
        assert_eq!(report.grade, TokenGrade::Strong);
    }

    #[test]
    fn test_too_few_samples_inconclusive() {
        assert_eq!(grade(Vec::new(), 48.0).grade, TokenGrade::Inconclusive);
        assert_eq!(
            grade(samples(&["abc"], None), 48.0).grade,
            TokenGrade::Inconclusive
        );
    }

    #[test]
    fn test_length_range_recorded() {
        let report = grade(samples(&["a1", "b22", "c333"], None), 48.0);
        assert_eq!(report.min_length, 2);
        assert_eq!(report.max_length, 4);
    }

    #[test]
    fn test_single_sample_grade() {
        assert_eq!(single_sample_grade("", 48.0), TokenGrade::Weak);
        assert_eq!(single_sample_grade("1234", 48.0), TokenGrade::Weak);
        assert_eq!(
            single_sample_grade("Zq8LmN2vB6xC0rTyP4sK9wE1hJ3gF5dA", 48.0),
            TokenGrade::Strong
        );
    }

    #[test]
    fn test_detect_encoding() {
        assert_eq!(detect_encoding("123456"), TokenEncoding::Numeric);
        assert_eq!(
            detect_encoding("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            TokenEncoding::Sha1Hex
        );
        assert_eq!(
            detect_encoding("123e4567-e89b-12d3-a456-426614174000"),
            TokenEncoding::Uuid
        );
        assert_eq!(detect_encoding("dXNlcj1hZG1pbjt0cz0x"), TokenEncoding::Base64);
        assert_eq!(detect_encoding("k$9@!x"), TokenEncoding::Opaque);
    }
}
