//! Anti-CSRF token field detection

use crate::models::{Form, FormField};

/// Single-sample token posture of a form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPosture {
    NoTokenField,
    TokenFieldPresent {
        field_name: String,
        sample_value: String,
    },
}

/// Identifies the field most likely to carry the anti-CSRF token.
///
/// Hidden fields are preferred; among equals the first in document order wins.
pub fn classify(form: &Form, token_names: &[String]) -> TokenPosture {
    let patterns: Vec<String> = token_names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    let matches = |field: &&FormField| {
        let lower = field.name.to_lowercase();
        patterns.iter().any(|p| lower.contains(p.as_str()))
    };

    let candidate = form
        .fields
        .iter()
        .filter(|f| f.is_hidden())
        .find(matches)
        .or_else(|| form.fields.iter().find(matches));

    match candidate {
        Some(field) => TokenPosture::TokenFieldPresent {
            field_name: field.name.clone(),
            sample_value: field.default_value.clone(),
        },
        None => TokenPosture::NoTokenField,
    }
}
