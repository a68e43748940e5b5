//! Link and form extraction from HTML content

use crate::models::{FieldKind, Form, FormField, HttpMethod};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Everything worth keeping from one fetched page
#[derive(Debug, Clone, Default)]
pub struct PageExtract {
    pub links: Vec<String>,
    pub forms: Vec<Form>,
}

/// Parses a page into links and forms. html5ever recovers from malformed
/// markup, so this never fails; broken fragments simply yield nothing.
pub fn extract(page_url: &Url, html: &str) -> PageExtract {
    let document = Html::parse_document(html);
    PageExtract {
        links: extract_links(&document, page_url),
        forms: extract_forms(&document, page_url),
    }
}

/// Extracts navigable URLs (a[href], area[href], frame[src], iframe[src])
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let selectors = [
        ("a[href]", "href"),
        ("area[href]", "href"),
        ("frame[src]", "src"),
        ("iframe[src]", "src"),
    ];

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for (sel_str, attr) in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            for element in document.select(&selector) {
                let Some(value) = element.value().attr(attr) else {
                    continue;
                };
                if let Some(resolved) = resolve_url(base_url, value) {
                    if should_include_path(&resolved) && seen.insert(resolved.clone()) {
                        urls.push(resolved);
                    }
                }
            }
        }
    }

    urls
}

/// Extracts forms with their fields in document order
fn extract_forms(document: &Html, page_url: &Url) -> Vec<Form> {
    let mut forms = Vec::new();
    let mut keys = HashSet::new();

    let (Ok(form_selector), Ok(field_selector)) = (
        Selector::parse("form"),
        Selector::parse("input, select, textarea"),
    ) else {
        return forms;
    };

    for form in document.select(&form_selector) {
        let method = form
            .value()
            .attr("method")
            .map(HttpMethod::from_form_attr)
            .unwrap_or(HttpMethod::Get);

        let action = match form.value().attr("action").map(str::trim) {
            None | Some("") | Some("#") => strip_fragment(page_url),
            Some(raw) => match page_url.join(raw) {
                Ok(mut resolved) => {
                    resolved.set_fragment(None);
                    resolved.to_string()
                }
                Err(_) => continue,
            },
        };

        let fields = form
            .select(&field_selector)
            .filter_map(field_from_element)
            .collect();

        let form = Form {
            source: page_url.to_string(),
            method,
            action,
            fields,
        };
        if keys.insert(form.key()) {
            forms.push(form);
        }
    }

    forms
}

fn field_from_element(element: ElementRef<'_>) -> Option<FormField> {
    let el = element.value();
    let name = el.attr("name")?.trim();
    if name.is_empty() {
        return None;
    }

    let field = match el.name() {
        "select" => FormField::new(name, FieldKind::Select, select_default(element)),
        "textarea" => FormField::new(
            name,
            FieldKind::TextArea,
            element.text().collect::<String>(),
        ),
        _ => {
            let kind = FieldKind::from_input_type(el.attr("type"));
            let default = match (&kind, el.attr("value")) {
                (_, Some(v)) => v.to_string(),
                (FieldKind::Checkbox | FieldKind::Radio, None) => "on".to_string(),
                (_, None) => String::new(),
            };
            FormField::new(name, kind, default)
        }
    };
    Some(field)
}

fn select_default(select: ElementRef<'_>) -> String {
    let Ok(option_sel) = Selector::parse("option") else {
        return String::new();
    };
    let options: Vec<ElementRef<'_>> = select.select(&option_sel).collect();
    options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())
        .map(|o| {
            o.value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| o.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}

fn strip_fragment(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_fragment(None);
    clean.to_string()
}

/// Resolves a potentially relative URL against a base URL
fn resolve_url(base_url: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();

    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let mut resolved = base_url.join(trimmed).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved.to_string())
}

/// Filters out paths that are unlikely to be useful endpoints
fn should_include_path(path: &str) -> bool {
    let skip_extensions = [
        ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf", ".eot", ".mp3",
        ".mp4", ".avi", ".mov", ".pdf", ".zip", ".tar", ".gz", ".css", ".js",
    ];

    let lower = path.to_lowercase();
    let without_query = lower.split(['?', '#']).next().unwrap_or("");
    !skip_extensions.iter().any(|ext| without_query.ends_with(ext))
}
