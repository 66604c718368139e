//! Error and warning detail shown to API callers.
//!
//! Authenticated callers see each message truncated and HTML-escaped.
//! Anonymous callers only learn that something went wrong.

use crate::middleware::Caller;

const MAX_DETAIL_CHARS: usize = 200;
const GENERIC_FAILURE: &str = "run failed";
const GENERIC_WARNING: &str = "run completed with warnings";

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn truncate(raw: &str) -> String {
    match raw.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => format!("{}...", &raw[..idx]),
        None => raw.to_string(),
    }
}

fn detail(messages: &[String]) -> Vec<String> {
    messages.iter().map(|m| escape_html(&truncate(m))).collect()
}

fn generic(messages: &[String], placeholder: &str) -> Vec<String> {
    if messages.is_empty() {
        Vec::new()
    } else {
        vec![placeholder.to_string()]
    }
}

pub(super) fn errors_for(caller: Caller, errors: &[String]) -> Vec<String> {
    match caller {
        Caller::Authenticated => detail(errors),
        Caller::Anonymous => generic(errors, GENERIC_FAILURE),
    }
}

pub(super) fn warnings_for(caller: Caller, warnings: &[String]) -> Vec<String> {
    match caller {
        Caller::Authenticated => detail(warnings),
        Caller::Anonymous => generic(warnings, GENERIC_WARNING),
    }
}
