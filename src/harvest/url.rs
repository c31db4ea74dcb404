use regex::Regex;
use std::sync::OnceLock;

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r";jsessionid=[a-zA-Z;0-9]*").expect("session id pattern is valid")
    })
}

/// Canonical form of a URL used as the dedup key within a collection.
///
/// Java backends append a `;jsessionid=...` token that changes between
/// requests, and fragments never change what the server returns, so both are
/// dropped. Other query parameters are kept as they select the content.
pub fn clean_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = match trimmed.find('#') {
        Some(index) => &trimmed[..index],
        None => trimmed,
    };
    session_id_pattern()
        .replace_all(without_fragment, "")
        .into_owned()
}
