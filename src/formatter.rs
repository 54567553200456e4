//! Link markup embedded in finding details.
//!
//! A link is written `{text|path}`; consumers render it as a hyperlink to
//! `path`. Entity paths look like `/files/ENCFF001ABC/`.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Display;

lazy_static! {
    static ref PATH_TAIL: Option<Regex> = Regex::new(r"([^/]+)/?$").ok();
}

pub fn audit_link(text: &str, path: &str) -> String {
    format!("{{{text}|{path}}}")
}

/// Last non-empty segment of an entity path, which for accessioned
/// entities is the accession.
pub fn path_to_text(path: &str) -> String {
    PATH_TAIL
        .as_ref()
        .and_then(|re| re.captures(path))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// `audit_link(path_to_text(path), path)`
pub fn entity_link(path: &str) -> String {
    audit_link(&path_to_text(path), path)
}

pub fn entity_links<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    paths.into_iter().map(entity_link).collect::<Vec<_>>().join(", ")
}

/// `[a, b, c]`
pub fn bracketed<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    let inner = items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{inner}]")
}
