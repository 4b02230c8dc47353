//! `Cookie` request header parsing.

use std::collections::HashMap;

/// Parses a `Cookie` header (`a=1; b=2`) into a map.
///
/// Pairs without `=` are skipped, surrounding double quotes are stripped from
/// values, and the first occurrence of a name wins.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    cookies
}
