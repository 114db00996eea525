//! Markdown front-matter parsing.

use std::collections::BTreeMap;

/// Extracts a `---`-delimited key-value header block from markdown.
///
/// Returns the parsed keys and the body with the header stripped. Documents
/// without a front-matter block return an empty map and the full text. Only
/// simple `key: value` lines are recognized; anything else inside the block
/// is ignored.
pub fn parse_front_matter(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut map = BTreeMap::new();
    let Some(rest) = text.strip_prefix("---") else {
        return (map, text);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (map, text);
    };

    let Some(end) = rest.find("\n---") else {
        return (map, text);
    };
    let header = &rest[..end];
    let mut body = &rest[end + "\n---".len()..];
    if let Some(stripped) = body.strip_prefix('\r') {
        body = stripped;
    }
    if let Some(stripped) = body.strip_prefix('\n') {
        body = stripped;
    }

    for line in header.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !key.is_empty() && !value.is_empty() {
                map.insert(key.to_owned(), value.to_owned());
            }
        }
    }
    (map, body)
}
