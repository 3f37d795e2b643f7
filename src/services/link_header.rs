//! Parsing of RFC 8288 style `Link` response headers used for pagination.

use reqwest::Url;

/// Relations found in one `Link` header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub first: Option<Url>,
    pub prev: Option<Url>,
    pub next: Option<Url>,
    pub last: Option<Url>,
}

impl PageLinks {
    /// Parse a header value like `<https://x/?page=2>; rel="next", <...>; rel="last"`.
    ///
    /// Entries without a URL or relation, with an unknown relation, or whose
    /// URL does not parse are ignored.
    pub fn parse(header: &str) -> Self {
        let mut links = Self::default();
        for entry in header.split(',') {
            let Some((url, rel)) = parse_entry(entry) else {
                continue;
            };
            let Ok(url) = Url::parse(url) else {
                continue;
            };
            match rel.to_ascii_lowercase().as_str() {
                "first" => links.first = Some(url),
                "prev" => links.prev = Some(url),
                "next" => links.next = Some(url),
                "last" => links.last = Some(url),
                _ => {}
            }
        }
        links
    }
}

fn parse_entry(entry: &str) -> Option<(&str, &str)> {
    let open = entry.find('<')?;
    let close = open + entry[open..].find('>')?;
    let url = entry[open + 1..close].trim();

    let params = &entry[close + 1..];
    let rel = params.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("rel") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })?;

    if url.is_empty() || rel.is_empty() {
        None
    } else {
        Some((url, rel))
    }
}
