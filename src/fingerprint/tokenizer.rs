use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use log::debug;
use regex::Regex;
use url::{ParseError, Url};

/// Default length of a hex run treated as a dynamic value.
pub const DEFAULT_HEX_RUN_THRESHOLD: usize = 10;

static SCRIPT_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([A-Za-z0-9_\-]+\.js)\b").expect("script path pattern"));
static QUERY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?([^#]*)").expect("query pattern"));
static SCRIPT_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<script[^>]+src\s*=\s*["']([^"']+)["']"#).expect("script src pattern")
});

/// Extracts the structural tokens of a script reference.
///
/// Output is deduplicated and sorted by raw bytes, so two references that
/// only differ in query values or parameter order yield the same tokens.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    dynamic_value: Regex,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_HEX_RUN_THRESHOLD)
    }
}

impl Tokenizer {
    /// `hex_run_threshold` is the number of consecutive hex digits that
    /// marks a token as an embedded ID/hash/timestamp. Clamped to at least 1.
    pub fn new(hex_run_threshold: usize) -> Self {
        let threshold = hex_run_threshold.max(1);
        let dynamic_value = Regex::new(&format!("[0-9a-fA-F]{{{},}}", threshold))
            .expect("hex run pattern is always valid");
        Self { dynamic_value }
    }

    pub fn tokenize(&self, identifier: &str, body: Option<&str>) -> Vec<String> {
        let mut tokens = Vec::new();
        self.collect(identifier, &mut tokens);

        if let Some(body) = body {
            for caps in SCRIPT_SRC_RE.captures_iter(body) {
                self.collect(&caps[1], &mut tokens);
            }
        }

        let set: BTreeSet<String> = tokens
            .into_iter()
            .filter(|token| !self.is_dynamic(token))
            .collect();
        set.into_iter().collect()
    }

    pub fn is_dynamic(&self, token: &str) -> bool {
        self.dynamic_value.is_match(token)
    }

    fn collect(&self, identifier: &str, tokens: &mut Vec<String>) {
        let identifier = identifier.trim();
        if let Some(reference) = split_reference(identifier) {
            if let Some(scheme) = reference.scheme {
                tokens.push(scheme.to_string());
            }
            if let Some(host) = reference.host {
                let host = host.strip_prefix("www.").unwrap_or(host);
                if !host.is_empty() {
                    tokens.push(host.to_string());
                }
            }
            for caps in SCRIPT_PATH_RE.captures_iter(reference.path) {
                tokens.push(caps[1].to_string());
            }
        }

        for caps in QUERY_RE.captures_iter(identifier) {
            for param in caps[1].split('&') {
                let key = param.split('=').next().unwrap_or_default();
                if !key.is_empty() {
                    tokens.push(key.to_string());
                }
            }
        }
    }
}

/// Raw pieces of a script reference, sliced from the identifier text so
/// nothing is case-folded or percent-encoded.
#[derive(Debug, PartialEq, Eq)]
struct Reference<'a> {
    scheme: Option<&'a str>,
    host: Option<&'a str>,
    path: &'a str,
}

/// Absolute, protocol-relative (`//host/path`) and path-only references
/// are accepted; anything the URL parser rejects for another reason is not.
fn split_reference(identifier: &str) -> Option<Reference<'_>> {
    let (scheme, rest) = match Url::parse(identifier) {
        Ok(parsed) => match identifier.split_once(':') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(parsed.scheme()) => (Some(scheme), rest),
            _ => return None,
        },
        Err(ParseError::RelativeUrlWithoutBase) => (None, identifier),
        Err(e) => {
            debug!("Skipping structure of {:?}: {}", identifier, e);
            return None;
        }
    };

    let (host, path) = match rest.strip_prefix("//") {
        Some(after) => {
            let end = after.find(['/', '?', '#']).unwrap_or(after.len());
            (Some(host_of(&after[..end])), &after[end..])
        }
        None => (None, rest),
    };
    let path = &path[..path.find(['?', '#']).unwrap_or(path.len())];

    Some(Reference { scheme, host, path })
}

fn host_of(authority: &str) -> &str {
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.split_once(':').map_or(host, |(name, _)| name)
}

/// Tokenizes with the default dynamic-value threshold.
pub fn tokenize(identifier: &str, body: Option<&str>) -> Vec<String> {
    Tokenizer::default().tokenize(identifier, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_tag_manager_tokens() {
        let tokens = tokenize(
            "https://www.googletagmanager.com/gtm.js?id=GTM-ABC123&l=dataLayer",
            None,
        );
        assert_eq!(tokens, vec!["googletagmanager.com", "gtm.js", "https", "id", "l"]);
    }

    #[test]
    fn test_query_values_do_not_matter() {
        assert_eq!(
            tokenize("https://x.com/a.js?id=1", None),
            tokenize("https://x.com/a.js?id=2", None)
        );
        assert_eq!(
            tokenize("https://x.com/a.js?b=1&a=2", None),
            tokenize("https://x.com/a.js?a=9&b=8&a=7", None)
        );
    }

    #[test]
    fn test_hex_runs_are_dropped() {
        let tokens = tokenize("https://cdn.example.com/0123456789abcdef.js?cb=aaaaaaaaaaaaaaaa", None);
        assert_eq!(tokens, vec!["cb", "cdn.example.com", "https"]);
        assert!(!tokens.iter().any(|t| t.contains("aaaaaaaaaaaaaaaa")));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let strict = Tokenizer::new(4);
        assert!(strict.is_dynamic("beef"));
        assert!(!Tokenizer::default().is_dynamic("beef"));
        let tokens = strict.tokenize("https://x.com/a.js?cafe=1", None);
        assert_eq!(tokens, vec!["a.js", "https", "x.com"]);
    }

    #[test]
    fn test_unparseable_identifier_keeps_query_keys() {
        assert_eq!(tokenize("gtm.js?id=1&l=2", None), vec!["id", "l"]);
        assert!(tokenize("", None).is_empty());
        assert!(tokenize("plain words", None).is_empty());
    }

    #[test]
    fn test_only_script_segments_from_path() {
        let tokens = tokenize("https://x.com/static/v2/app-main_1.js/extra.css", None);
        assert_eq!(tokens, vec!["app-main_1.js", "https", "x.com"]);
        let tokens = tokenize("https://x.com/lib.jsx", None);
        assert_eq!(tokens, vec!["https", "x.com"]);
    }

    #[test]
    fn test_body_script_references_contribute() {
        let body = r#"<html><script async src="https://www.google-analytics.com/analytics.js"></script></html>"#;
        let tokens = tokenize("https://site.example/index.html", Some(body));
        assert_eq!(tokens, vec!["analytics.js", "google-analytics.com", "https", "site.example"]);
    }

    #[test]
    fn test_protocol_relative_and_path_only_references() {
        assert_eq!(
            tokenize("//cdn.example.com/lib/app.js?v=1", None),
            vec!["app.js", "cdn.example.com", "v"]
        );
        assert_eq!(tokenize("/static/app.js", None), vec!["app.js"]);

        let body = r#"<script src="//www.google-analytics.com/analytics.js"></script>"#;
        let tokens = tokenize("https://site.example/", Some(body));
        assert_eq!(tokens, vec!["analytics.js", "google-analytics.com", "https", "site.example"]);
    }

    #[test]
    fn test_host_is_taken_verbatim() {
        assert_eq!(
            tokenize("https://CDN.Example.com/app.js", None),
            vec!["CDN.Example.com", "app.js", "https"]
        );
        assert_eq!(
            split_reference("http://user@[::1]:8080/a.js?x=1#top"),
            Some(Reference { scheme: Some("http"), host: Some("[::1]"), path: "/a.js" })
        );
        assert_eq!(
            split_reference("https://cdn.example.com:443"),
            Some(Reference { scheme: Some("https"), host: Some("cdn.example.com"), path: "" })
        );
    }

    #[test]
    fn test_output_is_sorted_and_unique() {
        let tokens = tokenize("https://x.com/b.js/a.js/b.js?z=1&y=2&z=3", None);
        let mut expected = tokens.clone();
        expected.sort();
        expected.dedup();
        assert_eq!(tokens, expected);
    }
}
