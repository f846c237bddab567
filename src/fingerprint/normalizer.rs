use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// Strings and comments are matched in one scan. Strings may span lines.
static LITERAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"[^"]*"|'[^']*'|/\*.*?\*/|//[^\n]*"#).expect("literal pattern")
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));
static FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\s+([A-Za-z0-9_$]+)\s*\(").expect("function pattern"));
static VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bvar\s+([A-Za-z0-9_$]+)\s*=").expect("var pattern"));
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]+\b").expect("number pattern"));

/// Canonical form of a script body.
///
/// Comments and formatting are dropped, string literals keep only their
/// delimiters and every standalone integer becomes `0`. Identifiers and
/// keywords survive untouched. Applying it twice gives the same result.
pub fn normalize(body: &str) -> String {
    let text = LITERAL_RE.replace_all(body, |caps: &Captures| {
        let matched = &caps[0];
        match matched.as_bytes()[0] {
            quote @ (b'"' | b'\'') => {
                let quote = char::from(quote);
                format!("{quote}{quote}")
            }
            _ => String::new(),
        }
    });
    let text = WHITESPACE_RE.replace_all(text.trim(), " ");
    let text = FUNCTION_RE.replace_all(&text, "function ${1}(");
    let text = VAR_RE.replace_all(&text, "var ${1} =");
    NUMBER_RE.replace_all(&text, "0").into_owned()
}
