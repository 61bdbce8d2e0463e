//! Hostname pattern construction
//!
//! Directive conditions are regular expressions over the full request URL.
//! The pattern built here matches the hostname itself and any subdomain, with
//! an optional port, and only when the authority ends right after it.

/// Characters with special meaning in the engine's regex dialect.
const REGEX_METACHARACTERS: &[char] = &[
    '\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}',
];

const PATTERN_PREFIX: &str = r"^https?://([a-z0-9-]+\.)*";
const PATTERN_SUFFIX: &str = r"(?::\d+)?(?:/|$).*";

/// Backslash-escape every regex metacharacter in `input`.
pub fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        if REGEX_METACHARACTERS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Anchored pattern matching `hostname` or any of its subdomains as the
/// authority of an http/https URL.
///
/// `hostname` is expected to be normalized already (see
/// [`crate::validate::validate_hostname`]).
pub fn host_pattern(hostname: &str) -> String {
    let escaped = escape_regex(hostname);
    let mut pattern =
        String::with_capacity(PATTERN_PREFIX.len() + escaped.len() + PATTERN_SUFFIX.len());
    pattern.push_str(PATTERN_PREFIX);
    pattern.push_str(&escaped);
    pattern.push_str(PATTERN_SUFFIX);
    pattern
}
