//! Rule validation
//!
//! Validation never panics and never aborts a batch: every check returns a
//! [`ValidationError`] value and the caller decides whether to skip the rule
//! (bulk compilation) or show the message (interactive edit).

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::types::{RawRule, Rule};

/// Machine-readable validation failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingField,
    EmptyHostname,
    InvalidHostnameCharacter,
    TooFewLabels,
    InvalidLabel,
    EmptyUrl,
    InvalidUrl,
    UnsupportedScheme,
    MissingHost,
    SelfRedirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("hostname is empty")]
    EmptyHostname,

    #[error("hostname '{hostname}' contains invalid character {character:?}")]
    InvalidHostnameCharacter { hostname: String, character: char },

    #[error("hostname '{0}' must have at least two labels")]
    TooFewLabels(String),

    #[error("hostname label '{label}' in '{hostname}' is invalid")]
    InvalidLabel { hostname: String, label: String },

    #[error("target URL is empty")]
    EmptyUrl,

    #[error("target URL '{url}' is not an absolute URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("target URL scheme '{0}' is not http or https")]
    UnsupportedScheme(String),

    #[error("target URL '{0}' has no hostname")]
    MissingHost(String),

    #[error("target URL points back at '{0}' (self-redirect)")]
    SelfRedirect(String),
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::MissingField(_) => ValidationErrorKind::MissingField,
            Self::EmptyHostname => ValidationErrorKind::EmptyHostname,
            Self::InvalidHostnameCharacter { .. } => ValidationErrorKind::InvalidHostnameCharacter,
            Self::TooFewLabels(_) => ValidationErrorKind::TooFewLabels,
            Self::InvalidLabel { .. } => ValidationErrorKind::InvalidLabel,
            Self::EmptyUrl => ValidationErrorKind::EmptyUrl,
            Self::InvalidUrl { .. } => ValidationErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => ValidationErrorKind::UnsupportedScheme,
            Self::MissingHost(_) => ValidationErrorKind::MissingHost,
            Self::SelfRedirect(_) => ValidationErrorKind::SelfRedirect,
        }
    }
}

/// Characters that can never appear in a bare hostname.
const FORBIDDEN_HOST_CHARS: [char; 4] = ['/', ' ', ':', '?'];

/// Normalize and check a source hostname.
pub fn validate_hostname(input: &str) -> Result<String, ValidationError> {
    let hostname = input.trim().to_lowercase();
    if hostname.is_empty() {
        return Err(ValidationError::EmptyHostname);
    }

    if let Some(character) = hostname.chars().find(|c| FORBIDDEN_HOST_CHARS.contains(c)) {
        return Err(ValidationError::InvalidHostnameCharacter { hostname, character });
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::TooFewLabels(hostname));
    }

    if let Some(label) = labels.iter().find(|label| !is_valid_label(label)) {
        return Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            hostname,
        });
    }

    Ok(hostname)
}

#[inline]
fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

/// A checked redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTarget {
    /// Canonical serialization of the URL.
    pub url: String,
    /// Lowercase hostname of the URL.
    pub hostname: String,
}

/// Parse and check a redirect target URL.
pub fn validate_target_url(input: &str) -> Result<ValidTarget, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }

    let hostname = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_lowercase(),
        _ => return Err(ValidationError::MissingHost(trimmed.to_string())),
    };

    Ok(ValidTarget {
        url: url.to_string(),
        hostname,
    })
}

/// Validate a stored rule and produce its normalized form.
///
/// A blank or missing id is replaced by a freshly generated one.
pub fn validate_rule(raw: &RawRule) -> Result<Rule, ValidationError> {
    let hostname = raw
        .source_hostname
        .as_deref()
        .ok_or(ValidationError::MissingField("source_hostname"))?;
    let target = raw
        .target_url
        .as_deref()
        .ok_or(ValidationError::MissingField("target_url"))?;

    let source_hostname = validate_hostname(hostname)?;
    let target = validate_target_url(target)?;

    if target.hostname == source_hostname {
        return Err(ValidationError::SelfRedirect(source_hostname));
    }

    let id = match raw.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => generate_rule_id(),
    };

    Ok(Rule {
        id,
        enabled: raw.is_enabled(),
        source_hostname,
        target_url: target.url,
    })
}

/// Fresh opaque rule id.
pub fn generate_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(host: &str, target: &str) -> RawRule {
        RawRule {
            id: Some("r1".to_string()),
            enabled: json!(true),
            source_hostname: Some(host.to_string()),
            target_url: Some(target.to_string()),
        }
    }

    #[test]
    fn test_hostname_normalized() {
        assert_eq!(validate_hostname("  YouTube.COM ").unwrap(), "youtube.com");
        assert_eq!(validate_hostname("a-b.c0.io").unwrap(), "a-b.c0.io");
    }

    #[test]
    fn test_hostname_rejections() {
        let cases = [
            ("", ValidationErrorKind::EmptyHostname),
            ("   ", ValidationErrorKind::EmptyHostname),
            ("youtube.com/watch", ValidationErrorKind::InvalidHostnameCharacter),
            ("you tube.com", ValidationErrorKind::InvalidHostnameCharacter),
            ("youtube.com:443", ValidationErrorKind::InvalidHostnameCharacter),
            ("youtube.com?x", ValidationErrorKind::InvalidHostnameCharacter),
            ("localhost", ValidationErrorKind::TooFewLabels),
            ("-bad.com", ValidationErrorKind::InvalidLabel),
            ("bad-.com", ValidationErrorKind::InvalidLabel),
            ("a..com", ValidationErrorKind::InvalidLabel),
            ("under_score.com", ValidationErrorKind::InvalidLabel),
            ("example.com.", ValidationErrorKind::InvalidLabel),
        ];
        for (input, kind) in cases {
            let err = validate_hostname(input).unwrap_err();
            assert_eq!(err.kind(), kind, "input {input:?}");
        }
    }

    #[test]
    fn test_target_url() {
        let t = validate_target_url(" https://Calendar.Google.com/calendar/u/0/r ").unwrap();
        assert_eq!(t.url, "https://calendar.google.com/calendar/u/0/r");
        assert_eq!(t.hostname, "calendar.google.com");

        let t = validate_target_url("http://example.org").unwrap();
        assert_eq!(t.url, "http://example.org/");
    }

    #[test]
    fn test_target_url_rejections() {
        assert_eq!(validate_target_url("").unwrap_err().kind(), ValidationErrorKind::EmptyUrl);
        assert_eq!(
            validate_target_url("example.org/path").unwrap_err().kind(),
            ValidationErrorKind::InvalidUrl
        );
        assert_eq!(
            validate_target_url("ftp://example.org/").unwrap_err().kind(),
            ValidationErrorKind::UnsupportedScheme
        );
        assert_eq!(
            validate_target_url("javascript:alert(1)").unwrap_err().kind(),
            ValidationErrorKind::UnsupportedScheme
        );
    }

    #[test]
    fn test_rule_self_redirect() {
        let err = validate_rule(&raw("youtube.com", "https://YOUTUBE.com/feed")).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::SelfRedirect);
        assert!(err.to_string().contains("self-redirect"));
    }

    #[test]
    fn test_rule_subdomain_target_is_not_self_redirect() {
        assert!(validate_rule(&raw("youtube.com", "https://music.youtube.com/")).is_ok());
    }

    #[test]
    fn test_rule_normalized() {
        let rule = validate_rule(&raw(" Reddit.com ", "https://example.org")).unwrap();
        assert_eq!(rule.id, "r1");
        assert!(rule.enabled);
        assert_eq!(rule.source_hostname, "reddit.com");
        assert_eq!(rule.target_url, "https://example.org/");
    }

    #[test]
    fn test_rule_generates_missing_id() {
        let mut r = raw("reddit.com", "https://example.org/");
        r.id = None;
        let a = validate_rule(&r).unwrap();
        assert!(!a.id.is_empty());

        r.id = Some("  ".to_string());
        let b = validate_rule(&r).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_rule_coerces_enabled() {
        let mut r = raw("reddit.com", "https://example.org/");
        r.enabled = json!(null);
        assert!(!validate_rule(&r).unwrap().enabled);
        r.enabled = json!("yes");
        assert!(validate_rule(&r).unwrap().enabled);
    }

    #[test]
    fn test_rule_missing_fields() {
        let mut r = raw("reddit.com", "https://example.org/");
        r.target_url = None;
        assert_eq!(
            validate_rule(&r).unwrap_err(),
            ValidationError::MissingField("target_url")
        );
    }
}
