//! Input validators.
//!
//! Two layers: generic predicate validators that produce a formatted
//! `AethonxError::Validation`, and recon-specific validators for the value
//! shapes sources emit (domains, IPs, URLs, emails, hashes, ports).

use std::net::IpAddr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AethonxError;

// ---------------------------------------------------------------------------
// Predicate validators
// ---------------------------------------------------------------------------

pub fn required_string(field: &str, value: &str) -> Result<(), AethonxError> {
    if value.trim().is_empty() {
        return Err(AethonxError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

pub fn positive_int(field: &str, value: i64) -> Result<(), AethonxError> {
    if value <= 0 {
        return Err(AethonxError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(())
}

pub fn non_negative_int(field: &str, value: i64) -> Result<(), AethonxError> {
    if value < 0 {
        return Err(AethonxError::Validation(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    Ok(())
}

pub fn int_range(field: &str, value: i64, min: i64, max: i64) -> Result<(), AethonxError> {
    if value < min || value > max {
        return Err(AethonxError::Validation(format!(
            "{field} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

pub fn positive_duration(field: &str, value: Duration) -> Result<(), AethonxError> {
    if value.is_zero() {
        return Err(AethonxError::Validation(format!(
            "{field} must be a positive duration"
        )));
    }
    Ok(())
}

pub fn non_empty_slice<T>(field: &str, value: &[T]) -> Result<(), AethonxError> {
    if value.is_empty() {
        return Err(AethonxError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

pub fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), AethonxError> {
    if !allowed.contains(&value) {
        return Err(AethonxError::Validation(format!(
            "{field} must be one of {allowed:?}, got {value:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Value validators
// ---------------------------------------------------------------------------

static DOMAIN_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("valid regex")
});

static HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]+$").expect("valid regex"));

/// Trim whitespace, lowercase, and strip a trailing dot.
pub fn normalize_domain(input: &str) -> String {
    input.trim().to_ascii_lowercase().trim_end_matches('.').to_string()
}

/// DNS name: at least two labels, each 1-63 chars, no leading/trailing
/// hyphens, 253 chars total. Wildcard prefixes are not valid domains.
pub fn is_valid_domain(input: &str) -> bool {
    let domain = normalize_domain(input);
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().all(|label| DOMAIN_LABEL.is_match(label))
}

pub fn is_valid_ip(input: &str) -> bool {
    input.trim().parse::<IpAddr>().is_ok()
}

/// http(s) URL with a host.
pub fn is_valid_url(input: &str) -> bool {
    match url::Url::parse(input.trim()) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn is_valid_email(input: &str) -> bool {
    EMAIL.is_match(&input.trim().to_ascii_lowercase())
}

/// MD5, SHA-1, or SHA-256 hex digest.
pub fn is_valid_hash(input: &str) -> bool {
    let h = input.trim().to_ascii_lowercase();
    matches!(h.len(), 32 | 40 | 64) && HEX.is_match(&h)
}

pub fn is_valid_port(value: i64) -> bool {
    (1..=65535).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_format_errors() {
        assert!(required_string("name", "x").is_ok());
        let err = required_string("name", "  ").unwrap_err();
        assert!(err.to_string().contains("name"));

        assert!(positive_int("threads", 4).is_ok());
        assert!(positive_int("threads", 0).is_err());
        assert!(non_negative_int("retries", 0).is_ok());
        assert!(int_range("priority", 5, 0, 10).is_ok());
        assert!(int_range("priority", 11, 0, 10).is_err());
        assert!(positive_duration("timeout", Duration::from_secs(1)).is_ok());
        assert!(positive_duration("timeout", Duration::ZERO).is_err());
        assert!(non_empty_slice("targets", &[1]).is_ok());
        assert!(non_empty_slice::<i32>("targets", &[]).is_err());
        assert!(one_of("mode", "passive", &["passive", "active"]).is_ok());
        assert!(one_of("mode", "loud", &["passive", "active"]).is_err());
    }

    #[test]
    fn domain_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("Sub.Example.COM."));
        assert!(is_valid_domain("a-b.example.co.uk"));
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("*.example.com"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain(""));
    }

    #[test]
    fn normalize_lowers_and_trims() {
        assert_eq!(normalize_domain("  WWW.Example.COM. "), "www.example.com");
    }

    #[test]
    fn ip_url_email_hash_port() {
        assert!(is_valid_ip("192.168.0.1"));
        assert!(is_valid_ip("2001:db8::1"));
        assert!(!is_valid_ip("999.1.1.1"));

        assert!(is_valid_url("https://example.com/path"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("not a url"));

        assert!(is_valid_email("User@Example.com"));
        assert!(!is_valid_email("user@"));

        assert!(is_valid_hash("d41d8cd98f00b204e9800998ecf8427e")); // md5
        assert!(is_valid_hash(&"a".repeat(64))); // sha256
        assert!(!is_valid_hash("xyz"));

        assert!(is_valid_port(443));
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(70000));
    }
}
