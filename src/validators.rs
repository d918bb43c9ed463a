/// Input validators for the authentication endpoints.
///
/// Length limits are enforced before format checks so oversized payloads
/// are rejected cheaply.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_NAME_LENGTH: usize = 100;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();
}

/// Validates and normalizes an email address. Returns the trimmed,
/// lowercased value on success.
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }
    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat(
            "email has invalid format".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// Validates a display name: non-empty, bounded, no control characters.
pub fn is_valid_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("name".to_string()));
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("name".to_string(), MAX_NAME_LENGTH));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFormat(
            "name contains invalid characters".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_emails() {
        for email in ["user@example.com", "a.b+tag@sub.domain.org", "x_y@host.io"] {
            assert!(is_valid_email(email).is_ok(), "should accept {}", email);
        }
    }

    #[test]
    fn rejects_malformed_emails() {
        for email in ["notanemail", "user@", "@example.com", "user@@example.com", ""] {
            assert!(is_valid_email(email).is_err(), "should reject {:?}", email);
        }
    }

    #[test]
    fn normalizes_email_case_and_whitespace() {
        let email = is_valid_email("  User@Example.COM ").unwrap();
        assert_eq!(email, "user@example.com");
    }

    #[test]
    fn rejects_overlong_email() {
        let local = "a".repeat(250);
        let email = format!("{}@example.com", local);
        assert!(is_valid_email(&email).is_err());
    }

    #[test]
    fn name_rules() {
        assert!(is_valid_name("Ada Lovelace").is_ok());
        assert!(is_valid_name("").is_err());
        assert!(is_valid_name("   ").is_err());
        assert!(is_valid_name("bad\u{0007}name").is_err());
        assert!(is_valid_name(&"x".repeat(101)).is_err());
    }
}
