// User Directory: users are keyed by normalized email and created lazily
// on first sign-in or first API touch.

pub mod directory;

/// Trims and lowercases an email. Idempotent.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Shape check only: one `@`, a non-empty local part, a dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// Normalizes and validates in one step, naming the offending field on failure.
pub fn require_email(raw: Option<&str>, field: &str) -> Result<String, crate::errors::AppError> {
    let email = normalize_email(raw.unwrap_or_default());
    if email.is_empty() {
        return Err(crate::errors::AppError::Validation(format!("{field} is required")));
    }
    if !is_valid_email(&email) {
        return Err(crate::errors::AppError::Validation(format!(
            "{field} is not a valid email address"
        )));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Agent@Brokerage.COM \n"), "agent@brokerage.com");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["A@X.com", " b@y.org ", "MiXeD.Case+tag@Example.Net", ""] {
            let once = normalize_email(raw);
            assert_eq!(normalize_email(&once), once);
            assert_eq!(once, once.to_lowercase());
            assert_eq!(once, once.trim());
        }
    }

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+homes@sub.realty.io"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a@x..com"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("a@b@x.com"));
    }

    #[test]
    fn test_require_email_names_field() {
        let err = require_email(None, "inviteeEmail").unwrap_err();
        assert!(err.to_string().contains("inviteeEmail is required"));
        let err = require_email(Some("nope"), "email").unwrap_err();
        assert!(err.to_string().contains("email is not a valid"));
        assert_eq!(require_email(Some(" A@X.com"), "email").unwrap(), "a@x.com");
    }
}
