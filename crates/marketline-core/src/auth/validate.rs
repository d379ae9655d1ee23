//! Local input checks run before any request is sent.

use super::AuthError;

/// Length of the one-time code sent by email.
pub const OTP_LENGTH: usize = 6;

/// Minimum length accepted for a new password.
pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn require(field: &str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::validation(format!("{} is required", field)));
    }
    Ok(())
}

pub fn email(value: &str) -> Result<(), AuthError> {
    require("Email", value)?;
    let value = value.trim();
    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !value.contains(char::is_whitespace)
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    };
    if !valid {
        return Err(AuthError::validation("Enter a valid email address"));
    }
    Ok(())
}

pub fn new_password(value: &str) -> Result<(), AuthError> {
    if value.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

pub fn otp(code: &str) -> Result<(), AuthError> {
    if code.len() != OTP_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::validation(format!(
            "Verification code must be {} digits",
            OTP_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(email("ada@example.com").is_ok());
        assert!(email("  ada@shop.example.co  ").is_ok());

        assert_eq!(email("").unwrap_err().message(), "Email is required");
        assert!(email("ada").is_err());
        assert!(email("@example.com").is_err());
        assert!(email("ada@example").is_err());
        assert!(email("ada@.com").is_err());
        assert!(email("a@b@example.com").is_err());
        assert!(email("ada lovelace@example.com").is_err());
    }

    #[test]
    fn test_otp() {
        assert!(otp("123456").is_ok());
        assert!(otp("000000").is_ok());

        assert!(otp("12345").is_err());
        assert!(otp("1234567").is_err());
        assert!(otp("12a456").is_err());
        assert!(otp("").is_err());
        assert!(otp("١٢٣٤٥٦").is_err()); // non-ASCII digits
    }

    #[test]
    fn test_new_password() {
        assert!(new_password("longenough").is_ok());
        assert!(new_password("short").is_err());
    }

    #[test]
    fn test_require() {
        assert!(require("Password", "x").is_ok());
        assert_eq!(require("Password", "   ").unwrap_err().message(), "Password is required");
    }
}
