//! Configuration validation support

use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Trait for validating configuration values
pub trait ValidateConfig: Serialize + for<'de> Deserialize<'de> {
    /// Validate the configuration
    ///
    /// Returns Ok(()) if valid, or an error describing what's wrong
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Common validation helpers
pub mod validators {
    use config::ConfigError;

    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("{field}: cannot be empty")));
        }
        Ok(())
    }

    /// Validate URL format
    pub fn validate_url(url: &str, field: &str) -> Result<(), ConfigError> {
        url::Url::parse(url)
            .map_err(|e| ConfigError::Message(format!("{field}: invalid URL - {e}")))?;
        Ok(())
    }

    /// Validate that an endpoint path is absolute
    pub fn validate_path(path: &str, field: &str) -> Result<(), ConfigError> {
        if !path.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "{field}: must start with '/'"
            )));
        }
        Ok(())
    }

    /// Validate email format (basic check)
    pub fn validate_email(email: &str, field: &str) -> Result<(), ConfigError> {
        if !email.contains('@') || email.split('@').count() != 2 {
            return Err(ConfigError::Message(format!(
                "{field}: invalid email format"
            )));
        }
        Ok(())
    }

    /// Validate that a value is within range
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(ConfigError::Message(format!(
                "{field}: must be between {min} and {max}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validators::*;

    #[test]
    fn test_validators() {
        assert!(validate_not_empty("x", "f").is_ok());
        assert!(validate_not_empty("  ", "f").is_err());
        assert!(validate_url("https://shop.example.com/api", "f").is_ok());
        assert!(validate_url("shop.example.com", "f").is_err());
        assert!(validate_path("/refresh", "f").is_ok());
        assert!(validate_path("refresh", "f").is_err());
        assert!(validate_email("a@b.c", "f").is_ok());
        assert!(validate_email("a@@b", "f").is_err());
        assert!(validate_range(5, 1, 10, "f").is_ok());
        assert!(validate_range(0, 1, 10, "f").is_err());
    }
}
