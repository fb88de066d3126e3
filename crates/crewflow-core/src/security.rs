use std::env;

use crate::CrewflowError;

/// Wrapper around API keys so they never end up in logs or debug output.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, CrewflowError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(CrewflowError::MissingSecret(var.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_success() {
        unsafe {
            std::env::set_var("CREWFLOW_TEST_SECRET", "value");
        }
        let secret = require_env("CREWFLOW_TEST_SECRET").expect("secret should load");
        assert_eq!(secret.expose(), "value");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn require_env_missing() {
        unsafe {
            std::env::remove_var("CREWFLOW_TEST_SECRET_MISSING");
        }
        let err = require_env("CREWFLOW_TEST_SECRET_MISSING").unwrap_err();
        assert!(matches!(err, CrewflowError::MissingSecret(_)));
    }
}
