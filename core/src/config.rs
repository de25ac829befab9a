//! Environment-variable configuration loading for [`AuthConfig`].
//!
//! No implicit global state: this is a plain function a caller opts into at
//! startup, not a lazily-initialized singleton.

use secrecy::SecretString;

use crate::types::AuthConfig;

/// Raised by [`AuthConfig::from_env`] when a required variable is missing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    MissingVar(&'static str),
}

impl AuthConfig {
    /// Build an [`AuthConfig`] from `TENANT_ID`, `CLIENT_ID`, `CLIENT_SECRET`
    /// and `MAILBOX_ADDRESS`. Secrets are expected to already be staged into
    /// the process environment by the host (e.g. from a secret manager); this
    /// function does not read or write any file itself.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            tenant_id: required_var("TENANT_ID")?,
            client_id: required_var("CLIENT_ID")?,
            client_secret: SecretString::from(required_var("CLIENT_SECRET")?),
            default_sender: required_var("MAILBOX_ADDRESS")?,
        })
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_reports_its_name() {
        std::env::remove_var("TENANT_ID_MISSING_FOR_TEST");
        let err = required_var("TENANT_ID_MISSING_FOR_TEST").unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("TENANT_ID_MISSING_FOR_TEST")));
    }
}
