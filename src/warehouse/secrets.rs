//! Secret lookup for warehouse credentials.

use crate::error::{LoaderError, Result};

/// Source of credentials resolved at run time
pub trait SecretProvider: Send + Sync {
    fn secret(&self, name: &str) -> Result<String>;
}

/// Reads secrets from environment variables (populated by the orchestrator
/// or a `.env` file)
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn secret(&self, name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => Err(LoaderError::Secret {
                name: name.to_string(),
                reason: "variable is empty".to_string(),
            }),
            Err(e) => Err(LoaderError::Secret {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
