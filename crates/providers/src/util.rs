//! Shared utility functions for provider adapters.

use sa_domain::config::AuthConfig;
use sa_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve the API key for a provider from its [`AuthConfig`].
///
/// `AuthMode::ApiKey` reads `auth.env`; `AuthMode::None` resolves to an
/// empty string (used for local endpoints that don't require auth).
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    use sa_domain::config::AuthMode;

    match auth.mode {
        AuthMode::None => Ok(String::new()),
        AuthMode::ApiKey => {
            let env_var = auth.env.as_deref().ok_or_else(|| {
                Error::Auth("auth mode is api_key but no 'env' var name is configured".into())
            })?;
            std::env::var(env_var).map_err(|_| {
                Error::Auth(format!(
                    "environment variable '{env_var}' not set or not valid UTF-8"
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::AuthMode;

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "SA_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: Some(var_name.into()),
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result, "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: Some("SA_TEST_NONEXISTENT_VAR_8888".into()),
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("SA_TEST_NONEXISTENT_VAR_8888"));
    }

    #[test]
    fn resolve_api_key_no_env_configured() {
        let auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: None,
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("no 'env' var name"));
    }

    #[test]
    fn resolve_api_key_none_mode_is_empty() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            env: None,
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "");
    }
}
