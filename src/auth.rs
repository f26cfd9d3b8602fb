//! Authentication handling for the Letta API client.
//!
//! The homeserver side uses per-account access tokens obtained through
//! login and is handled by [`crate::matrix::HomeserverClient`]; this module
//! only covers the bearer-token auth the Letta API expects.

use crate::error::{BridgeError, BridgeResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::fmt;

/// Authentication configuration for the Letta client.
///
/// Supports bearer token authentication (Letta Cloud or a token-protected
/// self-hosted server) and no authentication (local development servers).
#[derive(Clone, Debug, Default)]
pub enum AuthConfig {
    /// No authentication (for local servers).
    #[default]
    None,
    /// Bearer token authentication.
    Bearer {
        /// The bearer token.
        token: String,
    },
}

impl AuthConfig {
    /// Create a new bearer token authentication configuration.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Create a new no-authentication configuration.
    pub fn none() -> Self {
        Self::None
    }

    /// Apply authentication to HTTP headers.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Auth`] if the token cannot be converted to a
    /// valid header value.
    pub fn apply_to_headers(&self, headers: &mut HeaderMap) -> BridgeResult<()> {
        match self {
            Self::None => {}
            Self::Bearer { token } => {
                let auth_value = format!("Bearer {token}");
                let header_value = HeaderValue::from_str(&auth_value)
                    .map_err(|_| BridgeError::auth("Invalid bearer token format"))?;
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        Ok(())
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Bearer { .. })
    }

    /// Validate the authentication configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Auth`] if the configuration is invalid.
    pub fn validate(&self) -> BridgeResult<()> {
        match self {
            Self::None => Ok(()),
            Self::Bearer { token } => {
                if token.trim().is_empty() {
                    return Err(BridgeError::auth("Bearer token cannot be empty"));
                }
                if token.contains('\n') || token.contains('\r') {
                    return Err(BridgeError::auth("Bearer token cannot contain newlines"));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "No authentication"),
            Self::Bearer { .. } => write!(f, "Bearer token authentication"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    #[test]
    fn test_auth_config_creation() {
        let auth = AuthConfig::bearer("test-token");
        assert!(auth.is_authenticated());

        let auth = AuthConfig::none();
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn test_apply_to_headers() {
        let mut headers = HeaderMap::new();

        let auth = AuthConfig::bearer("test-token");
        auth.apply_to_headers(&mut headers).unwrap();

        let auth_header = headers.get(AUTHORIZATION).unwrap();
        assert_eq!(auth_header.to_str().unwrap(), "Bearer test-token");

        let mut headers = HeaderMap::new();
        let auth = AuthConfig::none();
        auth.apply_to_headers(&mut headers).unwrap();
        assert!(!headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_validation() {
        assert!(AuthConfig::bearer("valid-token").validate().is_ok());
        assert!(AuthConfig::bearer("").validate().is_err());
        assert!(AuthConfig::bearer("token\nwith\nnewlines")
            .validate()
            .is_err());
        assert!(AuthConfig::none().validate().is_ok());
    }

    #[test]
    fn test_display_never_leaks_token() {
        let auth = AuthConfig::bearer("super-secret");
        assert_eq!(auth.to_string(), "Bearer token authentication");
        assert!(!auth.to_string().contains("super-secret"));
    }
}
