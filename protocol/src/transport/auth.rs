//! # TLS & Authentication Hooks
//!
//! Configuration-level hooks only: the core carries credentials to the
//! connectors and stamps headers, but identity providers and certificate
//! issuance live outside the substrate.

use serde::{Deserialize, Serialize};

/// TLS parameters for an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    /// Path to the client certificate (PEM).
    pub cert_path: Option<String>,
    /// Path to the client private key (PEM).
    pub key_path: Option<String>,
    /// Path to the CA bundle used to verify the peer.
    pub ca_path: Option<String>,
    /// Strict peer verification. Lax mode is for lab setups only.
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            ca_path: None,
            verify_peer: true,
        }
    }
}

/// Outbound authentication hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// Static bearer token.
    BearerToken {
        /// The token presented in the Authorization header.
        token: String,
    },
    /// Mutual TLS: the client certificate in [`TlsConfig`] is the identity.
    ClientCertificate,
    /// OAuth2-style bearer: an access token minted by an external flow.
    Oauth2 {
        /// The access token presented as a bearer credential.
        access_token: String,
    },
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

impl AuthConfig {
    /// The `Authorization` header value this hook produces, if any.
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            AuthConfig::None | AuthConfig::ClientCertificate => None,
            AuthConfig::BearerToken { token } => Some(format!("Bearer {}", token)),
            AuthConfig::Oauth2 { access_token } => Some(format!("Bearer {}", access_token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_variants_produce_headers() {
        assert_eq!(AuthConfig::None.authorization_header(), None);
        assert_eq!(AuthConfig::ClientCertificate.authorization_header(), None);
        assert_eq!(
            AuthConfig::BearerToken {
                token: "abc".into()
            }
            .authorization_header(),
            Some("Bearer abc".into())
        );
        assert_eq!(
            AuthConfig::Oauth2 {
                access_token: "xyz".into()
            }
            .authorization_header(),
            Some("Bearer xyz".into())
        );
    }

    #[test]
    fn auth_config_wire_form_is_tagged() {
        let json = serde_json::to_string(&AuthConfig::BearerToken {
            token: "abc".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"bearer_token\""));

        let recovered: AuthConfig = serde_json::from_str("{\"type\":\"none\"}").unwrap();
        assert_eq!(recovered, AuthConfig::None);
    }

    #[test]
    fn tls_defaults_to_strict_verification() {
        let tls = TlsConfig::default();
        assert!(tls.verify_peer);
    }
}
