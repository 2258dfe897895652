//! Challenge-response authentication.
//!
//! Requests go out with whatever authorization is already known for their
//! scope. A 401 carries a `WWW-Authenticate` challenge; [`Authenticator::respond`]
//! answers it (fetching a bearer token from the realm when asked) and the
//! request is retried once.

use std::collections::HashMap;

use base64::Engine as _;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::config::RegistryAuth;
use crate::error::{RegistryError, Result};

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// `Basic realm="..."`.
    Basic,

    /// `Bearer realm="...",service="...",scope="..."`.
    Bearer {
        /// Token endpoint.
        realm: String,
        /// Service the token is for.
        service: Option<String>,
        /// Requested access scope.
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_registry::auth::Challenge;
    ///
    /// let challenge = Challenge::parse(
    ///     r#"Bearer realm="https://auth.opcr.io/token",service="opcr.io",scope="repository:acme/policy:pull,push""#,
    /// );
    /// assert!(matches!(
    ///     challenge,
    ///     Some(Challenge::Bearer { scope: Some(s), .. }) if s == "repository:acme/policy:pull,push"
    /// ));
    /// ```
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Self::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = parse_params(rest);
        Some(Self::Bearer {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Splits `key="value",key=value` pairs. Quoted values may contain commas.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Authorization state for one registry host.
#[derive(Debug)]
pub struct Authenticator {
    credentials: RegistryAuth,
    tokens: Mutex<HashMap<String, String>>,
}

impl Authenticator {
    /// Creates an authenticator using `credentials`.
    #[must_use]
    pub fn new(credentials: RegistryAuth) -> Self {
        Self {
            credentials,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the `Authorization` value to send for `scope`, if any.
    ///
    /// A token cached for the scope wins over static credentials.
    #[must_use]
    pub fn authorization(&self, scope: &str) -> Option<String> {
        if let Some(token) = self.tokens.lock().get(scope) {
            return Some(format!("Bearer {token}"));
        }
        self.static_authorization()
    }

    /// Answers `challenge` and returns the `Authorization` value to retry with.
    ///
    /// Bearer tokens obtained from a realm are cached under `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AuthenticationFailed`] if the challenge cannot
    /// be met with the configured credentials.
    pub async fn respond(
        &self,
        http: &reqwest::Client,
        challenge: &Challenge,
        scope: &str,
    ) -> Result<String> {
        let (realm, service, requested) = match challenge {
            Challenge::Basic => {
                return self.basic().ok_or_else(|| RegistryError::AuthenticationFailed {
                    message: "registry requires basic credentials".to_string(),
                });
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => (realm, service, scope),
        };

        if let RegistryAuth::Bearer { token } = &self.credentials {
            return Ok(format!("Bearer {token}"));
        }

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = service {
            query.push(("service", service));
        }
        if let Some(requested) = requested {
            query.push(("scope", requested));
        }

        let mut request = http.get(realm).query(&query);
        if let RegistryAuth::Basic { username, password } = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        debug!(%realm, scope, "Requesting registry token");
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::AuthenticationFailed {
                message: format!("token endpoint {realm} returned {}", response.status()),
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                message: format!("token endpoint {realm} returned no token"),
            })?;

        self.tokens.lock().insert(scope.to_string(), token.clone());
        Ok(format!("Bearer {token}"))
    }

    /// Drops any cached token for `scope`.
    pub fn forget(&self, scope: &str) {
        self.tokens.lock().remove(scope);
    }

    fn static_authorization(&self) -> Option<String> {
        match &self.credentials {
            RegistryAuth::None => None,
            RegistryAuth::Basic { .. } => self.basic(),
            RegistryAuth::Bearer { token } => Some(format!("Bearer {token}")),
        }
    }

    fn basic(&self) -> Option<String> {
        match &self.credentials {
            RegistryAuth::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            _ => None,
        }
    }
}
