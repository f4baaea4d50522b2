// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims.
//!
//! [`TokenClaims`] is the wire shape of a token payload. [`Claims`] is the
//! checked, immutable form handed out after verification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ValidationFailure;
use super::scopes::ScopeSet;

/// A claim that may be a single string or an array of strings.
///
/// `aud` is either per RFC 7519; Azure AD sends `scp` as a space-delimited
/// string while other providers send an array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Claims as they appear in the token payload.
///
/// Fields are optional here so that a missing claim is reported by
/// [`Claims::from_token_claims`] rather than as a JSON error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    /// Subject
    #[serde(default)]
    pub sub: Option<String>,
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience
    #[serde(default)]
    pub aud: Option<OneOrMany>,
    /// Expiration (Unix seconds)
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at (Unix seconds)
    #[serde(default)]
    pub iat: Option<i64>,
    /// Not before (Unix seconds)
    #[serde(default)]
    pub nbf: Option<i64>,
    /// OAuth2 space-delimited scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Azure AD delegated scopes
    #[serde(default)]
    pub scp: Option<OneOrMany>,
    /// Azure AD application roles
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl TokenClaims {
    /// Union of `scope`, `scp` and `roles`.
    fn granted_scopes(&self) -> ScopeSet {
        let mut scopes = ScopeSet::new();
        if let Some(scope) = &self.scope {
            scopes.extend(scope.split_whitespace());
        }
        if let Some(scp) = &self.scp {
            for value in scp.clone().into_vec() {
                scopes.extend(value.split_whitespace().map(str::to_string));
            }
        }
        if let Some(roles) = &self.roles {
            scopes.extend(roles.iter().cloned());
        }
        scopes
    }
}

/// Verified claims of a bearer token.
///
/// `issued_at <= expires_at` always holds. The subject is redacted in
/// `Debug` output.
///
/// Only [`TokenVerifier`](super::TokenVerifier) produces values of this type;
/// other crates cannot build one:
///
/// ```compile_fail
/// use bearer_gate::auth::{Claims, ScopeSet};
///
/// let now = chrono::Utc::now();
/// let forged = Claims::new("admin", "issuer", vec![], now, now, ScopeSet::parse("admin"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    subject: String,
    issuer: String,
    audience: Vec<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    scopes: ScopeSet,
}

impl Claims {
    /// Build claims, enforcing the structural invariants.
    ///
    /// # Errors
    ///
    /// `MalformedToken` if the subject is empty or `issued_at > expires_at`.
    pub(crate) fn new(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        audience: Vec<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        scopes: ScopeSet,
    ) -> Result<Self, ValidationFailure> {
        let subject = subject.into();
        if subject.is_empty() || issued_at > expires_at {
            return Err(ValidationFailure::MalformedToken);
        }
        Ok(Self {
            subject,
            issuer: issuer.into(),
            audience,
            issued_at,
            expires_at,
            scopes,
        })
    }

    /// Check a decoded payload and convert it.
    ///
    /// `sub`, `exp` and `iat` are required. A missing `iss` or `aud` is
    /// allowed here and rejected later by the issuer and audience checks.
    pub(crate) fn from_token_claims(raw: TokenClaims) -> Result<Self, ValidationFailure> {
        let scopes = raw.granted_scopes();
        let (Some(subject), Some(exp), Some(iat)) = (raw.sub, raw.exp, raw.iat) else {
            return Err(ValidationFailure::MalformedToken);
        };
        let expires_at = timestamp(exp)?;
        let issued_at = timestamp(iat)?;
        let audience = raw.aud.map(OneOrMany::into_vec).unwrap_or_default();

        Self::new(
            subject,
            raw.iss.unwrap_or_default(),
            audience,
            issued_at,
            expires_at,
            scopes,
        )
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, ValidationFailure> {
    DateTime::from_timestamp(secs, 0).ok_or(ValidationFailure::MalformedToken)
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}
