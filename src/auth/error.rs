// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication failures and denial outcomes.
//!
//! Nothing here knows about HTTP. Rendering a [`DenialOutcome`] into a
//! response is the job of [`crate::error`].

use std::fmt;

use super::scopes::ScopeSet;

/// Why a bearer token failed verification.
///
/// Every variant is terminal for the verification attempt that produced it.
/// The variant is for logs only; callers are told "unauthenticated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ValidationFailure {
    /// Not a structurally valid JWT, or required claims are missing
    #[error("token is malformed")]
    MalformedToken,
    /// Signature does not verify with the resolved key
    #[error("token signature is invalid")]
    SignatureInvalid,
    /// `exp` is in the past beyond the skew tolerance
    #[error("token has expired")]
    Expired,
    /// `nbf` is in the future beyond the skew tolerance
    #[error("token is not yet valid")]
    NotYetValid,
    /// `iss` is not the trusted issuer
    #[error("token issuer is not trusted")]
    IssuerMismatch,
    /// `aud` shares no value with the accepted audiences
    #[error("token audience is not accepted")]
    AudienceMismatch,
    /// No signing key matches the token's key id
    #[error("no signing key matches the token")]
    KeyNotFound,
}

impl ValidationFailure {
    /// Stable machine-readable code, used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationFailure::MalformedToken => "malformed_token",
            ValidationFailure::SignatureInvalid => "invalid_signature",
            ValidationFailure::Expired => "token_expired",
            ValidationFailure::NotYetValid => "token_not_yet_valid",
            ValidationFailure::IssuerMismatch => "invalid_issuer",
            ValidationFailure::AudienceMismatch => "invalid_audience",
            ValidationFailure::KeyNotFound => "no_matching_key",
        }
    }
}

/// Coarse class of a denial, the only thing surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialKind {
    /// Caller could not be identified (HTTP 401)
    Unauthenticated,
    /// Caller was identified but lacks privileges (HTTP 403)
    Forbidden,
}

/// Internal detail attached to a denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialDetail {
    /// No `Authorization` header
    MissingCredentials,
    /// Header present but not `Bearer <token>`
    InvalidAuthorizationHeader,
    /// Token failed verification
    Validation(ValidationFailure),
    /// Token verified but the route needs scopes it does not grant
    InsufficientScope { missing: ScopeSet },
}

/// Result of a rejected request, handed to the error renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialOutcome {
    kind: DenialKind,
    detail: DenialDetail,
}

impl DenialOutcome {
    pub fn missing_credentials() -> Self {
        Self {
            kind: DenialKind::Unauthenticated,
            detail: DenialDetail::MissingCredentials,
        }
    }

    pub fn invalid_authorization_header() -> Self {
        Self {
            kind: DenialKind::Unauthenticated,
            detail: DenialDetail::InvalidAuthorizationHeader,
        }
    }

    pub fn insufficient_scope(missing: ScopeSet) -> Self {
        Self {
            kind: DenialKind::Forbidden,
            detail: DenialDetail::InsufficientScope { missing },
        }
    }

    pub fn kind(&self) -> DenialKind {
        self.kind
    }

    pub fn detail(&self) -> &DenialDetail {
        &self.detail
    }

    /// Reason code for logs. Never sent to the caller.
    pub fn reason_code(&self) -> &'static str {
        match &self.detail {
            DenialDetail::MissingCredentials => "missing_auth_header",
            DenialDetail::InvalidAuthorizationHeader => "invalid_auth_header",
            DenialDetail::Validation(failure) => failure.code(),
            DenialDetail::InsufficientScope { .. } => "insufficient_scope",
        }
    }
}

impl From<ValidationFailure> for DenialOutcome {
    fn from(failure: ValidationFailure) -> Self {
        Self {
            kind: DenialKind::Unauthenticated,
            detail: DenialDetail::Validation(failure),
        }
    }
}

impl fmt::Display for DenialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            DenialDetail::MissingCredentials => write!(f, "Authorization header is required"),
            DenialDetail::InvalidAuthorizationHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            DenialDetail::Validation(failure) => write!(f, "{failure}"),
            DenialDetail::InsufficientScope { missing } => {
                write!(f, "missing required scopes: {missing}")
            }
        }
    }
}

impl std::error::Error for DenialOutcome {}
