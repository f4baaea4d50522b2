// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication gate.
//!
//! Runs once per request: pull the bearer token out of the headers, verify
//! it, then check the route's required scopes. The result is either an
//! [`AuthenticatedContext`] or a [`DenialOutcome`]; turning the latter into
//! a response is left to the caller.

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::instrument;

use super::claims::Claims;
use super::error::{DenialKind, DenialOutcome};
use super::policy::{authorize, AuthorizationDecision, DenyReason, Principal};
use super::scopes::ScopeSet;
use super::verifier::BearerVerifier;

/// Identity attached to a request that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContext {
    pub principal: Principal,
    pub claims: Claims,
}

pub struct AuthGate {
    verifier: Arc<dyn BearerVerifier>,
    audiences: Vec<String>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn BearerVerifier>, audiences: Vec<String>) -> Self {
        Self {
            verifier,
            audiences,
        }
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Authenticate and authorize one request.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when the header is missing or invalid or the token
    /// fails verification. `Forbidden` when the token lacks a required
    /// scope. The verifier is not called unless a token was extracted.
    #[instrument(
        name = "auth_gate",
        skip_all,
        fields(required = %required, outcome = "start")
    )]
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        required: &ScopeSet,
    ) -> Result<AuthenticatedContext, DenialOutcome> {
        let span = tracing::Span::current();

        let token = match bearer_token(headers) {
            Ok(token) => token,
            Err(denial) => return Err(deny(&span, denial)),
        };
        span.record("outcome", "token_extracted");

        let claims = match self.verifier.verify(token, &self.audiences).await {
            Ok(claims) => claims,
            Err(failure) => return Err(deny(&span, failure.into())),
        };
        span.record("outcome", "verified");

        match authorize(&claims, required) {
            AuthorizationDecision::Allow(principal) => {
                span.record("outcome", "authorized");
                tracing::debug!(target: "auth.gate", "Request authorized");
                Ok(AuthenticatedContext { principal, claims })
            }
            AuthorizationDecision::Deny(DenyReason::InsufficientScope { missing }) => {
                Err(deny(&span, DenialOutcome::insufficient_scope(missing)))
            }
        }
    }
}

fn deny(span: &tracing::Span, denial: DenialOutcome) -> DenialOutcome {
    let outcome = match denial.kind() {
        DenialKind::Unauthenticated => "unauthenticated",
        DenialKind::Forbidden => "forbidden",
    };
    span.record("outcome", outcome);
    tracing::info!(
        target: "auth.gate",
        outcome,
        reason = denial.reason_code(),
        "Request denied"
    );
    denial
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, DenialOutcome> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(DenialOutcome::missing_credentials)?
        .to_str()
        .map_err(|_| DenialOutcome::invalid_authorization_header())?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(DenialOutcome::invalid_authorization_header)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(DenialOutcome::invalid_authorization_header());
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(DenialOutcome::invalid_authorization_header());
    }
    Ok(token)
}
