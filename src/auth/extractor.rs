// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated callers.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(ctx): Auth) -> impl IntoResponse {
//!     // ctx.principal.subject is the caller
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::gate::AuthenticatedContext;
use super::scopes::ScopeSet;
use crate::error::ApiProblem;
use crate::state::AppState;

/// Extractor for authenticated callers.
///
/// Reuses the context left by the [`require_scopes`](super::require_scopes)
/// middleware when present. Otherwise runs the gate with no required
/// scopes, so any valid token is accepted.
pub struct Auth(pub AuthenticatedContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = ApiProblem;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<AuthenticatedContext>().cloned() {
            return Ok(Auth(context));
        }

        let context = state
            .gate
            .handle(&parts.headers, &ScopeSet::new())
            .await
            .map_err(ApiProblem::from)?;
        parts.extensions.insert(context.clone());
        Ok(Auth(context))
    }
}

/// Optional authentication extractor.
///
/// Yields `None` instead of rejecting when the caller is not authenticated.
pub struct OptionalAuth(pub Option<AuthenticatedContext>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(context)) => Ok(OptionalAuth(Some(context))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
