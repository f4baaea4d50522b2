// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Caller identity endpoint.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, AuthenticatedContext, Principal};

/// Response for GET /v1/me
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub principal: Principal,
    /// Token issuer
    pub issuer: String,
    /// When the presented token expires
    pub expires_at: DateTime<Utc>,
}

impl From<AuthenticatedContext> for MeResponse {
    fn from(context: AuthenticatedContext) -> Self {
        Self {
            issuer: context.claims.issuer().to_string(),
            expires_at: context.claims.expires_at(),
            principal: context.principal,
        }
    }
}

/// Get the authenticated caller's identity and scopes.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Identity",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token", body = crate::error::Problem),
    )
)]
pub async fn get_me(Auth(context): Auth) -> Json<MeResponse> {
    Json(context.into())
}
