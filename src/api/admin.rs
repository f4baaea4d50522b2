// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only endpoints for key cache inspection.
//!
//! Mounted behind [`require_scopes`](crate::auth::require_scopes) with the
//! configured admin scope.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{auth::Auth, state::AppState};

/// Response for GET /v1/admin/keys
#[derive(Debug, Serialize, ToSchema)]
pub struct SigningKeysResponse {
    /// Key ids currently cached, sorted.
    pub key_ids: Vec<String>,
    /// Whether the cached set is within its TTL.
    pub fresh: bool,
}

/// List the signing key ids in the cache.
#[utoipa::path(
    get,
    path = "/v1/admin/keys",
    tag = "Admin",
    security(("bearer" = ["admin"])),
    responses(
        (status = 200, description = "Cached signing keys", body = SigningKeysResponse),
        (status = 401, description = "Unauthorized - invalid or missing token", body = crate::error::Problem),
        (status = 403, description = "Forbidden - admin scope required", body = crate::error::Problem),
    )
)]
pub async fn list_signing_keys(
    Auth(context): Auth,
    State(state): State<AppState>,
) -> Json<SigningKeysResponse> {
    let key_ids = match state.keys.snapshot().await {
        Some(set) => set.key_ids().into_iter().map(str::to_string).collect(),
        None => Vec::new(),
    };
    let fresh = state.keys.is_cached().await;

    tracing::info!(
        target: "auth.gate",
        key_count = key_ids.len(),
        admin_scopes = %context.principal.scopes,
        "Admin listed signing keys"
    );

    Json(SigningKeysResponse { key_ids, fresh })
}
