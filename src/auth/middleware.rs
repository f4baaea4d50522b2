// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Attach [`require_scopes`] to a router subtree to authenticate every
//! request before the handler runs. On success the
//! [`AuthenticatedContext`](super::AuthenticatedContext) is inserted into the
//! request extensions, where the [`Auth`](super::Auth) extractor picks it up.
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/keys", get(list_keys))
//!     .layer(axum::middleware::from_fn_with_state(
//!         RequireScopes::new(gate.clone(), ScopeSet::parse("admin")),
//!         require_scopes,
//!     ));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::gate::AuthGate;
use super::scopes::ScopeSet;
use crate::error::render_denial;

/// Middleware state: the gate plus the scopes this subtree requires.
#[derive(Clone)]
pub struct RequireScopes {
    gate: Arc<AuthGate>,
    required: Arc<ScopeSet>,
}

impl RequireScopes {
    pub fn new(gate: Arc<AuthGate>, required: ScopeSet) -> Self {
        Self {
            gate,
            required: Arc::new(required),
        }
    }

    /// Any valid token is enough.
    pub fn authenticated(gate: Arc<AuthGate>) -> Self {
        Self::new(gate, ScopeSet::new())
    }

    pub fn required(&self) -> &ScopeSet {
        &self.required
    }
}

/// Authenticate the request and check its scopes, or answer with a problem.
pub async fn require_scopes(
    State(config): State<RequireScopes>,
    mut request: Request,
    next: Next,
) -> Response {
    match config.gate.handle(request.headers(), &config.required).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(denial) => render_denial(&denial).into_response(),
    }
}
