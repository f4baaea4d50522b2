// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scope-based authorization.
//!
//! A request is allowed when the token's granted scopes contain every scope
//! the route requires. Granting more scopes never turns an allow into a deny.

use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use super::claims::Claims;
use super::scopes::ScopeSet;

/// The authenticated caller.
#[derive(Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    /// Subject identifier from the token
    #[schema(example = "user_123")]
    pub subject: String,
    /// Scopes granted to the caller
    pub scopes: ScopeSet,
}

impl Principal {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: claims.subject().to_string(),
            scopes: claims.scopes().clone(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    InsufficientScope { missing: ScopeSet },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow(Principal),
    Deny(DenyReason),
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allow(_))
    }
}

/// Decide whether verified claims satisfy the required scopes.
///
/// Pure: the same inputs always give the same decision.
pub fn authorize(claims: &Claims, required: &ScopeSet) -> AuthorizationDecision {
    let missing = required.missing_from(claims.scopes());
    if missing.is_empty() {
        AuthorizationDecision::Allow(Principal::from_claims(claims))
    } else {
        AuthorizationDecision::Deny(DenyReason::InsufficientScope { missing })
    }
}
