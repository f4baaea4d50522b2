// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer token authentication and scope-based authorization.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <JWT>`
//! 2. [`AuthGate`] extracts the token
//! 3. [`TokenVerifier`]:
//!    - resolves the signing key by `kid` through [`KeyResolver`] (cached JWKS)
//!    - verifies signature, expiry, issuer and audience
//! 4. [`authorize`] checks the granted scopes (`scope`, `scp`, `roles`)
//!    against the scopes the route requires
//! 5. The request continues with an [`AuthenticatedContext`], or is denied
//!    with a [`DenialOutcome`] that [`crate::error`] renders as 401 or 403
//!
//! ## Security
//!
//! - JWKS is fetched over HTTPS and cached with a TTL
//! - Unknown key ids trigger one coalesced refresh; concurrent misses share it
//! - A failed refresh keeps serving the last good key set
//! - Clock skew tolerance defaults to 5 seconds
//! - Denial responses never say which check failed

pub mod claims;
pub mod clock;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod jwks;
pub mod middleware;
pub mod policy;
pub mod refresher;
pub mod scopes;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use claims::Claims;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DenialDetail, DenialKind, DenialOutcome, ValidationFailure};
pub use extractor::{Auth, OptionalAuth};
pub use gate::{bearer_token, AuthGate, AuthenticatedContext};
pub use jwks::{HttpKeySetSource, KeyResolver, KeySetFetchError, KeySetSource, SigningKeySet};
pub use middleware::{require_scopes, RequireScopes};
pub use policy::{authorize, AuthorizationDecision, DenyReason, Principal};
pub use refresher::KeyRefresher;
pub use scopes::ScopeSet;
pub use verifier::{BearerVerifier, TokenVerifier};
