// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{AuthGate, KeyResolver, ScopeSet, TokenVerifier};
use crate::config::AuthSettings;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub keys: KeyResolver,
    /// Scopes required by the admin routes.
    pub admin_scopes: Arc<ScopeSet>,
}

impl AppState {
    pub fn new(gate: Arc<AuthGate>, keys: KeyResolver, admin_scopes: ScopeSet) -> Self {
        Self {
            gate,
            keys,
            admin_scopes: Arc::new(admin_scopes),
        }
    }

    /// Wire the key resolver, verifier and gate from settings.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let keys = KeyResolver::from_url(settings.jwks_url.as_str(), settings.fetch_timeout)
            .with_cache_ttl(settings.key_cache_ttl)
            .with_miss_refresh_interval(settings.miss_refresh_interval);
        let verifier = TokenVerifier::new(keys.clone(), settings.issuer.clone())
            .with_clock_skew(settings.clock_skew);
        let gate = AuthGate::new(Arc::new(verifier), settings.audiences.clone());

        Self::new(
            Arc::new(gate),
            keys,
            ScopeSet::parse(&settings.admin_scope),
        )
    }
}
