// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer Gate - JWT bearer authentication and scope authorization
//!
//! Verifies identity-provider issued bearer tokens against a cached JWKS and
//! decides access by comparing the token's scopes with those a route
//! requires.
//!
//! ## Modules
//!
//! - `auth` - Key resolver, token verifier, authorization and the gate
//! - `error` - RFC 7807 problem responses for denied requests
//! - `config` - Environment-driven settings
//! - `api` - HTTP handlers and router (Axum)

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
