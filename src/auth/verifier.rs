// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. structure (size, segments, header, required claims) → `MalformedToken`
//! 2. key lookup by `kid` → `KeyNotFound`
//! 3. signature → `SignatureInvalid`
//! 4. lifetime (`exp`, then `nbf`, with skew tolerance) → `Expired` / `NotYetValid`
//! 5. issuer → `IssuerMismatch`
//! 6. audience → `AudienceMismatch`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use tracing::instrument;

use super::claims::{Claims, TokenClaims};
use super::clock::{Clock, SystemClock};
use super::error::ValidationFailure;
use super::jwks::{KeyResolver, VerificationKey};

/// Tokens larger than this are rejected before parsing.
pub const MAX_TOKEN_BYTES: usize = 8192;

/// Default tolerance for clock differences with the issuer.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Anything that can turn a bearer token into verified claims.
#[async_trait]
pub trait BearerVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        expected_audiences: &[String],
    ) -> Result<Claims, ValidationFailure>;
}

/// JWT verifier backed by a [`KeyResolver`].
pub struct TokenVerifier {
    keys: KeyResolver,
    trusted_issuer: String,
    clock_skew: TimeDelta,
    clock: Arc<dyn Clock>,
}

/// Output of the structural parse, before any cryptographic check.
struct ParsedToken {
    kid: Option<String>,
    algorithm: Algorithm,
    not_before: Option<i64>,
    claims: Claims,
}

impl TokenVerifier {
    pub fn new(keys: KeyResolver, trusted_issuer: impl Into<String>) -> Self {
        Self {
            keys,
            trusted_issuer: trusted_issuer.into(),
            clock_skew: skew_delta(DEFAULT_CLOCK_SKEW),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew_delta(skew);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn key_resolver(&self) -> &KeyResolver {
        &self.keys
    }

    pub fn trusted_issuer(&self) -> &str {
        &self.trusted_issuer
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// The first [`ValidationFailure`] hit, in the order listed in the
    /// module docs.
    #[instrument(skip_all, fields(failure))]
    pub async fn verify(
        &self,
        token: &str,
        expected_audiences: &[String],
    ) -> Result<Claims, ValidationFailure> {
        let result = self.verify_inner(token, expected_audiences).await;
        match &result {
            Ok(_) => tracing::debug!(target: "auth.verifier", "Token validated successfully"),
            Err(failure) => {
                tracing::Span::current().record("failure", failure.code());
                tracing::debug!(target: "auth.verifier", failure = failure.code(), "Token rejected");
            }
        }
        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        expected_audiences: &[String],
    ) -> Result<Claims, ValidationFailure> {
        let parsed = parse(token)?;

        let kid = parsed.kid.as_deref().ok_or(ValidationFailure::KeyNotFound)?;
        let key = self.keys.resolve(kid).await?;

        check_signature(token, parsed.algorithm, &key)?;
        check_lifetime(&parsed, self.clock.now(), self.clock_skew)?;

        if parsed.claims.issuer() != self.trusted_issuer {
            return Err(ValidationFailure::IssuerMismatch);
        }

        let accepted = parsed
            .claims
            .audience()
            .iter()
            .any(|aud| expected_audiences.iter().any(|expected| expected == aud));
        if !accepted {
            return Err(ValidationFailure::AudienceMismatch);
        }

        Ok(parsed.claims)
    }
}

#[async_trait]
impl BearerVerifier for TokenVerifier {
    async fn verify(
        &self,
        token: &str,
        expected_audiences: &[String],
    ) -> Result<Claims, ValidationFailure> {
        TokenVerifier::verify(self, token, expected_audiences).await
    }
}

fn skew_delta(skew: Duration) -> TimeDelta {
    TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX)
}

/// Decode header and payload without checking the signature.
fn parse(token: &str) -> Result<ParsedToken, ValidationFailure> {
    if token.len() > MAX_TOKEN_BYTES || token.split('.').count() != 3 {
        return Err(ValidationFailure::MalformedToken);
    }

    let data = jsonwebtoken::dangerous::insecure_decode::<TokenClaims>(token)
        .map_err(|_| ValidationFailure::MalformedToken)?;
    let not_before = data.claims.nbf;
    let claims = Claims::from_token_claims(data.claims)?;

    Ok(ParsedToken {
        kid: data.header.kid.filter(|kid| !kid.is_empty()),
        algorithm: data.header.alg,
        not_before,
        claims,
    })
}

/// Verify the signature with the resolved key.
///
/// The token's `alg` must match the key's algorithm.
fn check_signature(
    token: &str,
    algorithm: Algorithm,
    key: &VerificationKey,
) -> Result<(), ValidationFailure> {
    if algorithm != key.algorithm() {
        tracing::debug!(
            target: "auth.verifier",
            token_alg = ?algorithm,
            key_alg = ?key.algorithm(),
            "Token algorithm does not match key"
        );
        return Err(ValidationFailure::SignatureInvalid);
    }

    // Claims were checked by `parse`; only the signature is verified here.
    let mut validation = Validation::new(key.algorithm());
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    // Same payload bytes `parse` already decoded.
    decode::<serde::de::IgnoredAny>(token, key.decoding_key(), &validation)
        .map(|_| ())
        .map_err(|e| match e.kind() {
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                ValidationFailure::MalformedToken
            }
            _ => {
                tracing::debug!(target: "auth.verifier", error = %e, "Signature verification failed");
                ValidationFailure::SignatureInvalid
            }
        })
}

/// `exp < now - skew` is expired; `exp == now - skew` is still valid.
fn check_lifetime(
    parsed: &ParsedToken,
    now: DateTime<Utc>,
    skew: TimeDelta,
) -> Result<(), ValidationFailure> {
    let earliest_valid_expiry = now.checked_sub_signed(skew).unwrap_or(DateTime::<Utc>::MIN_UTC);
    if parsed.claims.expires_at() < earliest_valid_expiry {
        return Err(ValidationFailure::Expired);
    }

    if let Some(nbf) = parsed.not_before {
        let latest_valid_nbf = now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if nbf > latest_valid_nbf.timestamp() {
            return Err(ValidationFailure::NotYetValid);
        }
    }

    Ok(())
}
