// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared harness for the integration tests: Ed25519 test keys, a mocked
//! JWKS endpoint and a router built from environment-style settings.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bearer_gate::{api::router, config::Settings, state::AppState};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "https://login.test.example/tenant/v2.0";
pub const AUDIENCE: &str = "api://bearer-gate";
pub const JWKS_PATH: &str = "/discovery/v2.0/keys";

/// Test keypair for signing tokens.
pub struct TestKeypair {
    pub kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    pub fn new(seed: u8, kid: &str) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create test keypair");

        Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &encoding_key).expect("Failed to sign token")
    }

    /// A token valid for an hour with the given scopes.
    pub fn token(&self, subject: &str, scope: &str) -> String {
        let now = Utc::now().timestamp();
        self.sign(&serde_json::json!({
            "sub": subject,
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 3600,
            "scope": scope
        }))
    }

    pub fn expired_token(&self, subject: &str) -> String {
        let now = Utc::now().timestamp();
        self.sign(&serde_json::json!({
            "sub": subject,
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": now - 7200,
            "exp": now - 3600
        }))
    }

    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// Build PKCS#8 v1 document from Ed25519 seed.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // version 0
        0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, // Ed25519 OID
        0x04, 0x22, 0x04, 0x20, // OCTET STRING { OCTET STRING (32) }
    ];
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Mount a JWKS response serving `keys`, replacing any earlier mock.
pub async fn serve_keys(mock_server: &MockServer, keys: &[&TestKeypair], delay: Duration) {
    mock_server.reset().await;
    let body = serde_json::json!({
        "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>()
    });
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&body)
                .set_delay(delay),
        )
        .mount(mock_server)
        .await;
}

/// Router wired to a mocked identity provider.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mock_server: MockServer,
}

impl TestApp {
    pub async fn spawn(keys: &[&TestKeypair]) -> Self {
        let mock_server = MockServer::start().await;
        serve_keys(&mock_server, keys, Duration::ZERO).await;
        Self::with_mock(mock_server, HashMap::new())
    }

    /// Build the app against `mock_server`; `extra` overrides settings.
    pub fn with_mock(mock_server: MockServer, extra: HashMap<String, String>) -> Self {
        let mut vars = HashMap::from([
            ("AUTH_ISSUER".to_string(), ISSUER.to_string()),
            ("AUTH_AUDIENCES".to_string(), format!("{AUDIENCE},api://other")),
            (
                "AUTH_JWKS_URL".to_string(),
                format!("{}{JWKS_PATH}", mock_server.uri()),
            ),
            ("AUTH_JWKS_FETCH_TIMEOUT_SECS".to_string(), "2".to_string()),
            ("AUTH_ADMIN_SCOPE".to_string(), "keys.admin".to_string()),
        ]);
        vars.extend(extra);

        let settings = Settings::from_vars(&vars).expect("Failed to build settings");
        let state = AppState::from_settings(&settings.auth);

        Self {
            router: router(state.clone()),
            state,
            mock_server,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn jwks_requests(&self) -> usize {
        self.mock_server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
