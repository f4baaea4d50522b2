// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test fixtures: an Ed25519 token signer and a scripted key set source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};

use super::jwks::{JwkDocument, KeySetFetchError, KeySetSource};

/// Deterministic Ed25519 keypair that signs test tokens.
pub struct TestSigner {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestSigner {
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
            private_key_pkcs8: pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        self.sign_with_header(header, claims)
    }

    pub fn sign_with_header(&self, header: Header, claims: &serde_json::Value) -> String {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        encode(&header, claims, &encoding_key).expect("Failed to sign token")
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

/// PKCS#8 v1 document wrapping an Ed25519 seed.
fn pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // version 0
        0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, // AlgorithmIdentifier, OID 1.3.101.112
        0x04, 0x22, 0x04, 0x20, // OCTET STRING { OCTET STRING (32) }
    ];
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Key set source whose responses are set by the test.
pub struct ScriptedSource {
    response: Mutex<Result<Vec<serde_json::Value>, KeySetFetchError>>,
    fetches: AtomicUsize,
    delay: Duration,
}

impl ScriptedSource {
    pub fn serving(keys: Vec<serde_json::Value>) -> Arc<Self> {
        Self::delayed(keys, Duration::ZERO)
    }

    pub fn delayed(keys: Vec<serde_json::Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(keys)),
            fetches: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn unreachable() -> Arc<Self> {
        let source = Self::serving(Vec::new());
        source.fail_with(KeySetFetchError::Transport("connection refused".to_string()));
        source
    }

    pub fn set_keys(&self, keys: Vec<serde_json::Value>) {
        *self.response.lock().unwrap() = Ok(keys);
    }

    pub fn fail_with(&self, error: KeySetFetchError) {
        *self.response.lock().unwrap() = Err(error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for ScriptedSource {
    async fn fetch(&self) -> Result<JwkDocument, KeySetFetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.response.lock().unwrap().clone();
        response.map(|keys| JwkDocument { keys })
    }

    fn describe(&self) -> &str {
        "scripted"
    }
}
