// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RFC 7807 problem responses for denied requests.
//!
//! [`render_denial`] is a pure mapping from a [`DenialOutcome`] to an
//! [`ApiProblem`]. Bodies are generic: they never say which check failed or
//! which scopes were missing. Those details only go to the logs.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{DenialDetail, DenialKind, DenialOutcome};

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

const UNAUTHENTICATED_DETAIL: &str = "Full authentication is required to access this resource";
const FORBIDDEN_DETAIL: &str = "insufficient privileges";

/// Problem details body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Problem {
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub problem_type: String,
    #[schema(example = "Unauthorized")]
    pub title: String,
    #[schema(example = 401)]
    pub status: u16,
    #[schema(example = "Full authentication is required to access this resource")]
    pub detail: String,
}

/// A problem plus the headers that go with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiProblem {
    pub status: StatusCode,
    pub problem: Problem,
    /// Value of the `WWW-Authenticate` header, if any.
    pub challenge: Option<&'static str>,
}

impl ApiProblem {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            problem: Problem {
                problem_type: "about:blank".to_string(),
                title: status.canonical_reason().unwrap_or("Error").to_string(),
                status: status.as_u16(),
                detail: detail.into(),
            },
            challenge: None,
        }
    }

    pub fn with_challenge(mut self, challenge: &'static str) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

/// Map a denial to its response.
///
/// Unauthenticated is 401 with a `WWW-Authenticate: Bearer` challenge
/// (RFC 6750 §3); Forbidden is 403.
pub fn render_denial(denial: &DenialOutcome) -> ApiProblem {
    match denial.kind() {
        DenialKind::Unauthenticated => {
            let challenge = match denial.detail() {
                DenialDetail::MissingCredentials => "Bearer",
                _ => r#"Bearer error="invalid_token""#,
            };
            ApiProblem::new(StatusCode::UNAUTHORIZED, UNAUTHENTICATED_DETAIL)
                .with_challenge(challenge)
        }
        DenialKind::Forbidden => ApiProblem::new(StatusCode::FORBIDDEN, FORBIDDEN_DETAIL)
            .with_challenge(r#"Bearer error="insufficient_scope""#),
    }
}

impl From<DenialOutcome> for ApiProblem {
    fn from(denial: DenialOutcome) -> Self {
        render_denial(&denial)
    }
}

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        if let Some(challenge) = self.challenge {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}
