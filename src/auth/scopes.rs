// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scope sets for authorization.
//!
//! A scope is an opaque, case-sensitive permission string. Granted scopes come
//! from token claims; required scopes are declared per route.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An ordered set of scope strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Vec<String>)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Empty set. As a requirement it admits every authenticated caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string (RFC 6749 §3.3).
    pub fn parse(delimited: &str) -> Self {
        delimited.split_whitespace().collect()
    }

    /// Add a scope. Blank values are ignored.
    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        let scope = scope.into();
        let trimmed = scope.trim();
        if trimmed.is_empty() {
            return false;
        }
        if trimmed.len() == scope.len() {
            self.0.insert(scope)
        } else {
            self.0.insert(trimmed.to_string())
        }
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// True if every scope in `required` is also in `self`.
    pub fn is_superset(&self, required: &ScopeSet) -> bool {
        self.0.is_superset(&required.0)
    }

    /// Scopes of `self` that `granted` lacks.
    pub fn missing_from(&self, granted: &ScopeSet) -> ScopeSet {
        ScopeSet(self.0.difference(&granted.0).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ScopeSet::new();
        set.extend(iter);
        set
    }
}

impl<S: Into<String>> Extend<S> for ScopeSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for scope in iter {
            self.insert(scope);
        }
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}
