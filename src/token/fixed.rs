//! Fixed-response token provider for tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use super::{TokenExpiry, TokenProvider};
use crate::{Error, Result};

/// Returns the same token (or the same failure) on every call.
pub struct StaticTokenProvider {
    outcome: std::result::Result<TokenExpiry, String>,
    calls: AtomicUsize,
}

impl StaticTokenProvider {
    /// Always succeed with `token`.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            outcome: Ok(TokenExpiry::new(token, expires_at)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with an identity-token error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `get_token` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<TokenExpiry> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .map_err(|message| Error::identity("static", message))
    }
}
