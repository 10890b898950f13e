use std::{collections::HashMap, env};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

use crate::state::contest::Identity;

const TOKENS_ENV: &str = "ARENA_TOKENS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("token rejected")]
    Rejected,
}

/// Maps a session token to a verified identity.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Identity, AuthError>>;
}

/// Fixed table of tokens, configured through `ARENA_TOKENS="token=identity,..."`.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Identity>,
}

impl TokenTable {
    pub fn new(entries: impl IntoIterator<Item = (String, Identity)>) -> Self {
        Self {
            tokens: entries.into_iter().collect(),
        }
    }

    pub fn from_env() -> Self {
        let table = env::var(TOKENS_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default();
        if table.tokens.is_empty() {
            warn!("{TOKENS_ENV} is empty; every session will be rejected");
        }
        table
    }

    /// Parse `token=identity` pairs separated by commas; malformed pairs are skipped.
    pub fn parse(raw: &str) -> Self {
        let entries = raw.split(',').filter_map(|pair| {
            let (token, identity) = pair.split_once('=')?;
            let (token, identity) = (token.trim(), identity.trim());
            if token.is_empty() || identity.is_empty() {
                warn!(pair = pair.trim(), "ignoring malformed token entry");
                return None;
            }
            Some((token.to_string(), Identity::new(identity)))
        });
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for TokenTable {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let result = if token.is_empty() {
            Err(AuthError::MissingToken)
        } else {
            self.tokens.get(token).cloned().ok_or(AuthError::Rejected)
        };
        Box::pin(async move { result })
    }
}
