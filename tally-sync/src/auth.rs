//! Access token source shared by the HTTP and realtime clients.
//!
//! The provider is asked on every request and every (re)connect so a
//! refreshed credential is always used.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, `None` when unauthenticated.
    async fn access_token(&self) -> Option<String>;
}

/// A token held in memory that can be swapped after a refresh.
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Arc<RwLock<Option<String>>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub async fn replace(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}
