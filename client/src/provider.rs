//! Where the synchronizer gets its credential and its group from.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Source of the credential presented when connecting.
///
/// `Ok(None)` means no credential is available (e.g. signed out).
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<Option<String>>;
}

/// Identifies the sync group the local user currently belongs to.
pub trait GroupProvider: Send + Sync {
    fn group_id(&self) -> Option<String>;
}

/// A fixed credential.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Group membership that can change while the application runs.
///
/// Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct GroupContext {
    current: Arc<RwLock<Option<String>>>,
}

impl GroupContext {
    pub fn new(group_id: impl Into<String>) -> Self {
        let context = Self::default();
        context.set(group_id);
        context
    }

    pub fn set(&self, group_id: impl Into<String>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(group_id.into());
    }

    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }
}

impl GroupProvider for GroupContext {
    fn group_id(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|g| !g.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_context_is_shared() {
        let context = GroupContext::default();
        let view = context.clone();
        assert_eq!(view.group_id(), None);

        context.set("family");
        assert_eq!(view.group_id().as_deref(), Some("family"));

        context.set("");
        assert_eq!(view.group_id(), None);

        context.set("work");
        context.clear();
        assert_eq!(view.group_id(), None);
    }

    #[tokio::test]
    async fn static_token() {
        assert_eq!(
            StaticToken::new("secret").get_token().await.unwrap().as_deref(),
            Some("secret")
        );
        assert_eq!(StaticToken::none().get_token().await.unwrap(), None);
    }
}
