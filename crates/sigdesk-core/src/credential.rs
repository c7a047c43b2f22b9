//! Bearer credential sources.
//!
//! Credentials are opaque to the client. They are read right before each
//! connection attempt or command, so a session manager can swap them at
//! runtime through [`SharedCredential`].

use parking_lot::RwLock;
use std::sync::Arc;

/// Supplies the current bearer credential, if any.
pub trait CredentialSource: Send + Sync {
    fn credential(&self) -> Option<String>;
}

/// Fixed credential (or none, for anonymous/degraded mode).
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredential {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Credential that can be replaced by an external session manager.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedCredential {
    pub fn new(token: Option<String>) -> Self {
        let shared = Self::default();
        shared.set(token);
        shared
    }

    pub fn set(&self, token: Option<String>) {
        *self.inner.write() = token.filter(|t| !t.trim().is_empty());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

impl CredentialSource for SharedCredential {
    fn credential(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_token_is_anonymous() {
        assert_eq!(StaticCredential::new(Some("  ".into())).credential(), None);
        assert_eq!(
            StaticCredential::new(Some("abc".into())).credential(),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_shared_credential_swaps() {
        let shared = SharedCredential::new(Some("old".into()));
        let reader = shared.clone();

        shared.set(Some("new".into()));
        assert_eq!(reader.credential(), Some("new".to_string()));

        shared.clear();
        assert_eq!(reader.credential(), None);
    }
}
