//! Secret lookup seam.
//!
//! Settings loading resolves credentials through a [`SecretStore`] so hosts
//! can plug in a vault-backed implementation without touching the gateway.
//! The default store reads process environment variables.

/// Source of credential material.
pub trait SecretStore: Send + Sync {
    /// Look up a secret by key. `None` when the key is not present.
    fn get_secret(&self, key: &str) -> Option<String>;
}

/// Environment-variable-backed secret store.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}
