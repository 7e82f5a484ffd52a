//! Implicit authorities: domains that vouch for records with nothing to
//! attach to.

use dashmap::DashMap;
use trove_types::MessagePublicKey;

/// Resolves an implicit authority domain to the key that signs for it.
pub trait ImplicitAuthority: Send + Sync {
    fn resolve(&self, domain: &str) -> Option<MessagePublicKey>;
}

/// Fixed domain → key table.
///
/// Domains compare case-insensitively and ignore a trailing dot.
#[derive(Debug, Default)]
pub struct StaticAuthorities {
    keys: DashMap<String, MessagePublicKey>,
}

fn normalize(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

impl StaticAuthorities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, domain: &str, key: MessagePublicKey) -> Self {
        self.insert(domain, key);
        self
    }

    pub fn insert(&self, domain: &str, key: MessagePublicKey) {
        self.keys.insert(normalize(domain), key);
    }

    pub fn remove(&self, domain: &str) -> Option<MessagePublicKey> {
        self.keys.remove(&normalize(domain)).map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ImplicitAuthority for StaticAuthorities {
    fn resolve(&self, domain: &str) -> Option<MessagePublicKey> {
        self.keys.get(&normalize(domain)).map(|entry| entry.value().clone())
    }
}
