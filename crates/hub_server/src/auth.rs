//! Token verifier backed by the `[tokens]` table of the configuration.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tenant_hub::{AuthUser, TokenVerifier};

/// Maps opaque login tokens to usernames.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    cookie_name: String,
    users: BTreeMap<String, String>,
}

impl TokenTable {
    pub fn new(cookie_name: impl Into<String>, users: BTreeMap<String, String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            users,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl TokenVerifier for TokenTable {
    fn token_from_cookies(&self, cookies: &HashMap<String, String>) -> Option<String> {
        cookies
            .get(&self.cookie_name)
            .filter(|token| !token.is_empty())
            .cloned()
    }

    async fn verify(&self, token: &str) -> Option<AuthUser> {
        self.users.get(token).map(AuthUser::new)
    }
}
