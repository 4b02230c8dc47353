//! Display-name resolution for connections.
//!
//! A connection is either authenticated (its token verifies to a user) or
//! anonymous. Anonymous names are generated once per browser session cookie
//! and reused for the rest of the process, so every tab of a browser shows
//! the same name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

/// Number of generated names tried before falling back to the cookie.
pub const MAX_NAME_ATTEMPTS: usize = 10;

/// A verified user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

impl AuthUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Token lookup and verification, supplied by the embedding application.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Extracts the login token from the handshake cookies.
    fn token_from_cookies(&self, cookies: &HashMap<String, String>) -> Option<String>;

    /// The user a token belongs to, or `None` if it does not verify.
    async fn verify(&self, token: &str) -> Option<AuthUser>;
}

/// Verifier that knows no users: every connection is anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl TokenVerifier for NoAuth {
    fn token_from_cookies(&self, _cookies: &HashMap<String, String>) -> Option<String> {
        None
    }

    async fn verify(&self, _token: &str) -> Option<AuthUser> {
        None
    }
}

/// Produces candidate anonymous names (without suffix).
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

const ADJECTIVES: &[&str] = &[
    "Amber", "Bold", "Brave", "Bright", "Calm", "Clever", "Cosmic", "Crimson", "Daring", "Eager",
    "Fancy", "Gentle", "Golden", "Happy", "Hidden", "Jolly", "Lively", "Lucky", "Mellow", "Mighty",
    "Nimble", "Quiet", "Rapid", "Rusty", "Silent", "Silver", "Sleepy", "Swift", "Tiny", "Witty",
];

const NOUNS: &[&str] = &[
    "Badger", "Beacon", "Comet", "Falcon", "Fern", "Fox", "Gecko", "Harbor", "Heron", "Koala",
    "Lantern", "Lynx", "Maple", "Meadow", "Moose", "Nebula", "Otter", "Panda", "Pebble", "Quokka",
    "Raven", "River", "Robin", "Sparrow", "Thistle", "Tiger", "Tulip", "Walrus", "Willow", "Yak",
];

/// Two-digit discriminator range appended to every generated name.
const DISCRIMINATORS: std::ops::Range<u32> = 10..100;

/// Two random capitalized words and a two-digit number, e.g. `BraveOtter42`.
///
/// Names are never released, so the space has to stay far larger than the
/// number of sessions a process sees; otherwise the cookie fallback kicks in.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordNamer;

impl WordNamer {
    /// Number of distinct names this generator can produce.
    pub fn capacity() -> usize {
        ADJECTIVES.len() * NOUNS.len() * DISCRIMINATORS.len()
    }
}

impl NameGenerator for WordNamer {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Otter");
        let number = rng.gen_range(DISCRIMINATORS);
        format!("{adjective}{noun}{number}")
    }
}

/// Hands out and remembers anonymous names per session cookie.
pub struct AnonymousNamer {
    generator: Box<dyn NameGenerator>,
    suffix: String,
    by_cookie: DashMap<String, String>,
    in_use: DashSet<String>,
}

impl AnonymousNamer {
    pub fn new(generator: Box<dyn NameGenerator>, suffix: impl Into<String>) -> Self {
        Self {
            generator,
            suffix: suffix.into(),
            by_cookie: DashMap::new(),
            in_use: DashSet::new(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The anonymous name of `session_cookie`, generated on first use.
    ///
    /// Up to [`MAX_NAME_ATTEMPTS`] generated names are tried; if all collide
    /// with names already handed out, the name is the cookie itself plus the
    /// suffix. Whatever is chosen is remembered for the cookie.
    pub fn name_for(&self, session_cookie: &str) -> String {
        if let Some(name) = self.by_cookie.get(session_cookie) {
            return name.clone();
        }

        match self.by_cookie.entry(session_cookie.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                for _ in 0..MAX_NAME_ATTEMPTS {
                    let candidate = format!("{}{}", self.generator.generate(), self.suffix);
                    if self.in_use.insert(candidate.clone()) {
                        entry.insert(candidate.clone());
                        return candidate;
                    }
                }
                let fallback = format!("{}{}", session_cookie, self.suffix);
                warn!(
                    "No free anonymous name after {} attempts, using '{}'",
                    MAX_NAME_ATTEMPTS, fallback
                );
                self.in_use.insert(fallback.clone());
                entry.insert(fallback.clone());
                fallback
            }
        }
    }

    /// Anonymous names are recognized by their suffix.
    pub fn is_anonymous(&self, name: &str) -> bool {
        name.ends_with(&self.suffix)
    }
}

impl std::fmt::Debug for AnonymousNamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymousNamer")
            .field("suffix", &self.suffix)
            .field("names", &self.by_cookie.len())
            .finish()
    }
}

/// Outcome of resolving a connection's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub name: String,
    pub authenticated: bool,
    /// Set when a token was missing or did not verify; the tenant roster is
    /// recomputed in that case.
    pub needs_roster_refresh: bool,
}

/// Combines token verification with anonymous naming.
pub struct IdentityResolver {
    verifier: Arc<dyn TokenVerifier>,
    namer: AnonymousNamer,
}

impl IdentityResolver {
    pub fn new(verifier: Arc<dyn TokenVerifier>, namer: AnonymousNamer) -> Self {
        Self { verifier, namer }
    }

    /// Resolves the name a connection should display.
    ///
    /// A logged-out connection is always anonymous. Otherwise the attached
    /// token (from a login event) is preferred over the cookie token.
    pub async fn resolve(
        &self,
        logged_out: bool,
        attached_token: Option<&str>,
        cookies: &HashMap<String, String>,
        session_cookie: &str,
    ) -> ResolvedIdentity {
        if logged_out {
            return ResolvedIdentity {
                name: self.namer.name_for(session_cookie),
                authenticated: false,
                needs_roster_refresh: false,
            };
        }

        let token = match attached_token {
            Some(token) => Some(token.to_string()),
            None => self.verifier.token_from_cookies(cookies),
        };
        let user = match token {
            Some(token) => self.verifier.verify(&token).await,
            None => None,
        };

        match user {
            Some(user) => ResolvedIdentity {
                name: user.username,
                authenticated: true,
                needs_roster_refresh: false,
            },
            None => {
                debug!("No verified user for session {}, using anonymous name", session_cookie);
                ResolvedIdentity {
                    name: self.namer.name_for(session_cookie),
                    authenticated: false,
                    needs_roster_refresh: true,
                }
            }
        }
    }

    pub fn anonymous_name(&self, session_cookie: &str) -> String {
        self.namer.name_for(session_cookie)
    }

    pub fn is_anonymous(&self, name: &str) -> bool {
        self.namer.is_anonymous(name)
    }

    pub fn verifier(&self) -> &Arc<dyn TokenVerifier> {
        &self.verifier
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("namer", &self.namer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl NameGenerator for Fixed {
        fn generate(&self) -> String {
            self.0.to_string()
        }
    }

    struct Tokens;

    #[async_trait]
    impl TokenVerifier for Tokens {
        fn token_from_cookies(&self, cookies: &HashMap<String, String>) -> Option<String> {
            cookies.get("token").cloned()
        }

        async fn verify(&self, token: &str) -> Option<AuthUser> {
            (token == "alice-token").then(|| AuthUser::new("alice"))
        }
    }

    #[test]
    fn test_names_are_memoized_per_cookie() {
        let namer = AnonymousNamer::new(Box::new(WordNamer), "_?");
        let first = namer.name_for("cookie-a");
        assert_eq!(namer.name_for("cookie-a"), first);
        assert!(first.ends_with("_?"));
        assert!(namer.is_anonymous(&first));
        assert!(!namer.is_anonymous("alice"));
    }

    #[test]
    fn test_collisions_fall_back_to_cookie() {
        let namer = AnonymousNamer::new(Box::new(Fixed("Same")), "_?");
        assert_eq!(namer.name_for("a"), "Same_?");
        assert_eq!(namer.name_for("b"), "b_?");
        // The fallback is remembered like any other name.
        assert_eq!(namer.name_for("b"), "b_?");
        assert_eq!(namer.name_for("a"), "Same_?");
    }

    #[test]
    fn test_concurrent_cookies_get_distinct_names() {
        use std::collections::HashSet;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Sequence(AtomicUsize);

        impl NameGenerator for Sequence {
            fn generate(&self) -> String {
                format!("Guest{}", self.0.fetch_add(1, Ordering::SeqCst))
            }
        }

        let namer = AnonymousNamer::new(Box::new(Sequence(AtomicUsize::new(0))), "_?");
        let names: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let namer = &namer;
                    scope.spawn(move || namer.name_for(&format!("cookie-{i}")))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let distinct: HashSet<_> = names.iter().collect();
        assert_eq!(distinct.len(), 16);
        assert_eq!(namer.name_for("cookie-3"), names[3]);
    }

    #[test]
    fn test_word_namer_shape() {
        let name = WordNamer.generate();
        assert!(name.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
        assert!(name.len() >= 8);
        let digits: String = name.chars().rev().take(2).collect();
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(WordNamer::capacity(), 81_000);
    }

    #[test]
    fn test_many_sessions_rarely_fall_back_to_cookie() {
        let namer = AnonymousNamer::new(Box::new(WordNamer), "_?");
        let fallbacks = (0..2000)
            .map(|i| namer.name_for(&format!("session-{i}")))
            .filter(|name| name.starts_with("session-"))
            .count();
        assert_eq!(fallbacks, 0);
    }

    #[tokio::test]
    async fn test_resolve_prefers_attached_token() {
        let resolver = IdentityResolver::new(
            Arc::new(Tokens),
            AnonymousNamer::new(Box::new(Fixed("Anon")), "_?"),
        );
        let mut cookies = HashMap::new();
        cookies.insert("token".to_string(), "bogus".to_string());

        let anonymous = resolver.resolve(false, None, &cookies, "s1").await;
        assert_eq!(anonymous.name, "Anon_?");
        assert!(!anonymous.authenticated);
        assert!(anonymous.needs_roster_refresh);

        let user = resolver.resolve(false, Some("alice-token"), &cookies, "s1").await;
        assert_eq!(user.name, "alice");
        assert!(user.authenticated);
        assert!(!user.needs_roster_refresh);

        let logged_out = resolver.resolve(true, Some("alice-token"), &cookies, "s1").await;
        assert_eq!(logged_out.name, "Anon_?");
        assert!(!logged_out.needs_roster_refresh);
    }

    #[tokio::test]
    async fn test_no_auth_is_always_anonymous() {
        let resolver = IdentityResolver::new(
            Arc::new(NoAuth),
            AnonymousNamer::new(Box::new(WordNamer), "_?"),
        );
        let identity = resolver.resolve(false, None, &HashMap::new(), "s1").await;
        assert!(resolver.is_anonymous(&identity.name));
    }
}
