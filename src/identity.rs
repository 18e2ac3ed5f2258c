//! Worker identities: an egress route plus a user agent, and the client built for them.

use std::time::Duration;

use rand::{rngs::StdRng, seq::SliceRandom};
use reqwest::{Client, Proxy};
use tracing::warn;

use crate::{Error, Result};

/// What a worker presents upstream. Never shared between workers; rerolling builds a new one.
#[derive(Debug, Clone)]
pub struct Identity {
    route: Option<String>,
    signature: String,
    client: Client,
}

impl Identity {
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// The configured proxies and user agents identities are drawn from.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    proxies: Vec<String>,
    signatures: Vec<String>,
    timeout: Duration,
}

impl IdentityPool {
    /// An empty proxy list means every identity connects directly.
    pub fn new(proxies: Vec<String>, signatures: Vec<String>, timeout: Duration) -> Result<Self> {
        if signatures.is_empty() {
            return Err(Error::NoSignatures);
        }
        Ok(Self {
            proxies,
            signatures,
            timeout,
        })
    }

    /// Draws a random route/signature pair and builds its client.
    pub fn draw(&self, rng: &mut StdRng) -> Result<Identity> {
        let (route, signature) = self.pick(rng)?;
        self.build(route, signature)
    }

    /// Draws a replacement for `current`. Whenever the pools hold more than one
    /// route/signature pair, the replacement differs from `current` in at least one of them.
    pub fn redraw(&self, current: &Identity, rng: &mut StdRng) -> Result<Identity> {
        if self.proxies.len().max(1) * self.signatures.len() <= 1 {
            return self.draw(rng);
        }
        loop {
            let (route, signature) = self.pick(rng)?;
            if route.map(String::as_str) != current.route() || signature != &current.signature {
                return self.build(route, signature);
            }
        }
    }

    fn pick(&self, rng: &mut StdRng) -> Result<(Option<&String>, &String)> {
        let route = self.proxies.choose(rng);
        let signature = self.signatures.choose(rng).ok_or(Error::NoSignatures)?;
        Ok((route, signature))
    }

    /// A proxy that reqwest refuses to parse is logged and the identity falls back to a
    /// direct route, so one bad entry in the list never stalls a worker.
    fn build(&self, route: Option<&String>, signature: &str) -> Result<Identity> {
        let mut builder = Client::builder().timeout(self.timeout);
        let route = match route {
            Some(proxy_url) => match Proxy::all(proxy_url.as_str()) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    Some(proxy_url.clone())
                }
                Err(e) => {
                    warn!(proxy = %proxy_url, error = %e, "invalid proxy, connecting directly");
                    None
                }
            },
            None => None,
        };

        Ok(Identity {
            route,
            signature: signature.to_string(),
            client: builder.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn pool(proxies: &[&str], signatures: &[&str]) -> Result<IdentityPool> {
        IdentityPool::new(
            proxies.iter().map(|s| s.to_string()).collect(),
            signatures.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn requires_a_signature() {
        assert!(matches!(pool(&[], &[]), Err(Error::NoSignatures)));
    }

    #[test]
    fn draws_direct_identity_without_proxies() {
        let pool = pool(&[], &["agent-a"]).unwrap();
        let identity = pool.draw(&mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(identity.route(), None);
        assert_eq!(identity.signature(), "agent-a");
    }

    #[test]
    fn draws_from_the_configured_pools() {
        let proxies = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"];
        let signatures = ["agent-a", "agent-b", "agent-c"];
        let pool = pool(&proxies, &signatures).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let identity = pool.draw(&mut rng).unwrap();
            assert!(proxies.contains(&identity.route().unwrap()));
            assert!(signatures.contains(&identity.signature()));
        }
    }

    #[test]
    fn same_seed_draws_same_identities() {
        let pool = pool(&["http://a:1", "http://b:2"], &["x", "y", "z"]).unwrap();
        let mut first = StdRng::seed_from_u64(3);
        let mut second = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            let a = pool.draw(&mut first).unwrap();
            let b = pool.draw(&mut second).unwrap();
            assert_eq!(a.route(), b.route());
            assert_eq!(a.signature(), b.signature());
        }
    }

    #[test]
    fn redraw_always_changes_something_when_it_can() {
        let pool = pool(&[], &["agent-a", "agent-b"]).unwrap();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut current = pool.draw(&mut rng).unwrap();
            for _ in 0..5 {
                let next = pool.redraw(&current, &mut rng).unwrap();
                assert_ne!(next.signature(), current.signature(), "seed {seed}");
                current = next;
            }
        }
    }

    #[test]
    fn redraw_with_a_single_pair_keeps_that_pair() {
        let pool = pool(&["http://a:1"], &["only"]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let current = pool.draw(&mut rng).unwrap();
        let next = pool.redraw(&current, &mut rng).unwrap();
        assert_eq!(next.route(), Some("http://a:1"));
        assert_eq!(next.signature(), "only");
    }
}
