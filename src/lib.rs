//! SEQUENTIAL-ID HARVESTER
//! Guesses base-36 ids in batches of `STEP_SIZE`, fetches them in bulk through rotating
//! identities and streams the results into two append-only files.

mod error;
pub mod ident;
pub mod identity;
mod macros;
pub mod process;
mod request;
pub mod shutdown;
pub mod sink;
pub mod tasks;
mod worker;

use std::time::Duration;

pub use error::{Error, Result};
pub use process::{harvest, HarvestConfig, HarvestSummary, Timing};
pub use request::{FailureKind, Payload};

/// Number of ids requested per upstream call. The API caps bulk lookups at 100.
pub const STEP_SIZE: i64 = 100;
/// Default size of the worker pool, which is also the number of admission slots.
pub const WORKERS: usize = 10;
/// Consecutive rate-limited responses a worker tolerates before rerolling its identity.
pub const RATE_LIMIT_REROLL_THRESHOLD: u32 = 2;

pub const DEFAULT_ENDPOINT: &str = "https://www.reddit.com/api/info.json";
pub const DEFAULT_OUTPUT_FILE: &str = "scraped_posts.json";
/// Prefix the upstream expects in front of every id.
pub const ID_PREFIX: &str = "t3_";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_COOL_OFF: Duration = Duration::from_secs(3);
const RETRY_COOL_OFF: Duration = Duration::from_secs(3);
const POLITE_INTERVAL: Duration = Duration::from_secs(1);

const USER_AGENT_FILE: &str = include_str!("../useragents.txt");
const FALLBACK_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.101 Safari/537.36",
];

/// Returns the bundled user-agent strings, one per non-blank line of `useragents.txt`.
/// Falls back to a small built-in list if the file has none.
pub fn bundled_user_agents() -> Vec<String> {
    let agents: Vec<String> = USER_AGENT_FILE
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if agents.is_empty() {
        FALLBACK_USER_AGENTS.iter().map(|s| s.to_string()).collect()
    } else {
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_user_agents_are_trimmed_and_non_empty() {
        let agents = bundled_user_agents();
        assert!(!agents.is_empty());
        assert!(agents.iter().all(|a| !a.is_empty() && a.trim() == a));
    }
}
