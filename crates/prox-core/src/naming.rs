use std::collections::HashSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CHANNEL_NAME_ALPHABET, DEFAULT_CHANNEL_NAME_LEN, DEFAULT_CHANNEL_PREFIX, MAX_NAME_ATTEMPTS,
};
use crate::ids::ChannelId;

/// How fresh channel names are produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum NamingStrategy {
    /// Fixed-length alphanumeric names drawn from the RNG.
    Random { length: usize },
    /// `prefix` followed by a monotonically increasing counter.
    Counter { prefix: String },
}

impl Default for NamingStrategy {
    fn default() -> Self {
        Self::Random {
            length: DEFAULT_CHANNEL_NAME_LEN,
        }
    }
}

impl NamingStrategy {
    pub fn counter() -> Self {
        Self::Counter {
            prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// Issues channel names that are unique for the namer's whole lifetime,
/// not just among the channels currently open.
#[derive(Debug)]
pub struct ChannelNamer {
    strategy: NamingStrategy,
    issued: HashSet<ChannelId>,
    counter: u64,
    rng: SmallRng,
}

impl ChannelNamer {
    pub fn new(strategy: NamingStrategy) -> Self {
        Self::with_rng(strategy, SmallRng::from_os_rng())
    }

    pub fn seeded(strategy: NamingStrategy, seed: u64) -> Self {
        Self::with_rng(strategy, SmallRng::seed_from_u64(seed))
    }

    pub fn with_rng(strategy: NamingStrategy, rng: SmallRng) -> Self {
        Self {
            strategy,
            issued: HashSet::new(),
            counter: 0,
            rng,
        }
    }

    pub fn strategy(&self) -> &NamingStrategy {
        &self.strategy
    }

    /// Record a name issued elsewhere (e.g. restored from a snapshot) so it
    /// is never handed out again.
    pub fn reserve(&mut self, id: &ChannelId) {
        self.issued.insert(id.clone());
    }

    pub fn next_name(&mut self) -> ChannelId {
        let id = match self.strategy.clone() {
            NamingStrategy::Counter { prefix } => self.next_counter(&prefix),
            NamingStrategy::Random { length } => self.next_random(length),
        };
        self.issued.insert(id.clone());
        id
    }

    fn next_counter(&mut self, prefix: &str) -> ChannelId {
        loop {
            self.counter += 1;
            let id = ChannelId(format!("{prefix}{}", self.counter));
            if !self.issued.contains(&id) {
                return id;
            }
        }
    }

    fn next_random(&mut self, length: usize) -> ChannelId {
        let length = length.max(1);
        for _ in 0..MAX_NAME_ATTEMPTS {
            let id = ChannelId(random_name(&mut self.rng, length));
            if !self.issued.contains(&id) {
                return id;
            }
        }
        // Name space is nearly exhausted for this length: suffix a counter.
        let base = random_name(&mut self.rng, length);
        self.next_counter(&base)
    }
}

fn random_name(rng: &mut impl Rng, length: usize) -> String {
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHANNEL_NAME_ALPHABET.len());
            CHANNEL_NAME_ALPHABET[idx] as char
        })
        .collect()
}
