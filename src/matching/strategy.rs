use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Finds how many known patients match a symptom profile.
#[async_trait]
pub trait MatchStrategy: Send + Sync {
    async fn find_matches(&self, client_id: &str, symptoms: u32) -> u32;
}

/// Stand-in for a real matching algorithm: waits, then picks a count at random.
/// Callers must not rely on anything but getting a count back.
pub struct SimulatedMatch {
    delay: Duration,
    max_results: u32,
}

impl SimulatedMatch {
    pub fn new(delay: Duration, max_results: u32) -> Self {
        SimulatedMatch { delay, max_results }
    }
}

#[async_trait]
impl MatchStrategy for SimulatedMatch {
    async fn find_matches(&self, _client_id: &str, _symptoms: u32) -> u32 {
        // Yields the worker to other matches while "computing".
        tokio::time::sleep(self.delay).await;
        rand::rng().random_range(0..=self.max_results)
    }
}
