//! Per-model-family pacing. A burst of requests against one family burns a
//! single account's quota in seconds; spacing dispatches out keeps the pool
//! healthy without visibly delaying interactive use.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use gravity_core::config::ThrottleConfig;
use gravity_wire::ModelFamily;

pub struct Throttle {
    config: ThrottleConfig,
    /// family → the time the next dispatch may go out.
    next_slot: Mutex<HashMap<ModelFamily, Instant>>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    fn delay_for(&self, family: ModelFamily) -> Duration {
        let ms = match family {
            ModelFamily::Claude => self.config.claude_ms,
            ModelFamily::Gemini => self.config.gemini_ms,
            ModelFamily::Unknown => self.config.other_ms,
        };
        Duration::from_millis(ms)
    }

    /// Reserve the next dispatch slot for this family and sleep until it.
    /// The slot is taken under the lock; the sleep happens after releasing
    /// it so slow families never block fast ones.
    pub async fn wait(&self, family: ModelFamily) {
        let wait = {
            let mut slots = self.next_slot.lock().expect("throttle mutex poisoned");
            let now = Instant::now();
            let delay = self.delay_for(family);
            match slots.get(&family).copied() {
                Some(slot) if slot > now => {
                    slots.insert(family, slot + delay);
                    slot - now
                }
                _ => {
                    slots.insert(family, now + delay);
                    Duration::ZERO
                }
            }
        };
        if !wait.is_zero() {
            debug!(family = family.as_str(), wait_ms = wait.as_millis() as u64, "throttling");
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ThrottleConfig {
        ThrottleConfig {
            claude_ms: 50,
            gemini_ms: 20,
            other_ms: 50,
        }
    }

    #[tokio::test]
    async fn first_call_does_not_wait() {
        let throttle = Throttle::new(fast_config());
        let start = Instant::now();
        throttle.wait(ModelFamily::Claude).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn second_call_waits_out_the_delay() {
        let throttle = Throttle::new(fast_config());
        throttle.wait(ModelFamily::Claude).await;
        let start = Instant::now();
        throttle.wait(ModelFamily::Claude).await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn families_are_independent() {
        let throttle = Throttle::new(fast_config());
        throttle.wait(ModelFamily::Claude).await;
        let start = Instant::now();
        throttle.wait(ModelFamily::Gemini).await;
        assert!(start.elapsed() < Duration::from_millis(15));
    }
}
