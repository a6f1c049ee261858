//! Token-bucket rate limiter for quota-constrained external APIs.
//!
//! Tokens accumulate over time at `tokens_per_interval` per `interval`,
//! capped at `max_tokens`. Each permitted operation consumes one token.
//! Refill is lazy: it happens inside the consume path based on elapsed
//! time, under a single mutex, so refill-then-decrement is one atomic
//! critical section.
//!
//! State lives only in memory; a process restart resets the bucket.
//! There is no fairness guarantee across concurrent waiters beyond
//! best-effort wakeup order.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    tokens_per_interval: u32,
    interval: Duration,
    max_tokens: u32,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter that grants `tokens_per_interval` tokens every
    /// `interval`, with the bucket capacity equal to one interval's worth.
    pub fn new(tokens_per_interval: u32, interval: Duration) -> Self {
        Self::with_max_tokens(tokens_per_interval, interval, tokens_per_interval)
    }

    /// Create a limiter with an explicit bucket capacity, allowing bursts
    /// larger than a single interval's refill.
    pub fn with_max_tokens(tokens_per_interval: u32, interval: Duration, max_tokens: u32) -> Self {
        Self {
            tokens_per_interval,
            interval,
            max_tokens,
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Refill based on elapsed whole intervals. Fractional intervals do
    /// not trickle tokens; the clock only advances once a full interval
    /// has passed.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let intervals_elapsed = elapsed.as_secs_f64() / self.interval.as_secs_f64();

        if intervals_elapsed >= 1.0 {
            let to_add = (intervals_elapsed * f64::from(self.tokens_per_interval)).floor() as u32;
            state.tokens = state.tokens.saturating_add(to_add).min(self.max_tokens);
            state.last_refill = now;
        }
    }

    /// Try to consume `tokens` tokens. Returns whether consumption
    /// succeeded. Never blocks.
    pub fn try_consume(&self, tokens: u32) -> bool {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state);

        if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Wait until `tokens` tokens are available and consume them.
    ///
    /// Sleeps for the minimum time needed to cover the shortfall,
    /// recomputed on every wakeup since other callers may have consumed
    /// tokens in the meantime. The lock is never held across an await.
    pub async fn consume(&self, tokens: u32) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter mutex poisoned");
                self.refill(&mut state);

                if state.tokens >= tokens {
                    state.tokens -= tokens;
                    return;
                }

                let shortfall = tokens - state.tokens;
                let intervals_needed = shortfall.div_ceil(self.tokens_per_interval);
                self.interval * intervals_needed
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a single token, waiting if necessary.
    pub async fn acquire(&self) {
        self.consume(1).await;
    }

    /// Current token count after lazy refill.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state);
        state.tokens
    }

    /// Restore the bucket to full capacity.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.tokens = self.max_tokens;
        state.last_refill = Instant::now();
    }
}
