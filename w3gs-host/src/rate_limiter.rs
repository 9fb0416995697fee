// rate_limiter.rs — a shared token-bucket primitive used both by the action
// engine's per-user APM quota and by map transfer's global byte budget.
//
// Grounded on examples/original_source/src/rate_limiter.h's
// TokenBucketRateLimiter: tick-interval refill, saturating capacity, a debt
// variant that allows going negative. Reworked into owned `f64` state with
// explicit `now_ms` parameters instead of a wall-clock ticks field, matching
// this crate's tick-driven rather than wall-clock-driven model.

#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    tick_interval_ms: u64,
    refill_rate: f64,
    capacity: f64,
    max_capacity: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    pub fn new(tick_interval_ms: u64, refill_rate: f64, max_capacity: f64) -> Self {
        TokenBucket {
            tick_interval_ms: tick_interval_ms.max(1),
            refill_rate,
            capacity: max_capacity,
            max_capacity,
            last_refill_ms: 0,
        }
    }

    pub fn current_capacity(&self) -> f64 {
        self.capacity
    }

    /// Advance the bucket to `now_ms`, crediting whole elapsed intervals.
    pub fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed = now_ms - self.last_refill_ms;
        let ticks = elapsed / self.tick_interval_ms;
        if ticks == 0 {
            return;
        }
        self.capacity = (self.capacity + ticks as f64 * self.refill_rate).min(self.max_capacity);
        self.last_refill_ms += ticks * self.tick_interval_ms;
    }

    /// Consume `count` tokens if available; returns false (no mutation) if
    /// the bucket is too empty.
    pub fn try_consume(&mut self, count: f64) -> bool {
        if self.capacity < count {
            return false;
        }
        self.capacity -= count;
        true
    }

    /// Consume `count` tokens unconditionally, allowing the balance to go
    /// negative (used to let an over-quota burst still register as debt).
    pub fn consume_with_debt(&mut self, count: f64) {
        self.capacity -= count;
    }

    pub fn full_refill(&mut self) {
        self.capacity = self.max_capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_down_to_zero_then_refuses() {
        let mut b = TokenBucket::new(100, 1.0, 3.0);
        assert!(b.try_consume(1.0));
        assert!(b.try_consume(1.0));
        assert!(b.try_consume(1.0));
        assert!(!b.try_consume(1.0));
    }

    #[test]
    fn refill_credits_whole_intervals_only() {
        let mut b = TokenBucket::new(100, 2.0, 10.0);
        b.try_consume(10.0);
        b.refill(50); // less than one interval
        assert_eq!(b.current_capacity(), 0.0);
        b.refill(150); // one full interval since ms 0
        assert_eq!(b.current_capacity(), 2.0);
    }

    #[test]
    fn refill_never_exceeds_max_capacity() {
        let mut b = TokenBucket::new(10, 100.0, 5.0);
        b.refill(1000);
        assert_eq!(b.current_capacity(), 5.0);
    }

    #[test]
    fn debt_consumption_goes_negative() {
        let mut b = TokenBucket::new(100, 1.0, 2.0);
        b.consume_with_debt(5.0);
        assert_eq!(b.current_capacity(), -3.0);
        assert!(!b.try_consume(1.0));
    }

    #[test]
    fn full_refill_resets_to_max() {
        let mut b = TokenBucket::new(100, 1.0, 4.0);
        b.try_consume(4.0);
        b.full_refill();
        assert_eq!(b.current_capacity(), 4.0);
    }
}
