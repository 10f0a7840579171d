//! Heartbeat bookkeeping for one connection.
//!
//! The session owns the timer; [`Heartbeater`] only decides what each tick
//! means. A tick that finds the previous beat still unacknowledged counts a
//! miss, and `max_missed` consecutive misses mark the connection as a zombie.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Last measured heartbeat round trip, readable from any thread.
#[derive(Debug)]
pub struct LatencyGauge {
    nanos: AtomicU64,
}

impl Default for LatencyGauge {
    fn default() -> Self {
        Self {
            nanos: AtomicU64::new(u64::MAX),
        }
    }
}

impl LatencyGauge {
    pub fn record(&self, rtt: Duration) {
        let nanos = u64::try_from(rtt.as_nanos()).unwrap_or(u64::MAX - 1);
        self.nanos.store(nanos, Ordering::Relaxed);
    }

    /// `None` until the first acknowledgement.
    pub fn get(&self) -> Option<Duration> {
        match self.nanos.load(Ordering::Relaxed) {
            u64::MAX => None,
            n => Some(Duration::from_nanos(n)),
        }
    }

    pub fn reset(&self) {
        self.nanos.store(u64::MAX, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now.
    Send,
    /// Too many acknowledgements missed; drop the connection.
    Zombie,
}

#[derive(Debug)]
pub struct Heartbeater {
    interval: Duration,
    next_tick: Instant,
    last_sent: Option<Instant>,
    awaiting_ack: bool,
    missed: u32,
    max_missed: u32,
}

impl Heartbeater {
    /// The first tick lands at a random point inside the first interval.
    pub fn new(interval: Duration, max_missed: u32, rng: &mut impl Rng) -> Self {
        let first = interval.mul_f64(rng.gen_range(0.0..1.0));
        Self {
            interval,
            next_tick: Instant::now() + first,
            last_sent: None,
            awaiting_ack: false,
            missed: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn tick(&mut self, now: Instant) -> Beat {
        if self.awaiting_ack {
            self.missed += 1;
            if self.missed >= self.max_missed {
                return Beat::Zombie;
            }
        }
        self.sent(now);
        self.next_tick = now + self.interval;
        Beat::Send
    }

    /// Record a beat sent outside the schedule (the gateway asked for one).
    pub fn sent(&mut self, now: Instant) {
        self.awaiting_ack = true;
        self.last_sent = Some(now);
    }

    /// Returns the round trip of the acknowledged beat.
    pub fn ack(&mut self, now: Instant) -> Option<Duration> {
        self.awaiting_ack = false;
        self.missed = 0;
        self.last_sent.map(|sent| now.saturating_duration_since(sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const INTERVAL: Duration = Duration::from_millis(41_250);

    fn heartbeater() -> Heartbeater {
        Heartbeater::new(INTERVAL, 2, &mut StdRng::seed_from_u64(1))
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_jittered_within_interval() {
        let start = Instant::now();
        let hb = heartbeater();
        assert!(hb.next_tick() >= start);
        assert!(hb.next_tick() < start + INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn acked_beats_never_zombie() {
        let mut hb = heartbeater();
        for _ in 0..10 {
            tokio::time::sleep_until(hb.next_tick()).await;
            assert_eq!(hb.tick(Instant::now()), Beat::Send);
            tokio::time::advance(Duration::from_millis(40)).await;
            assert_eq!(hb.ack(Instant::now()), Some(Duration::from_millis(40)));
        }
        assert_eq!(hb.missed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_missed_acks_zombie() {
        let mut hb = heartbeater();
        tokio::time::sleep_until(hb.next_tick()).await;
        assert_eq!(hb.tick(Instant::now()), Beat::Send);

        tokio::time::sleep_until(hb.next_tick()).await;
        assert_eq!(hb.tick(Instant::now()), Beat::Send);
        assert_eq!(hb.missed(), 1);

        tokio::time::sleep_until(hb.next_tick()).await;
        assert_eq!(hb.tick(Instant::now()), Beat::Zombie);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_resets_missed_count() {
        let mut hb = heartbeater();
        hb.tick(Instant::now());
        hb.tick(Instant::now());
        assert_eq!(hb.missed(), 1);
        hb.ack(Instant::now());
        assert_eq!(hb.tick(Instant::now()), Beat::Send);
        assert_eq!(hb.missed(), 0);
    }

    #[test]
    fn latency_gauge_starts_empty() {
        let gauge = LatencyGauge::default();
        assert_eq!(gauge.get(), None);
        gauge.record(Duration::from_millis(12));
        assert_eq!(gauge.get(), Some(Duration::from_millis(12)));
        gauge.reset();
        assert_eq!(gauge.get(), None);
    }
}
