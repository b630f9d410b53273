//! Flight retransmission timing.
//!
//! Each session with an unacknowledged flight has exactly one entry. Entries
//! are ordered by deadline so the engine can ask for the next wake-up and
//! drain the due ones in order.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::peers::PeerId;
use crate::SeededRng;

pub struct ExponentialBackoff {
    max_rto: Duration,
    rto: Duration,
    jitter_range: Duration,
    // In seconds, within ±jitter_range.
    jitter: f64,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(
        start_rto: Duration,
        max_rto: Duration,
        retries: usize,
        jitter_range: Duration,
        rng: &mut SeededRng,
    ) -> Self {
        let mut backoff = Self {
            max_rto,
            rto: start_rto,
            jitter_range,
            jitter: 0.0,
            left: retries,
        };
        backoff.jitter = backoff.jitter(rng);
        backoff
    }

    pub fn rto(&self) -> Duration {
        if self.jitter_range.is_zero() {
            return self.rto;
        }
        if self.jitter < 0.0 {
            self.rto.saturating_sub(Duration::from_secs_f64(-self.jitter))
        } else {
            self.rto + Duration::from_secs_f64(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    fn jitter(&self, rng: &mut SeededRng) -> f64 {
        if self.jitter_range.is_zero() {
            return 0.0;
        }
        let range = self.jitter_range.as_secs_f64();
        rng.random::<f64>() * 2.0 * range - range
    }

    pub fn attempt(&mut self, rng: &mut SeededRng) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };

        self.left = n;
        self.jitter = self.jitter(rng);
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

/// What to do with a session whose flight timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Retransmit,
    Abort,
}

struct Entry {
    key: (Instant, u64),
    backoff: ExponentialBackoff,
}

pub struct RetransmissionScheduler {
    deadlines: BTreeMap<(Instant, u64), PeerId>,
    entries: HashMap<PeerId, Entry>,
    serial: u64,
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    jitter: Duration,
    rng: SeededRng,
}

impl RetransmissionScheduler {
    pub fn new(
        start_rto: Duration,
        max_rto: Duration,
        retries: usize,
        jitter: Duration,
        rng: SeededRng,
    ) -> Self {
        RetransmissionScheduler {
            deadlines: BTreeMap::new(),
            entries: HashMap::new(),
            serial: 0,
            start_rto,
            max_rto,
            retries,
            jitter,
            rng,
        }
    }

    /// Start timing a new flight for `peer`, replacing any earlier entry.
    pub fn arm(&mut self, peer: PeerId, now: Instant) {
        self.cancel(&peer);

        let backoff = ExponentialBackoff::new(
            self.start_rto,
            self.max_rto,
            self.retries,
            self.jitter,
            &mut self.rng,
        );
        let key = self.next_key(now + backoff.rto());
        self.deadlines.insert(key, peer);
        self.entries.insert(peer, Entry { key, backoff });
    }

    pub fn cancel(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entries.remove(peer) {
            self.deadlines.remove(&entry.key);
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(at, _)| *at)
    }

    /// Take the earliest entry due at `now`.
    ///
    /// A retransmitting entry is rescheduled with the doubled timeout. An
    /// exhausted entry is removed.
    pub fn pop_due(&mut self, now: Instant) -> Option<(PeerId, Action)> {
        let (&key, &peer) = self.deadlines.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.deadlines.remove(&key);

        let Some(mut entry) = self.entries.remove(&peer) else {
            return None;
        };

        if !entry.backoff.can_retry() {
            return Some((peer, Action::Abort));
        }

        entry.backoff.attempt(&mut self.rng);
        entry.key = self.next_key(now + entry.backoff.rto());
        self.deadlines.insert(entry.key, peer);
        self.entries.insert(peer, entry);

        Some((peer, Action::Retransmit))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_key(&mut self, at: Instant) -> (Instant, u64) {
        self.serial += 1;
        (at, self.serial)
    }
}

impl std::fmt::Debug for RetransmissionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetransmissionScheduler")
            .field("armed", &self.entries.len())
            .field("next", &self.next_deadline())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::opaque(&[n]).unwrap()
    }

    fn scheduler(retries: usize) -> RetransmissionScheduler {
        RetransmissionScheduler::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            retries,
            Duration::ZERO,
            SeededRng::new(Some(1)),
        )
    }

    #[test]
    fn attempts_with_jitter() {
        let mut rng = SeededRng::new(Some(42));
        let mut exp = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            5,
            Duration::from_millis(250),
            &mut rng,
        );

        let mut last = exp.rto();
        for _ in 0..5 {
            assert!(exp.can_retry());
            exp.attempt(&mut rng);
            let n = exp.rto();
            assert_eq!(exp.rto(), n);
            assert!(n > last);
            last = n;
        }
        assert!(!exp.can_retry());

        exp.attempt(&mut rng);
        assert_eq!(exp.rto(), last);
    }

    #[test]
    fn exact_doubling_is_capped() {
        let mut rng = SeededRng::new(None);
        let mut exp = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            6,
            Duration::ZERO,
            &mut rng,
        );
        let mut seen = vec![exp.rto().as_secs()];
        while exp.can_retry() {
            exp.attempt(&mut rng);
            seen.push(exp.rto().as_secs());
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn retransmits_then_aborts() {
        let now = Instant::now();
        let mut s = scheduler(2);
        s.arm(peer(1), now);

        assert_eq!(s.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(s.pop_due(now), None);

        let t1 = now + Duration::from_secs(1);
        assert_eq!(s.pop_due(t1), Some((peer(1), Action::Retransmit)));
        let t2 = t1 + Duration::from_secs(2);
        assert_eq!(s.next_deadline(), Some(t2));

        assert_eq!(s.pop_due(t2), Some((peer(1), Action::Retransmit)));
        let t3 = t2 + Duration::from_secs(4);
        assert_eq!(s.pop_due(t3), Some((peer(1), Action::Abort)));
        assert!(!s.is_armed(&peer(1)));
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn rearm_replaces_entry() {
        let now = Instant::now();
        let mut s = scheduler(3);
        s.arm(peer(1), now);
        s.arm(peer(1), now + Duration::from_secs(5));
        assert_eq!(s.len(), 1);
        assert_eq!(s.next_deadline(), Some(now + Duration::from_secs(6)));
    }

    #[test]
    fn due_entries_in_deadline_order() {
        let now = Instant::now();
        let mut s = scheduler(3);
        s.arm(peer(2), now + Duration::from_millis(10));
        s.arm(peer(1), now);
        s.arm(peer(3), now);
        s.cancel(&peer(3));

        let later = now + Duration::from_secs(2);
        assert_eq!(s.pop_due(later).map(|(p, _)| p), Some(peer(1)));
        assert_eq!(s.pop_due(later).map(|(p, _)| p), Some(peer(2)));
        assert_eq!(s.pop_due(later), None);
    }
}
