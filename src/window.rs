/// Sliding replay window for record sequence numbers.
///
/// Tracks the highest accepted sequence number and a 64-bit bitmap of the
/// 64 sequence numbers ending at it. Bit 0 is the highest itself.
///
/// Checking and marking are separate so a record is only marked once it has
/// authenticated. Each epoch has its own window.
#[derive(Debug, Default, Clone)]
pub struct AntiReplayWindow {
    max_seq: u64,
    window: u64,
}

/// Number of sequence numbers tracked behind the highest.
const WINDOW_SIZE: u64 = 64;

impl AntiReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seqno` is fresh: ahead of the window, or inside it and unseen.
    pub fn check(&self, seqno: u64) -> bool {
        if self.window == 0 || seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= WINDOW_SIZE {
            return false;
        }
        self.window & (1 << offset) == 0
    }

    /// Mark `seqno` as seen, sliding the window forward if it is ahead.
    ///
    /// Must only be called for a sequence number that passed [`check`](Self::check).
    pub fn update(&mut self, seqno: u64) {
        if self.window == 0 {
            self.max_seq = seqno;
            self.window = 1;
        } else if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= WINDOW_SIZE {
                1
            } else {
                (self.window << delta) | 1
            };
            self.max_seq = seqno;
        } else {
            let offset = self.max_seq - seqno;
            if offset < WINDOW_SIZE {
                self.window |= 1 << offset;
            }
        }
    }

    /// `check` followed by `update` when fresh.
    #[cfg(test)]
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.check(seqno) {
            return false;
        }
        self.update(seqno);
        true
    }

    /// Highest sequence number accepted so far, if any.
    #[cfg(test)]
    pub fn max_seq(&self) -> Option<u64> {
        (self.window != 0).then_some(self.max_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_and_rejects_duplicate() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(1));
        assert!(!w.check_and_update(1));
        assert!(w.check_and_update(2));
    }

    #[test]
    fn sequence_zero_is_accepted_once() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(!w.check_and_update(0));
        assert_eq!(w.max_seq(), Some(0));
    }

    #[test]
    fn accepts_out_of_order_within_window() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(8));
        assert!(!w.check_and_update(8));
        assert!(w.check_and_update(9));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(100));
        // offset = 64 -> too old
        assert!(!w.check_and_update(36));
        // offset = 63 -> allowed once
        assert!(w.check_and_update(37));
        assert!(!w.check_and_update(37));
    }

    #[test]
    fn large_jump_clears_stale_bits() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(1));
        assert!(w.check_and_update(2));
        assert!(w.check_and_update(200));
        // 199..=137 were never seen and must not inherit bits from 1 and 2
        assert!(w.check(199));
        assert!(w.check(137));
        assert!(!w.check(136));
        assert!(!w.check(200));
    }

    #[test]
    fn jump_of_exactly_window_size() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(w.check_and_update(64));
        assert!(!w.check(0));
        assert!(w.check(1));
    }

    #[test]
    fn check_does_not_mark() {
        let mut w = AntiReplayWindow::new();
        assert!(w.check(5));
        assert!(w.check(5));
        w.update(5);
        assert!(!w.check(5));
    }
}
