use crate::state::SyncStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDecision {
    /// Start a fetch tagged with this generation.
    Fetch { generation: u64 },
    /// A fetch is already in flight; this tick is dropped.
    Skipped,
    /// Not running (closed or never started).
    Idle,
}

/// Bookkeeping for the poll loop: timer token, in-flight guard and the generation that
/// tags every fetch so results from a stopped scheduler can be told apart.
#[derive(Debug)]
pub struct SyncScheduler {
    running: bool,
    generation: u64,
    poll_token: u64,
    in_flight: bool,
    refetch_queued: bool,
    window_limit: usize,
    status: SyncStatus,
}

impl SyncScheduler {
    pub fn new(window_limit: usize) -> Self {
        Self {
            running: false,
            generation: 0,
            poll_token: 0,
            in_flight: false,
            refetch_queued: false,
            window_limit,
            status: SyncStatus::default(),
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        self.generation = self.generation.saturating_add(1);
        self.in_flight = false;
        self.refetch_queued = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.generation = self.generation.saturating_add(1);
        self.poll_token = self.poll_token.saturating_add(1);
        self.in_flight = false;
        self.refetch_queued = false;
        self.status.is_syncing = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn window_limit(&self) -> usize {
        self.window_limit
    }

    pub fn grow_window(&mut self, by: usize) {
        self.window_limit = self.window_limit.saturating_add(by);
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// New timer token; older pending ticks become no-ops.
    pub fn arm_poll(&mut self) -> u64 {
        self.poll_token = self.poll_token.saturating_add(1);
        self.poll_token
    }

    pub fn is_current_poll(&self, token: u64) -> bool {
        self.running && token == self.poll_token
    }

    /// Regular tick: never overlaps a running fetch.
    pub fn begin_tick(&mut self) -> TickDecision {
        if !self.running {
            return TickDecision::Idle;
        }
        if self.in_flight {
            self.status.ticks_skipped = self.status.ticks_skipped.saturating_add(1);
            return TickDecision::Skipped;
        }
        self.in_flight = true;
        self.status.is_syncing = true;
        TickDecision::Fetch {
            generation: self.generation,
        }
    }

    /// Out-of-band fetch (foreground, history growth). If a fetch is running, one more
    /// is queued for when it finishes instead of overlapping it.
    pub fn force(&mut self) -> TickDecision {
        if self.running && self.in_flight {
            self.refetch_queued = true;
            return TickDecision::Skipped;
        }
        self.begin_tick()
    }

    /// Accept a fetch result. `None` means it is stale and must be dropped; otherwise
    /// the flag says whether a queued refetch should start now.
    pub fn finish(&mut self, generation: u64) -> Option<bool> {
        if !self.running || generation != self.generation {
            return None;
        }
        self.in_flight = false;
        self.status.is_syncing = false;
        Some(std::mem::replace(&mut self.refetch_queued, false))
    }

    pub fn record_success(&mut self, now: i64) {
        self.status.last_synced_at = Some(now);
        self.status.consecutive_failures = 0;
        self.status.merges = self.status.merges.saturating_add(1);
    }

    /// Returns the failure streak including this one.
    pub fn record_failure(&mut self) -> u32 {
        self.status.consecutive_failures = self.status.consecutive_failures.saturating_add(1);
        self.status.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_tick_is_skipped() {
        let mut s = SyncScheduler::new(50);
        s.start();
        let TickDecision::Fetch { generation } = s.begin_tick() else {
            panic!("first tick should fetch");
        };
        assert_eq!(s.begin_tick(), TickDecision::Skipped);
        assert_eq!(s.status().ticks_skipped, 1);
        assert_eq!(s.finish(generation), Some(false));
        assert!(matches!(s.begin_tick(), TickDecision::Fetch { .. }));
    }

    #[test]
    fn force_during_fetch_queues_one_refetch() {
        let mut s = SyncScheduler::new(50);
        s.start();
        let TickDecision::Fetch { generation } = s.begin_tick() else {
            panic!("expected fetch");
        };
        assert_eq!(s.force(), TickDecision::Skipped);
        assert_eq!(s.force(), TickDecision::Skipped);
        assert_eq!(s.finish(generation), Some(true));
        assert!(matches!(s.force(), TickDecision::Fetch { .. }));
    }

    #[test]
    fn results_after_stop_are_stale() {
        let mut s = SyncScheduler::new(50);
        s.start();
        let token = s.arm_poll();
        let TickDecision::Fetch { generation } = s.begin_tick() else {
            panic!("expected fetch");
        };
        s.stop();
        assert_eq!(s.finish(generation), None);
        assert!(!s.is_current_poll(token));
        assert_eq!(s.begin_tick(), TickDecision::Idle);
    }

    #[test]
    fn failure_streak_resets_on_success() {
        let mut s = SyncScheduler::new(50);
        assert_eq!(s.record_failure(), 1);
        assert_eq!(s.record_failure(), 2);
        s.record_success(1_000);
        assert_eq!(s.status().consecutive_failures, 0);
        assert_eq!(s.status().last_synced_at, Some(1_000));
        assert_eq!(s.record_failure(), 1);
    }
}
