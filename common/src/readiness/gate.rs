// Readiness state machine: WAITING -> {READY, TIMED_OUT}
//
// Pure bookkeeping over tick results; no I/O and no clock of its own.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Waiting,
    Ready,
    TimedOut,
}

impl ReadinessState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReadinessState::Waiting)
    }
}

/// Outcome of one probe within a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub url: String,
    pub ready: bool,
}

/// Tracks the most recent tick and decides transitions
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    deadline: Duration,
    state: ReadinessState,
    last_tick: Vec<ProbeResult>,
    ticks: u32,
}

impl ReadinessGate {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            state: ReadinessState::Waiting,
            last_tick: Vec::new(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Feed the results of one tick, observed `elapsed` after entering WAITING
    ///
    /// READY requires every probe of this tick to have succeeded; a tick that
    /// succeeds wins over a deadline reached while it was in flight.
    pub fn observe(&mut self, elapsed: Duration, results: Vec<ProbeResult>) -> ReadinessState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.ticks += 1;
        let all_ready = !results.is_empty() && results.iter().all(|r| r.ready);
        self.last_tick = results;

        self.state = if all_ready {
            ReadinessState::Ready
        } else if elapsed >= self.deadline {
            ReadinessState::TimedOut
        } else {
            ReadinessState::Waiting
        };
        self.state
    }

    /// Check the deadline between ticks
    pub fn expire(&mut self, elapsed: Duration) -> ReadinessState {
        if self.state == ReadinessState::Waiting && elapsed >= self.deadline {
            self.state = ReadinessState::TimedOut;
        }
        self.state
    }

    /// Probes that failed in the most recent tick
    pub fn pending(&self) -> Vec<&ProbeResult> {
        self.last_tick.iter().filter(|r| !r.ready).collect()
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.pending().iter().map(|r| r.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, ready: bool) -> ProbeResult {
        ProbeResult {
            name: name.to_string(),
            url: format!("http://localhost/{}", name),
            ready,
        }
    }

    #[test]
    fn test_ready_when_both_succeed_in_same_tick() {
        let mut gate = ReadinessGate::new(Duration::from_secs(60));
        let state = gate.observe(
            Duration::ZERO,
            vec![result("frontend", true), result("backend", true)],
        );
        assert_eq!(state, ReadinessState::Ready);
        assert_eq!(gate.ticks(), 1);
        assert!(gate.pending().is_empty());
    }

    #[test]
    fn test_success_in_different_ticks_is_not_ready() {
        let mut gate = ReadinessGate::new(Duration::from_secs(60));
        gate.observe(
            Duration::ZERO,
            vec![result("frontend", true), result("backend", false)],
        );
        let state = gate.observe(
            Duration::from_secs(2),
            vec![result("frontend", false), result("backend", true)],
        );
        assert_eq!(state, ReadinessState::Waiting);
        assert_eq!(gate.pending_names(), vec!["frontend".to_string()]);
    }

    #[test]
    fn test_times_out_at_deadline() {
        let mut gate = ReadinessGate::new(Duration::from_secs(5));
        assert_eq!(
            gate.observe(
                Duration::from_secs(4),
                vec![result("frontend", true), result("backend", false)]
            ),
            ReadinessState::Waiting
        );
        assert_eq!(
            gate.observe(
                Duration::from_secs(5),
                vec![result("frontend", true), result("backend", false)]
            ),
            ReadinessState::TimedOut
        );
        assert_eq!(gate.pending_names(), vec!["backend".to_string()]);
    }

    #[test]
    fn test_expire_between_ticks() {
        let mut gate = ReadinessGate::new(Duration::from_secs(5));
        assert_eq!(gate.expire(Duration::from_secs(3)), ReadinessState::Waiting);
        assert_eq!(gate.expire(Duration::from_secs(6)), ReadinessState::TimedOut);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut gate = ReadinessGate::new(Duration::from_secs(5));
        gate.expire(Duration::from_secs(10));
        let state = gate.observe(
            Duration::from_secs(11),
            vec![result("frontend", true), result("backend", true)],
        );
        assert_eq!(state, ReadinessState::TimedOut);
    }

    #[test]
    fn test_empty_tick_is_never_ready() {
        let mut gate = ReadinessGate::new(Duration::from_secs(5));
        assert_eq!(gate.observe(Duration::ZERO, vec![]), ReadinessState::Waiting);
    }
}
