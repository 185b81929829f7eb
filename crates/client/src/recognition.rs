//! Debounced recognizer lifecycle
//!
//! Speech engines shut down asynchronously: a start issued while the previous
//! run is still stopping either fails or produces two overlapping runs. The
//! gate only issues a start once the previous stop has settled *and* the
//! debounce window since that stop has elapsed. Restart timers carry a token
//! so a timer that fires after a newer stop is ignored.

use std::time::Duration;
use tokio::time::Instant;

/// Where the recognizer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognitionState {
    /// Not running
    #[default]
    Idle,
    /// Running and producing transcripts
    Running,
    /// Stop requested, waiting for the engine to settle
    Stopping {
        /// A start was requested while stopping
        restart: bool,
    },
    /// Stop settled, waiting out the debounce window
    Restarting { token: u64 },
    /// Engine failed; captioning is off for this session
    Unavailable,
}

/// Instruction for whoever drives the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionCommand {
    Start,
    Stop,
    /// Deliver `restart_due(token)` after `after`
    ScheduleRestart { after: Duration, token: u64 },
}

/// Start/stop debouncer for one session's recognizer
#[derive(Debug, Clone)]
pub struct RecognitionGate {
    state: RecognitionState,
    debounce: Duration,
    last_stop: Option<Instant>,
    next_token: u64,
}

impl RecognitionGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: RecognitionState::Idle,
            debounce,
            last_stop: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    /// Whether transcripts should currently be accepted
    pub fn is_running(&self) -> bool {
        self.state == RecognitionState::Running
    }

    /// Whether the engine may still hold resources that need a stop
    pub fn needs_stop(&self) -> bool {
        matches!(self.state, RecognitionState::Running)
    }

    /// Microphone turned on
    pub fn request_start(&mut self, now: Instant) -> Option<RecognitionCommand> {
        match self.state {
            RecognitionState::Idle => Some(self.start_or_schedule(now)),
            RecognitionState::Stopping { .. } => {
                self.state = RecognitionState::Stopping { restart: true };
                None
            }
            RecognitionState::Running
            | RecognitionState::Restarting { .. }
            | RecognitionState::Unavailable => None,
        }
    }

    /// Microphone turned off
    pub fn request_stop(&mut self, now: Instant) -> Option<RecognitionCommand> {
        match self.state {
            RecognitionState::Running => {
                self.state = RecognitionState::Stopping { restart: false };
                self.last_stop = Some(now);
                Some(RecognitionCommand::Stop)
            }
            RecognitionState::Stopping { .. } => {
                self.state = RecognitionState::Stopping { restart: false };
                None
            }
            RecognitionState::Restarting { .. } => {
                // Dropping the token cancels the pending restart
                self.state = RecognitionState::Idle;
                None
            }
            RecognitionState::Idle | RecognitionState::Unavailable => None,
        }
    }

    /// The engine finished stopping
    pub fn stopped(&mut self, now: Instant) -> Option<RecognitionCommand> {
        match self.state {
            RecognitionState::Stopping { restart: true } => Some(self.start_or_schedule(now)),
            RecognitionState::Stopping { restart: false } => {
                self.state = RecognitionState::Idle;
                None
            }
            RecognitionState::Running => {
                // Engine ended on its own while the mic is on; restart it
                self.last_stop = Some(now);
                Some(self.start_or_schedule(now))
            }
            RecognitionState::Idle
            | RecognitionState::Restarting { .. }
            | RecognitionState::Unavailable => None,
        }
    }

    /// A scheduled restart timer fired
    pub fn restart_due(&mut self, token: u64, now: Instant) -> Option<RecognitionCommand> {
        match self.state {
            RecognitionState::Restarting { token: current } if current == token => {
                Some(self.start_or_schedule(now))
            }
            _ => None,
        }
    }

    /// The engine reported a failure
    pub fn failed(&mut self) {
        self.state = RecognitionState::Unavailable;
    }

    /// Session ended; returns a stop if the engine is still running
    pub fn shutdown(&mut self) -> Option<RecognitionCommand> {
        let command = self.needs_stop().then_some(RecognitionCommand::Stop);
        if self.state != RecognitionState::Unavailable {
            self.state = RecognitionState::Idle;
        }
        command
    }

    fn start_or_schedule(&mut self, now: Instant) -> RecognitionCommand {
        let remaining = self
            .last_stop
            .map(|stopped_at| self.debounce.saturating_sub(now.saturating_duration_since(stopped_at)))
            .unwrap_or(Duration::ZERO);

        if remaining.is_zero() {
            self.state = RecognitionState::Running;
            RecognitionCommand::Start
        } else {
            self.next_token += 1;
            let token = self.next_token;
            self.state = RecognitionState::Restarting { token };
            RecognitionCommand::ScheduleRestart {
                after: remaining,
                token,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_first_start_is_immediate() {
        let mut gate = RecognitionGate::new(WINDOW);
        assert_eq!(
            gate.request_start(Instant::now()),
            Some(RecognitionCommand::Start)
        );
        assert!(gate.is_running());
    }

    #[test]
    fn test_quick_toggle_waits_for_settle_and_window() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);

        assert_eq!(gate.request_stop(t0), Some(RecognitionCommand::Stop));
        assert_eq!(gate.request_start(t0 + Duration::from_millis(50)), None);

        // Stop settles 80ms after it was issued; 420ms of the window remain
        let command = gate.stopped(t0 + Duration::from_millis(80));
        assert_eq!(
            command,
            Some(RecognitionCommand::ScheduleRestart {
                after: Duration::from_millis(420),
                token: 1,
            })
        );

        assert_eq!(
            gate.restart_due(1, t0 + Duration::from_millis(500)),
            Some(RecognitionCommand::Start)
        );
        assert!(gate.is_running());
    }

    #[test]
    fn test_late_settle_restarts_immediately() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);
        gate.request_stop(t0);
        gate.request_start(t0 + Duration::from_millis(10));

        assert_eq!(
            gate.stopped(t0 + Duration::from_millis(700)),
            Some(RecognitionCommand::Start)
        );
    }

    #[test]
    fn test_stop_cancels_pending_restart() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);
        gate.request_stop(t0);
        gate.request_start(t0);
        gate.stopped(t0 + Duration::from_millis(10));

        assert_eq!(gate.request_stop(t0 + Duration::from_millis(20)), None);
        assert_eq!(gate.restart_due(1, t0 + Duration::from_millis(500)), None);
        assert_eq!(gate.state(), RecognitionState::Idle);
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);
        gate.request_stop(t0);
        gate.request_start(t0);
        gate.stopped(t0);
        gate.request_stop(t0);
        gate.request_start(t0 + Duration::from_millis(100));

        // Second schedule gets a fresh token; the first one no longer applies
        assert!(matches!(
            gate.state(),
            RecognitionState::Restarting { token: 2 }
        ));
        assert_eq!(gate.restart_due(1, t0 + Duration::from_millis(600)), None);
        assert_eq!(
            gate.restart_due(2, t0 + Duration::from_millis(600)),
            Some(RecognitionCommand::Start)
        );
    }

    #[test]
    fn test_repeated_toggles_never_overlap() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);

        let mut starts = 0;
        for i in 0..5u64 {
            let at = t0 + Duration::from_millis(i * 10);
            if gate.request_stop(at) == Some(RecognitionCommand::Start) {
                starts += 1;
            }
            if gate.request_start(at) == Some(RecognitionCommand::Start) {
                starts += 1;
            }
        }
        assert_eq!(starts, 0);
        assert_eq!(gate.state(), RecognitionState::Stopping { restart: true });
    }

    #[test]
    fn test_failure_disables_gate() {
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(Instant::now());
        gate.failed();

        assert_eq!(gate.request_stop(Instant::now()), None);
        assert_eq!(gate.request_start(Instant::now()), None);
        assert_eq!(gate.shutdown(), None);
        assert_eq!(gate.state(), RecognitionState::Unavailable);
    }

    #[test]
    fn test_engine_ending_on_its_own_restarts_after_window() {
        let t0 = Instant::now();
        let mut gate = RecognitionGate::new(WINDOW);
        gate.request_start(t0);

        assert!(matches!(
            gate.stopped(t0 + Duration::from_secs(3)),
            Some(RecognitionCommand::ScheduleRestart { after, .. }) if after == WINDOW
        ));
    }
}
