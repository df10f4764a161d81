// src/supervisor.rs
//
// Reconnect state machine. Owns all retry and backoff policy for the link:
// close, wait, then reopen with a bounded number of attempts. Every delay is
// a cancellable sleep.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::io::Link;
use crate::logging::MessageSink;

/// Retry budget and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reopen attempts before giving up
    pub max_attempts: u32,
    /// Wait after a read failure before the first reopen
    pub reconnect_delay: Duration,
    /// Wait between failed reopen attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            reconnect_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connected,
    Reconnecting,
    /// Terminal: attempt budget used up
    Exhausted,
    /// Terminal: cancellation observed
    Cancelled,
}

pub struct ReconnectSupervisor {
    policy: RetryPolicy,
    remaining: u32,
    state: SupervisorState,
}

impl ReconnectSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            remaining: policy.max_attempts,
            state: SupervisorState::Connected,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive the link from a read failure back to `Connected`, or to one of
    /// the terminal states.
    pub fn recover<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        cancel: &CancelToken,
        sink: &dyn MessageSink,
    ) -> SupervisorState {
        if matches!(self.state, SupervisorState::Exhausted | SupervisorState::Cancelled) {
            return self.state;
        }

        self.state = SupervisorState::Reconnecting;
        link.close();

        if !cancel.sleep(self.policy.reconnect_delay) {
            return self.finish(SupervisorState::Cancelled);
        }

        loop {
            if cancel.is_cancelled() {
                return self.finish(SupervisorState::Cancelled);
            }

            match link.open() {
                Ok(()) => {
                    self.remaining = self.policy.max_attempts;
                    sink.info(&format!("Reconnected to {}", link.id()));
                    return self.finish(SupervisorState::Connected);
                }
                Err(e) => {
                    self.remaining = self.remaining.saturating_sub(1);
                    if self.remaining == 0 {
                        sink.error(&format!(
                            "Giving up on {} after {} attempts: {}",
                            link.id(),
                            self.policy.max_attempts,
                            e
                        ));
                        return self.finish(SupervisorState::Exhausted);
                    }
                    sink.warning(&format!(
                        "Reopen of {} failed ({} attempts left): {}",
                        link.id(),
                        self.remaining,
                        e
                    ));
                    if !cancel.sleep(self.policy.retry_delay) {
                        return self.finish(SupervisorState::Cancelled);
                    }
                }
            }
        }
    }

    fn finish(&mut self, state: SupervisorState) -> SupervisorState {
        self.state = state;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::scripted::ScriptedLink;
    use crate::logging::{Level, MemorySink};
    use std::time::Instant;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            reconnect_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.reconnect_delay, Duration::from_secs(5));
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_three_failures_exhaust_budget() {
        let mut link = ScriptedLink::new("COM9", vec![]).with_open_results(vec![false, false, false]);
        let stats = link.stats();
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let mut supervisor = ReconnectSupervisor::new(fast_policy(3));

        let state = supervisor.recover(&mut link, &cancel, &sink);

        assert_eq!(state, SupervisorState::Exhausted);
        assert_eq!(supervisor.remaining_attempts(), 0);
        assert_eq!(stats.lock().unwrap().open_attempts, 3);
        assert!(sink.contains(Level::Error, "Giving up on COM9"));
    }

    #[test]
    fn test_success_resets_budget() {
        // Attempt 1 fails, attempt 2 succeeds
        let mut link = ScriptedLink::new("COM9", vec![]).with_open_results(vec![false, true]);
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let mut supervisor = ReconnectSupervisor::new(fast_policy(3));

        assert_eq!(supervisor.recover(&mut link, &cancel, &sink), SupervisorState::Connected);
        assert_eq!(supervisor.remaining_attempts(), 3);
        assert!(link.is_open());

        // A later failure sequence gets the full budget again
        let mut link = ScriptedLink::new("COM9", vec![]).with_open_results(vec![false, false, true]);
        assert_eq!(supervisor.recover(&mut link, &cancel, &sink), SupervisorState::Connected);
        assert_eq!(supervisor.remaining_attempts(), 3);
    }

    #[test]
    fn test_recover_closes_link_first() {
        let mut link = ScriptedLink::new("COM9", vec![]);
        let stats = link.stats();
        link.open().unwrap();
        let sink = MemorySink::new();
        let mut supervisor = ReconnectSupervisor::new(fast_policy(3));

        supervisor.recover(&mut link, &CancelToken::new(), &sink);

        let stats = stats.lock().unwrap();
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.opens, 2);
    }

    #[test]
    fn test_cancel_during_delay_exits_promptly() {
        let mut link = ScriptedLink::new("COM9", vec![]);
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let mut supervisor = ReconnectSupervisor::new(RetryPolicy {
            max_attempts: 10,
            reconnect_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(30),
        });

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        let state = supervisor.recover(&mut link, &cancel, &sink);
        handle.join().unwrap();

        assert_eq!(state, SupervisorState::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_during_retry_delay() {
        let mut link = ScriptedLink::new("COM9", vec![]).with_open_results(vec![false; 10]);
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let mut supervisor = ReconnectSupervisor::new(RetryPolicy {
            max_attempts: 10,
            reconnect_delay: Duration::ZERO,
            retry_delay: Duration::from_secs(30),
        });

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(supervisor.recover(&mut link, &cancel, &sink), SupervisorState::Cancelled);
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(supervisor.remaining_attempts(), 9);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut link = ScriptedLink::new("COM9", vec![]).with_open_results(vec![false]);
        let sink = MemorySink::new();
        let cancel = CancelToken::new();
        let mut supervisor = ReconnectSupervisor::new(fast_policy(1));

        assert_eq!(supervisor.recover(&mut link, &cancel, &sink), SupervisorState::Exhausted);
        assert_eq!(supervisor.recover(&mut link, &cancel, &sink), SupervisorState::Exhausted);
    }
}
