//! Timer facade.
//!
//! Timers are one-shot and never cancelled. Each armed timer carries a
//! [`TimerToken`]: its tag plus the epoch of the proposal it belongs to. A
//! machine bumps its epoch whenever it leaves the state a timer was armed
//! for, so a late firing is recognised as stale and ignored.

use crate::command::Command;
use serde::Serialize;
use std::time::Duration;

/// Which timeout a timer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimerTag {
    /// Initiator: retune after acknowledging a proposal
    AckDelay,
    /// Responder: ChangeAck did not arrive in time
    ChangeAckTimeout,
    /// Responder: VerifyAck did not arrive in time
    VerifyAckTimeout,
}

/// Payload handed to the timer service and returned on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerToken {
    pub tag: TimerTag,
    pub epoch: u32,
}

/// Per-session epoch counter that issues and validates timer tokens.
#[derive(Debug, Clone, Default)]
pub struct TimerFacade {
    epoch: u32,
}

impl TimerFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the command that arms `tag` for the current epoch.
    pub fn arm(&self, tag: TimerTag, delay: Duration) -> Command {
        Command::ArmTimer {
            token: TimerToken {
                tag,
                epoch: self.epoch,
            },
            delay,
        }
    }

    /// Invalidates every timer armed so far.
    pub fn advance(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// True if `token` was armed in the current epoch.
    pub fn is_current(&self, token: TimerToken) -> bool {
        token.epoch == self.epoch
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_carries_current_epoch() {
        let mut timers = TimerFacade::new();
        timers.advance();
        match timers.arm(TimerTag::ChangeAckTimeout, Duration::from_millis(200)) {
            Command::ArmTimer { token, delay } => {
                assert_eq!(token.tag, TimerTag::ChangeAckTimeout);
                assert_eq!(token.epoch, 1);
                assert_eq!(delay, Duration::from_millis(200));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_advance_makes_tokens_stale() {
        let mut timers = TimerFacade::new();
        let token = TimerToken {
            tag: TimerTag::VerifyAckTimeout,
            epoch: timers.epoch(),
        };
        assert!(timers.is_current(token));

        timers.advance();
        assert!(!timers.is_current(token));
    }
}
