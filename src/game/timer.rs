//! Match Timer
//!
//! Round countdown state machine. The timer only counts while the session
//! phase is in progress; reaching zero forces the pairing step regardless of
//! in-flight overworld actions.

use serde::{Serialize, Deserialize};

/// Timer state machine.
///
/// `Running -> Expired -> Pairing -> (next round) Running`, with `Done`
/// terminal once the roster reports a single survivor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TimerState {
    /// Counting down the overworld phase of a round.
    Running = 0,
    /// Countdown reached zero; pairing is about to run.
    Expired = 1,
    /// Battles for this round are in flight.
    Pairing = 2,
    /// Session over; the timer never restarts.
    Done = 3,
}

/// Per-round countdown.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MatchTimer {
    /// Current state.
    pub state: TimerState,
    /// Ticks left in the current countdown.
    pub remaining_ticks: u32,
    /// Full round duration, used on reset.
    pub duration_ticks: u32,
}

impl MatchTimer {
    /// Create a timer for the first round.
    pub fn new(duration_ticks: u32) -> Self {
        Self {
            state: TimerState::Running,
            remaining_ticks: duration_ticks,
            duration_ticks,
        }
    }

    /// Advance one tick. Returns `true` on the tick the countdown expires.
    pub fn tick(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        if self.remaining_ticks == 0 {
            self.state = TimerState::Expired;
            return true;
        }
        false
    }

    /// Transition `Expired -> Pairing` once battle instances exist.
    pub fn begin_pairing(&mut self) {
        if self.state == TimerState::Expired {
            self.state = TimerState::Pairing;
        }
    }

    /// Restart the countdown for the next round.
    pub fn reset(&mut self) {
        self.state = TimerState::Running;
        self.remaining_ticks = self.duration_ticks;
    }

    /// Terminal transition; a single survivor remains.
    pub fn complete(&mut self) {
        self.state = TimerState::Done;
    }

    /// Remaining whole seconds, rounded up (for TIMER_SYNC broadcasts).
    pub fn remaining_secs(&self, tick_rate: u32) -> u32 {
        if tick_rate == 0 {
            return 0;
        }
        self.remaining_ticks.div_ceil(tick_rate)
    }
}
