//! Tick-countdown timers.
//!
//! The engine never reads a wall clock. Each armed timer is advanced by
//! exactly one tick per wakeup, so the timeout resolution floor is
//! `1 / ticks_per_second` seconds. Expiry is detected by the owner checking
//! [Timer::expired] after the tick; re-arming or disarming makes the expiry
//! edge-triggered.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timer {
    ticks: u32,
}

impl Timer {
    #[inline]
    pub const fn new(ticks: u32) -> Self {
        Self { ticks }
    }

    /// Convert a relative second count into ticks using the configured
    /// wakeup rate.
    #[inline]
    pub const fn from_seconds(seconds: u32, ticks_per_second: u32) -> Self {
        Self {
            ticks: seconds * ticks_per_second,
        }
    }

    /// Advance the timer by one tick. Saturates at zero.
    #[inline]
    pub fn tick(&mut self) {
        if self.ticks > 0 {
            self.ticks -= 1;
        }
    }

    #[inline]
    pub const fn expired(&self) -> bool {
        self.ticks == 0
    }

    #[inline]
    pub const fn remaining(&self) -> u32 {
        self.ticks
    }
}
