use std::sync::Mutex;
use std::time::Instant;

use crate::util::clamp01;

/// Monotonic time source, in seconds. Never wall-clock time.
pub trait ClockSource: Send + Sync + 'static {
    fn now(&self) -> f64;
}

/// Production clock backed by `Instant`, anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for headless runs and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = t;
    }

    pub fn advance(&self, secs: f64) -> f64 {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += secs;
        *now
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Absolute beep schedule for one running test.
///
/// Every time here is in the clock-source time base. Pausing shifts
/// `next_beep_at` by exactly the paused duration, so a pause/resume cycle
/// neither loses nor gains time on the schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClock {
    start_time: f64,
    total_paused: f64,
    pause_started_at: Option<f64>,
    next_beep_at: f64,
}

impl SessionClock {
    /// Anchor the schedule at `now`; the first boundary is one shuttle away.
    pub fn start(now: f64, first_shuttle_secs: f64) -> Self {
        Self {
            start_time: now,
            total_paused: 0.0,
            pause_started_at: None,
            next_beep_at: now + first_shuttle_secs,
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn total_paused(&self) -> f64 {
        self.total_paused
    }

    pub fn next_beep_at(&self) -> f64 {
        self.next_beep_at
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started_at.is_some()
    }

    pub fn time_until_next_beep(&self, now: f64) -> f64 {
        self.next_beep_at - now
    }

    /// True once the next boundary falls inside the look-ahead window.
    pub fn is_due(&self, now: f64, look_ahead: f64) -> bool {
        !self.is_paused() && self.time_until_next_beep(now) < look_ahead
    }

    /// Push the schedule one shuttle further and return the boundary just
    /// crossed, which is where its tone belongs.
    pub fn advance(&mut self, shuttle_secs: f64) -> f64 {
        let crossed = self.next_beep_at;
        self.next_beep_at += shuttle_secs;
        crossed
    }

    pub fn pause(&mut self, now: f64) {
        if self.pause_started_at.is_none() {
            self.pause_started_at = Some(now);
        }
    }

    /// Returns the length of the pause that just ended.
    pub fn resume(&mut self, now: f64) -> f64 {
        match self.pause_started_at.take() {
            Some(paused_at) => {
                let elapsed = (now - paused_at).max(0.0);
                self.total_paused += elapsed;
                self.next_beep_at += elapsed;
                elapsed
            }
            None => 0.0,
        }
    }

    /// Seconds actually spent running, excluding pauses.
    pub fn active_elapsed(&self, now: f64) -> f64 {
        let until = self.pause_started_at.unwrap_or(now);
        (until - self.start_time - self.total_paused).max(0.0)
    }

    /// Presentation only: how far through the current shuttle we are.
    pub fn progress_fraction(&self, now: f64, shuttle_secs: f64) -> f64 {
        if shuttle_secs <= 0.0 {
            return 0.0;
        }
        let now = self.pause_started_at.unwrap_or(now);
        clamp01((shuttle_secs - self.time_until_next_beep(now)) / shuttle_secs)
    }
}
