//! The session state machine: countdown, drift-free shuttle scheduling,
//! pause/resume, and the per-runner Stop/Warning commands.
//!
//! A `Session` is single-use. Once it reaches `Finished`, a new test is a new
//! `Session`; nothing is reset in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SessionClock;
use crate::cues::{Announcer, ToneKind, ToneOutput};
use crate::error::SessionError;
use crate::participant::{
    Athlete, ParticipantId, ParticipantOutcome, ParticipantRegistry, StopReason, StopSnapshot,
};
use crate::protocol::{ProtocolLevel, ProtocolTable, SHUTTLE_METRES};
use crate::scoring::TestReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum Phase {
    Idle,
    Countdown,
    Running,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum EndReason {
    #[strum(serialize = "protocol complete")]
    ProtocolExhausted,
    #[strum(serialize = "all runners finished")]
    AllParticipantsFinished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// whole seconds announced before the first shuttle
    pub countdown_steps: u32,
    /// boundaries closer than this are treated as reached
    pub look_ahead: f64,
    /// delay between Finished and building reports
    pub report_grace: Duration,
    pub tick_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            countdown_steps: 5,
            look_ahead: 0.1,
            report_grace: Duration::from_millis(1500),
            tick_interval: Duration::from_micros(16_667),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub level_index: usize,
    pub shuttle_index: usize,
    pub total_distance_m: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            level_index: 0,
            shuttle_index: 0,
            total_distance_m: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Countdown {
    remaining: u32,
    next_step_at: f64,
}

/// What one heartbeat did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub crossings: u32,
    pub level_changed: bool,
    pub started: bool,
    pub finished: bool,
}

pub struct Session {
    protocol: Arc<ProtocolTable>,
    settings: EngineSettings,
    state: SessionState,
    clock: Option<SessionClock>,
    countdown: Option<Countdown>,
    registry: ParticipantRegistry,
    tones: Arc<dyn ToneOutput>,
    speech: Arc<dyn Announcer>,
    end: Option<(EndReason, f64)>,
    reports_taken: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("protocol", &self.protocol.name)
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("registry", &self.registry)
            .field("end", &self.end)
            .finish()
    }
}

impl Session {
    /// "Begin test": validates the protocol and roster up front so nothing
    /// can fail once the clock is running.
    pub fn new(
        protocol: Arc<ProtocolTable>,
        roster: Vec<Athlete>,
        settings: EngineSettings,
        tones: Arc<dyn ToneOutput>,
        speech: Arc<dyn Announcer>,
    ) -> Result<Self, SessionError> {
        protocol.validate()?;
        let registry = ParticipantRegistry::from_roster(roster)?;

        Ok(Self {
            protocol,
            settings,
            state: SessionState::default(),
            clock: None,
            countdown: None,
            registry,
            tones,
            speech,
            end: None,
            reports_taken: false,
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn clock(&self) -> Option<&SessionClock> {
        self.clock.as_ref()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn protocol(&self) -> &ProtocolTable {
        &self.protocol
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end.map(|(reason, _)| reason)
    }

    pub fn finished_at(&self) -> Option<f64> {
        self.end.map(|(_, at)| at)
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining)
    }

    fn current_entry(&self) -> &ProtocolLevel {
        // level_index is kept in range by tick(), and validate() rules out an empty table
        &self.protocol.levels()[self.state.level_index]
    }

    /// 1-based level number currently being run.
    pub fn current_level(&self) -> u32 {
        self.current_entry().level
    }

    /// 1-based shuttle within the current level.
    pub fn current_shuttle(&self) -> u32 {
        self.state.shuttle_index as u32 + 1
    }

    pub fn current_speed_kmh(&self) -> f64 {
        self.current_entry().speed_kmh
    }

    pub fn active_participant_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Presentation only; never feeds back into scheduling.
    pub fn progress_fraction(&self, now: f64) -> f64 {
        match (self.state.phase, &self.clock) {
            (Phase::Running | Phase::Paused, Some(clock)) => {
                clock.progress_fraction(now, self.current_entry().time_per_shuttle)
            }
            (Phase::Finished, Some(_)) => 1.0,
            _ => 0.0,
        }
    }

    pub fn active_elapsed(&self, now: f64) -> f64 {
        let until = self.finished_at().unwrap_or(now);
        self.clock
            .as_ref()
            .map(|c| c.active_elapsed(until))
            .unwrap_or(0.0)
    }

    pub fn start(&mut self, now: f64) -> bool {
        if self.state.phase != Phase::Idle {
            debug!(phase = %self.state.phase, "start ignored");
            return false;
        }

        info!(
            protocol = %self.protocol.name,
            participants = self.registry.len(),
            "session starting"
        );
        if self.settings.countdown_steps == 0 {
            self.begin_running(now);
        } else {
            self.state.phase = Phase::Countdown;
            self.countdown = Some(Countdown {
                remaining: self.settings.countdown_steps,
                next_step_at: now + 1.0,
            });
            self.speech
                .announce(&self.settings.countdown_steps.to_string());
        }
        true
    }

    /// Driven by the Tick Driver: counts down, then schedules shuttles.
    pub fn heartbeat(&mut self, now: f64) -> TickOutcome {
        match self.state.phase {
            Phase::Countdown => {
                let started = self.advance_countdown(now);
                let mut outcome = self.tick(now);
                outcome.started = started;
                outcome
            }
            Phase::Running => self.tick(now),
            _ => TickOutcome::default(),
        }
    }

    fn advance_countdown(&mut self, now: f64) -> bool {
        while let Some(mut countdown) = self.countdown {
            if now < countdown.next_step_at {
                return false;
            }
            countdown.remaining = countdown.remaining.saturating_sub(1);
            countdown.next_step_at += 1.0;

            if countdown.remaining == 0 {
                self.countdown = None;
                self.begin_running(now);
                return true;
            }
            self.speech.announce(&countdown.remaining.to_string());
            self.countdown = Some(countdown);
        }
        false
    }

    /// The one place the session clock is anchored.
    fn begin_running(&mut self, now: f64) {
        let first = self.protocol.levels()[0];
        self.clock = Some(SessionClock::start(now, first.time_per_shuttle));
        self.state = SessionState {
            phase: Phase::Running,
            ..SessionState::default()
        };

        info!(start_time = now, "countdown complete, test running");
        self.tones.play_tone(ToneKind::Shuttle, now);
        self.speech.announce(&format!("Level {}", first.level));
    }

    /// Scheduler step. Crosses every boundary already inside the look-ahead
    /// window, so a late heartbeat catches up instead of drifting.
    pub fn tick(&mut self, now: f64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.state.phase != Phase::Running {
            return outcome;
        }

        let look_ahead = self.settings.look_ahead;
        while self.state.phase == Phase::Running {
            let Some(clock) = self.clock.as_mut() else {
                break;
            };
            if !clock.is_due(now, look_ahead) {
                break;
            }

            self.state.total_distance_m += SHUTTLE_METRES;
            self.state.shuttle_index += 1;
            let mut level_changed = false;
            let shuttles = self.protocol.levels()[self.state.level_index].shuttles as usize;
            if self.state.shuttle_index >= shuttles {
                self.state.level_index += 1;
                self.state.shuttle_index = 0;
                level_changed = true;
            }
            outcome.crossings += 1;

            let Some(entry) = self.protocol.get(self.state.level_index).copied() else {
                let crossed = clock.next_beep_at();
                self.exhaust_protocol(crossed, now);
                outcome.finished = true;
                break;
            };

            let crossed = clock.advance(entry.time_per_shuttle);
            debug!(
                level = entry.level,
                shuttle = self.state.shuttle_index + 1,
                at = crossed,
                "boundary crossed"
            );
            if level_changed {
                outcome.level_changed = true;
                self.tones.play_tone(ToneKind::LevelUp, crossed);
                self.speech.announce(&format!("Level {}", entry.level));
            } else {
                self.tones.play_tone(ToneKind::Shuttle, crossed);
            }
        }
        outcome
    }

    fn exhaust_protocol(&mut self, crossed: f64, now: f64) {
        let last = self.protocol.levels()[self.protocol.len() - 1];
        // park the indices on the final shuttle so projections stay in range
        self.state.level_index = self.protocol.len() - 1;
        self.state.shuttle_index = last.shuttles as usize - 1;

        let snapshot = StopSnapshot {
            level: last.level,
            shuttle: last.shuttles,
            distance_m: self.state.total_distance_m,
            timestamp: now,
        };
        let completed = self
            .registry
            .finish_all_running(snapshot, StopReason::ProtocolComplete);
        debug!(completed, "protocol exhausted");

        self.tones.play_tone(ToneKind::Stop, crossed);
        self.finish(EndReason::ProtocolExhausted, now);
    }

    fn finish(&mut self, reason: EndReason, now: f64) {
        if self.state.phase == Phase::Finished {
            return;
        }
        self.state.phase = Phase::Finished;
        self.countdown = None;
        self.end = Some((reason, now));

        info!(%reason, distance_m = self.state.total_distance_m, "session finished");
        self.speech.announce("Test complete");
    }

    pub fn pause(&mut self, now: f64) -> bool {
        if self.state.phase != Phase::Running {
            debug!(phase = %self.state.phase, "pause ignored");
            return false;
        }
        if let Some(clock) = self.clock.as_mut() {
            clock.pause(now);
        }
        self.state.phase = Phase::Paused;
        info!(at = now, "paused");
        true
    }

    pub fn resume(&mut self, now: f64) -> bool {
        if self.state.phase != Phase::Paused {
            debug!(phase = %self.state.phase, "resume ignored");
            return false;
        }
        let paused_for = self.clock.as_mut().map(|c| c.resume(now)).unwrap_or(0.0);
        self.state.phase = Phase::Running;
        info!(at = now, paused_for, "resumed");
        true
    }

    pub fn set_volume(&self, level: f32) {
        self.tones.set_volume(level);
    }

    /// Where a runner stopping right now would be scored.
    pub fn snapshot(&self, now: f64) -> StopSnapshot {
        StopSnapshot {
            level: self.current_level(),
            shuttle: self.current_shuttle(),
            distance_m: self.state.total_distance_m,
            timestamp: now,
        }
    }

    fn accepts_participant_commands(&self) -> bool {
        matches!(self.state.phase, Phase::Running | Phase::Paused)
    }

    pub fn stop(&mut self, id: ParticipantId, now: f64) -> ParticipantOutcome {
        if !self.accepts_participant_commands() {
            debug!(participant = %id, phase = %self.state.phase, "stop ignored");
            return ParticipantOutcome::SessionInactive;
        }
        let outcome = self.registry.stop(id, self.snapshot(now));
        self.after_participant_command(id, outcome, now);
        outcome
    }

    pub fn record_warning(&mut self, id: ParticipantId, now: f64) -> ParticipantOutcome {
        if !self.accepts_participant_commands() {
            debug!(participant = %id, phase = %self.state.phase, "warning ignored");
            return ParticipantOutcome::SessionInactive;
        }
        let outcome = self.registry.record_warning(id, self.snapshot(now));
        self.after_participant_command(id, outcome, now);
        outcome
    }

    /// Runs with the registry already updated, so the running count seen
    /// here includes the runner who just dropped out.
    fn after_participant_command(
        &mut self,
        id: ParticipantId,
        outcome: ParticipantOutcome,
        now: f64,
    ) {
        match outcome {
            ParticipantOutcome::Warned { count } => {
                self.tones.play_tone(ToneKind::Fail, now);
                debug!(participant = %id, count, "warning recorded");
            }
            ParticipantOutcome::Stopped(snap) | ParticipantOutcome::Eliminated(snap) => {
                self.tones.play_tone(ToneKind::Stop, now);
                if let Some(record) = self.registry.get(id) {
                    self.speech.announce(&format!(
                        "{} out at level {}.{}",
                        record.display_name(),
                        snap.level,
                        snap.shuttle
                    ));
                }
                if self.registry.all_finished() {
                    self.finish(EndReason::AllParticipantsFinished, now);
                }
            }
            ParticipantOutcome::Unknown => debug!(participant = %id, "unknown participant"),
            ParticipantOutcome::AlreadyFinished | ParticipantOutcome::SessionInactive => {}
        }
    }

    /// Reports for every finished runner. Pure; safe to call repeatedly.
    pub fn build_reports(&self, recorded_at: DateTime<Local>) -> Vec<TestReport> {
        self.registry
            .records()
            .iter()
            .filter_map(|r| TestReport::build(r, &self.protocol, recorded_at))
            .collect()
    }

    /// Hands the reports out exactly once, and only after the session finished.
    pub fn take_reports(&mut self, recorded_at: DateTime<Local>) -> Option<Vec<TestReport>> {
        if self.state.phase != Phase::Finished || self.reports_taken {
            return None;
        }
        self.reports_taken = true;
        Some(self.build_reports(recorded_at))
    }
}
