//! Owns the live session and is the only way to touch it.
//!
//! The Tick Driver thread and UI commands both go through one
//! `Mutex<Session>`, so a heartbeat never observes a half-applied Stop or
//! Warning. Report generation runs on its own thread after the grace period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use chrono::Local;
use tracing::{info, warn};

use crate::clock::ClockSource;
use crate::cues::{Announcer, ToneOutput};
use crate::error::SessionError;
use crate::participant::{
    Athlete, FinalResult, ParticipantId, ParticipantOutcome, ParticipantStatus,
};
use crate::protocol::ProtocolTable;
use crate::reports::ReportStore;
use crate::runtime::{Beat, FixedTicker, TickDriver};
use crate::scoring::TestReport;
use crate::session::{EndReason, EngineSettings, Phase, Session};

/// Everything needed to (re)create a session.
#[derive(Clone)]
pub struct SessionSetup {
    pub protocol: Arc<ProtocolTable>,
    pub roster: Vec<Athlete>,
    pub settings: EngineSettings,
    pub tones: Arc<dyn ToneOutput>,
    pub speech: Arc<dyn Announcer>,
}

impl SessionSetup {
    fn build(&self) -> Result<Session, SessionError> {
        Session::new(
            Arc::clone(&self.protocol),
            self.roster.clone(),
            self.settings,
            Arc::clone(&self.tones),
            Arc::clone(&self.speech),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub assessor: Option<String>,
    pub status: ParticipantStatus,
    pub warnings: u8,
    pub result: Option<FinalResult>,
}

/// Read-only projection for display. Never feeds back into scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub protocol: String,
    pub total_levels: usize,
    pub phase: Phase,
    pub countdown: Option<u32>,
    pub level: u32,
    pub shuttle: u32,
    pub shuttles_in_level: u32,
    pub speed_kmh: f64,
    pub progress: f64,
    pub total_distance_m: f64,
    pub elapsed_secs: f64,
    pub active_participants: usize,
    pub end_reason: Option<EndReason>,
    pub participants: Vec<ParticipantView>,
}

struct Shared {
    session: Mutex<Session>,
    clock: Arc<dyn ClockSource>,
    store: Option<Arc<dyn ReportStore>>,
    reports: Mutex<Vec<TestReport>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
    reports_scheduled: AtomicBool,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn heartbeat(self: &Arc<Self>) -> Beat {
        let now = self.clock.now();
        let phase = {
            let mut session = self.session();
            session.heartbeat(now);
            session.phase()
        };

        match phase {
            Phase::Countdown | Phase::Running => Beat::Continue,
            Phase::Finished => {
                self.schedule_reports();
                Beat::Stop
            }
            Phase::Idle | Phase::Paused => Beat::Stop,
        }
    }

    /// Defers report building by the grace period so the closing cue can play.
    fn schedule_reports(self: &Arc<Self>) {
        if self.reports_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let grace = self.session().settings().report_grace;
        let shared = Arc::clone(self);
        let handle = thread::spawn(move || {
            thread::sleep(grace);
            shared.finalize_reports();
        });
        *self.reporter.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn finalize_reports(&self) {
        let Some(reports) = self.session().take_reports(Local::now()) else {
            return;
        };

        if let Some(store) = &self.store {
            for report in &reports {
                if let Err(e) = store.save_report(report) {
                    warn!(
                        participant = %report.participant_id,
                        error = %e,
                        "failed to save report"
                    );
                }
            }
        }
        info!(count = reports.len(), "reports generated");
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(reports);
    }
}

pub struct SessionController {
    setup: SessionSetup,
    shared: Arc<Shared>,
    driver: Mutex<TickDriver>,
}

impl SessionController {
    pub fn new(
        setup: SessionSetup,
        clock: Arc<dyn ClockSource>,
        store: Option<Arc<dyn ReportStore>>,
    ) -> Result<Self, SessionError> {
        let session = setup.build()?;
        let driver = TickDriver::new(FixedTicker::new(setup.settings.tick_interval));

        Ok(Self {
            setup,
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                clock,
                store,
                reports: Mutex::new(Vec::new()),
                reporter: Mutex::new(None),
                reports_scheduled: AtomicBool::new(false),
            }),
            driver: Mutex::new(driver),
        })
    }

    fn driver(&self) -> MutexGuard<'_, TickDriver> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_driver(&self) {
        let shared = Arc::clone(&self.shared);
        self.driver().start(move || shared.heartbeat());
    }

    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    /// One scheduler evaluation, as the Tick Driver would run it.
    pub fn heartbeat(&self) -> Beat {
        self.shared.heartbeat()
    }

    pub fn start(&self) -> bool {
        let started = self.shared.session().start(self.now());
        if started {
            self.start_driver();
        }
        started
    }

    pub fn pause(&self) -> bool {
        let paused = self.shared.session().pause(self.now());
        if paused {
            self.driver().stop();
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.shared.session().resume(self.now());
        if resumed {
            self.start_driver();
        }
        resumed
    }

    pub fn toggle_pause(&self) -> bool {
        match self.phase() {
            Phase::Running => self.pause(),
            Phase::Paused => self.resume(),
            _ => false,
        }
    }

    pub fn stop(&self, id: ParticipantId) -> ParticipantOutcome {
        let (outcome, phase) = {
            let mut session = self.shared.session();
            let outcome = session.stop(id, self.now());
            (outcome, session.phase())
        };
        self.after_command(phase);
        outcome
    }

    pub fn record_warning(&self, id: ParticipantId) -> ParticipantOutcome {
        let (outcome, phase) = {
            let mut session = self.shared.session();
            let outcome = session.record_warning(id, self.now());
            (outcome, session.phase())
        };
        self.after_command(phase);
        outcome
    }

    fn after_command(&self, phase: Phase) {
        if phase == Phase::Finished {
            self.driver().stop();
            self.shared.schedule_reports();
        }
    }

    /// Passed to the tone collaborator as is; range handling is its concern.
    pub fn set_volume(&self, level: f32) {
        self.shared.session().set_volume(level);
    }

    pub fn phase(&self) -> Phase {
        self.shared.session().phase()
    }

    pub fn is_ticking(&self) -> bool {
        self.driver().is_running()
    }

    pub fn view(&self) -> SessionView {
        let now = self.now();
        let session = self.shared.session();
        let state = session.state();
        let level = session.current_level();

        SessionView {
            protocol: session.protocol().name.clone(),
            total_levels: session.protocol().len(),
            phase: state.phase,
            countdown: session.countdown_remaining(),
            level,
            shuttle: session.current_shuttle(),
            shuttles_in_level: session.protocol().shuttles_in_level(level).unwrap_or(0),
            speed_kmh: session.current_speed_kmh(),
            progress: session.progress_fraction(now),
            total_distance_m: state.total_distance_m,
            elapsed_secs: session.active_elapsed(now),
            active_participants: session.active_participant_count(),
            end_reason: session.end_reason(),
            participants: session
                .registry()
                .records()
                .iter()
                .map(|r| ParticipantView {
                    id: r.id(),
                    name: r.display_name().to_string(),
                    assessor: r.assessor_name().map(str::to_string),
                    status: r.status(),
                    warnings: r.warning_count(),
                    result: r.result().copied(),
                })
                .collect(),
        }
    }

    /// Reports produced so far; empty until the grace period has elapsed.
    pub fn reports(&self) -> Vec<TestReport> {
        self.shared
            .reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Block until a scheduled report job has run.
    pub fn wait_for_reports(&self) -> Vec<TestReport> {
        let handle = self
            .shared
            .reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.reports()
    }

    /// Discard everything and return to a fresh Idle session.
    pub fn reset(&self) -> Result<(), SessionError> {
        self.driver().stop();
        let pending = self
            .shared
            .reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = pending {
            let _ = handle.join();
        }

        let fresh = self.setup.build()?;
        *self.shared.session() = fresh;
        self.shared
            .reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.shared.reports_scheduled.store(false, Ordering::SeqCst);
        info!("session reset");
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.driver().stop();
    }
}
