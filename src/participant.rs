use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RosterError, SessionError};
use crate::scoring::Gender;

/// Warnings that automatically eliminate a runner.
pub const MAX_WARNINGS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A roster entry, before the session assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Athlete {
    pub name: String,
    pub gender: Gender,
    pub age: u32,
    #[serde(default)]
    pub assessor: Option<String>,
}

impl FromStr for Athlete {
    type Err = RosterError;

    /// Parses `NAME:GENDER:AGE[:ASSESSOR]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let (name, gender, age, assessor) = match parts.as_slice() {
            [name, gender, age] => (*name, *gender, *age, None),
            [name, gender, age, assessor] => (*name, *gender, *age, Some(*assessor)),
            _ => return Err(RosterError::Format(s.to_string())),
        };
        if name.is_empty() {
            return Err(RosterError::Format(s.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            gender: gender.parse()?,
            age: age
                .parse()
                .map_err(|_| RosterError::Age(age.to_string()))?,
            assessor: assessor.filter(|a| !a.is_empty()).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum ParticipantStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum StopReason {
    #[strum(serialize = "Stopped")]
    Manual,
    #[strum(serialize = "Eliminated")]
    Warnings,
    #[strum(serialize = "Completed")]
    ProtocolComplete,
}

/// Where the session stood when a runner dropped out. Levels and shuttles are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub level: u32,
    pub shuttle: u32,
    pub distance_m: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub snapshot: StopSnapshot,
    pub reason: StopReason,
}

/// Per-runner lifecycle. Once finished, the result is frozen.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRecord {
    id: ParticipantId,
    athlete: Athlete,
    status: ParticipantStatus,
    warning_count: u8,
    result: Option<FinalResult>,
}

impl ParticipantRecord {
    fn new(id: ParticipantId, athlete: Athlete) -> Self {
        Self {
            id,
            athlete,
            status: ParticipantStatus::Running,
            warning_count: 0,
            result: None,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.athlete.name
    }

    pub fn assessor_name(&self) -> Option<&str> {
        self.athlete.assessor.as_deref()
    }

    pub fn athlete(&self) -> &Athlete {
        &self.athlete
    }

    pub fn status(&self) -> ParticipantStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ParticipantStatus::Running
    }

    pub fn warning_count(&self) -> u8 {
        self.warning_count
    }

    pub fn result(&self) -> Option<&FinalResult> {
        self.result.as_ref()
    }

    fn finish(&mut self, snapshot: StopSnapshot, reason: StopReason) {
        self.status = ParticipantStatus::Finished;
        self.result = Some(FinalResult { snapshot, reason });
    }
}

/// What a Stop or Warning command did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticipantOutcome {
    /// the session is not Running or Paused
    SessionInactive,
    Unknown,
    AlreadyFinished,
    Warned { count: u8 },
    Stopped(StopSnapshot),
    Eliminated(StopSnapshot),
}

/// Every enrolled runner, in roster order. Records are never removed mid-session.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRegistry {
    records: Vec<ParticipantRecord>,
}

impl ParticipantRegistry {
    pub fn from_roster(roster: Vec<Athlete>) -> Result<Self, SessionError> {
        if roster.is_empty() {
            return Err(SessionError::EmptyRoster);
        }

        let mut seen = HashSet::new();
        for athlete in &roster {
            if !seen.insert(athlete.name.to_lowercase()) {
                return Err(SessionError::DuplicateParticipant(athlete.name.clone()));
            }
        }

        let records = roster
            .into_iter()
            .enumerate()
            .map(|(i, athlete)| ParticipantRecord::new(ParticipantId(i as u32 + 1), athlete))
            .collect();
        Ok(Self { records })
    }

    pub fn records(&self) -> &[ParticipantRecord] {
        &self.records
    }

    pub fn get(&self, id: ParticipantId) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: ParticipantId) -> Option<&mut ParticipantRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counted from current state, never from a cached value.
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_running()).count()
    }

    pub fn all_finished(&self) -> bool {
        self.active_count() == 0
    }

    pub fn record_warning(
        &mut self,
        id: ParticipantId,
        snapshot: StopSnapshot,
    ) -> ParticipantOutcome {
        let Some(record) = self.get_mut(id) else {
            return ParticipantOutcome::Unknown;
        };
        if !record.is_running() {
            return ParticipantOutcome::AlreadyFinished;
        }

        record.warning_count += 1;
        if record.warning_count >= MAX_WARNINGS {
            record.finish(snapshot, StopReason::Warnings);
            debug!(
                participant = %id,
                level = snapshot.level,
                shuttle = snapshot.shuttle,
                "eliminated after warnings"
            );
            ParticipantOutcome::Eliminated(snapshot)
        } else {
            ParticipantOutcome::Warned {
                count: record.warning_count,
            }
        }
    }

    pub fn stop(&mut self, id: ParticipantId, snapshot: StopSnapshot) -> ParticipantOutcome {
        let Some(record) = self.get_mut(id) else {
            return ParticipantOutcome::Unknown;
        };
        if !record.is_running() {
            return ParticipantOutcome::AlreadyFinished;
        }

        record.finish(snapshot, StopReason::Manual);
        debug!(participant = %id, level = snapshot.level, shuttle = snapshot.shuttle, "stopped");
        ParticipantOutcome::Stopped(snapshot)
    }

    /// Finish everyone still running with the same snapshot; returns how many.
    pub fn finish_all_running(&mut self, snapshot: StopSnapshot, reason: StopReason) -> usize {
        let mut finished = 0;
        for record in self.records.iter_mut().filter(|r| r.is_running()) {
            record.finish(snapshot, reason);
            finished += 1;
        }
        finished
    }
}
