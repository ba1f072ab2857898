//! Converting a final level/shuttle into VO2max, a fitness category and a report.

use std::str::FromStr;

use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::RosterError;
use crate::participant::{ParticipantId, ParticipantRecord, StopReason};
use crate::protocol::ProtocolTable;
use crate::util::{mean, round1, std_dev};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl FromStr for Gender {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Gender::Male),
            "f" | "female" => Ok(Gender::Female),
            _ => Err(RosterError::Gender(s.to_string())),
        }
    }
}

/// Ordered worst to best.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
pub enum FitnessCategory {
    #[strum(serialize = "Very Poor")]
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
    Superior,
}

const CATEGORIES_BEST_FIRST: [FitnessCategory; 6] = [
    FitnessCategory::Superior,
    FitnessCategory::Excellent,
    FitnessCategory::Good,
    FitnessCategory::Fair,
    FitnessCategory::Poor,
    FitnessCategory::VeryPoor,
];

/// Lower VO2max bounds for one age bracket, best category first.
#[derive(Debug, Clone, Copy)]
struct NormBracket {
    age_max: u32,
    thresholds: [f64; 6],
}

const fn bracket(age_max: u32, sup: f64, exc: f64, good: f64, fair: f64, poor: f64) -> NormBracket {
    NormBracket {
        age_max,
        thresholds: [sup, exc, good, fair, poor, 0.0],
    }
}

const MALE_NORMS: [NormBracket; 6] = [
    bracket(19, 56.0, 51.0, 45.2, 38.4, 35.0),
    bracket(29, 52.5, 46.5, 42.5, 36.5, 33.0),
    bracket(39, 49.5, 45.0, 41.0, 35.5, 31.5),
    bracket(49, 48.1, 43.8, 39.0, 33.6, 30.2),
    bracket(59, 45.4, 41.0, 35.8, 31.0, 26.1),
    bracket(99, 44.3, 36.5, 32.3, 26.1, 20.5),
];

const FEMALE_NORMS: [NormBracket; 6] = [
    bracket(19, 42.0, 39.0, 35.0, 31.0, 25.0),
    bracket(29, 41.1, 37.0, 33.0, 29.0, 23.6),
    bracket(39, 40.1, 35.7, 31.5, 27.0, 22.8),
    bracket(49, 37.0, 32.9, 29.0, 24.5, 21.0),
    bracket(59, 35.8, 31.5, 27.0, 22.8, 20.2),
    bracket(99, 31.5, 30.3, 24.5, 20.2, 17.5),
];

/// Fractional level reached, e.g. level 5 shuttle 5 of 9 is 5.56.
pub fn decimal_level(final_level: u32, final_shuttle: u32, shuttles_in_level: u32) -> f64 {
    if shuttles_in_level == 0 {
        return final_level as f64;
    }
    final_level as f64 + final_shuttle as f64 / shuttles_in_level as f64
}

pub fn vo2_max(final_level: u32, final_shuttle: u32, shuttles_in_level: u32) -> f64 {
    round1(decimal_level(final_level, final_shuttle, shuttles_in_level) * 3.46 + 12.2)
}

pub fn fitness_category(vo2_max: f64, gender: Gender, age: u32) -> FitnessCategory {
    let norms: &[NormBracket] = match gender {
        Gender::Male => &MALE_NORMS,
        Gender::Female => &FEMALE_NORMS,
    };
    let bracket = norms
        .iter()
        .find(|b| age <= b.age_max)
        .or_else(|| norms.last());

    let Some(bracket) = bracket else {
        return FitnessCategory::VeryPoor;
    };

    CATEGORIES_BEST_FIRST
        .iter()
        .zip(bracket.thresholds.iter())
        .find(|(_, threshold)| vo2_max >= **threshold)
        .map(|(category, _)| *category)
        .unwrap_or(FitnessCategory::VeryPoor)
}

/// The only artifact that outlives a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub participant_id: ParticipantId,
    pub name: String,
    pub assessor: Option<String>,
    pub gender: Gender,
    pub age: u32,
    pub protocol: String,
    pub final_level: u32,
    pub final_shuttle: u32,
    pub final_distance_m: f64,
    pub max_speed_kmh: f64,
    pub vo2_max: f64,
    pub fitness_category: FitnessCategory,
    pub stop_reason: StopReason,
    pub warnings: u8,
    pub recorded_at: DateTime<Local>,
}

impl TestReport {
    /// `None` while the participant is still running.
    pub fn build(
        record: &ParticipantRecord,
        protocol: &ProtocolTable,
        recorded_at: DateTime<Local>,
    ) -> Option<Self> {
        let result = record.result()?;
        let snapshot = result.snapshot;
        let level = protocol.by_level(snapshot.level);
        let shuttles_in_level = level.map(|l| l.shuttles).unwrap_or(snapshot.shuttle);
        let vo2 = vo2_max(snapshot.level, snapshot.shuttle, shuttles_in_level);
        let athlete = record.athlete();

        Some(Self {
            participant_id: record.id(),
            name: athlete.name.clone(),
            assessor: athlete.assessor.clone(),
            gender: athlete.gender,
            age: athlete.age,
            protocol: protocol.name.clone(),
            final_level: snapshot.level,
            final_shuttle: snapshot.shuttle,
            final_distance_m: snapshot.distance_m,
            max_speed_kmh: level.map(|l| l.speed_kmh).unwrap_or_default(),
            vo2_max: vo2,
            fitness_category: fitness_category(vo2, athlete.gender, athlete.age),
            stop_reason: result.reason,
            warnings: record.warning_count(),
            recorded_at,
        })
    }

    pub fn level_label(&self) -> String {
        format!("{}.{}", self.final_level, self.final_shuttle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub count: usize,
    pub mean_vo2: f64,
    pub std_dev_vo2: f64,
    pub best: Option<(String, f64)>,
}

impl GroupSummary {
    pub fn from_reports(reports: &[TestReport]) -> Option<Self> {
        let values: Vec<f64> = reports.iter().map(|r| r.vo2_max).collect();
        let best = ranked(reports)
            .first()
            .map(|r| (r.name.clone(), r.vo2_max));

        Some(Self {
            count: reports.len(),
            mean_vo2: round1(mean(&values)?),
            std_dev_vo2: round1(std_dev(&values)?),
            best,
        })
    }
}

/// Best VO2max first; ties keep roster order.
pub fn ranked(reports: &[TestReport]) -> Vec<&TestReport> {
    reports
        .iter()
        .sorted_by(|a, b| {
            b.vo2_max
                .partial_cmp(&a.vo2_max)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.participant_id.cmp(&b.participant_id))
        })
        .collect()
}
