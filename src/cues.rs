//! Outbound audio and speech requests.
//!
//! The engine only asks for cues; synthesis, mixing and speech belong to
//! whoever implements these traits. Every call is fire-and-forget: an
//! implementation that fails must swallow (and may log) the failure rather
//! than report it back into the scheduler.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum ToneKind {
    Shuttle,
    LevelUp,
    Stop,
    Fail,
}

pub trait ToneOutput: Send + Sync {
    /// `at` is in the engine's clock-source time base.
    fn play_tone(&self, kind: ToneKind, at: f64);
    fn set_volume(&self, level: f32);
}

pub trait Announcer: Send + Sync {
    fn announce(&self, text: &str);
}

/// Discards every cue. Used when no audio device is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl ToneOutput for Silent {
    fn play_tone(&self, _kind: ToneKind, _at: f64) {}
    fn set_volume(&self, _level: f32) {}
}

impl Announcer for Silent {
    fn announce(&self, _text: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cue {
    Tone { kind: ToneKind, at: f64 },
    Announcement(String),
    Volume(f32),
}

/// Keeps every cue in order; the headless harness and tests inspect it.
#[derive(Debug, Default)]
pub struct CueLog {
    cues: Mutex<Vec<Cue>>,
}

impl CueLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, cue: Cue) {
        self.cues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cue);
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn tones(&self) -> Vec<(ToneKind, f64)> {
        self.cues()
            .into_iter()
            .filter_map(|cue| match cue {
                Cue::Tone { kind, at } => Some((kind, at)),
                _ => None,
            })
            .collect()
    }

    pub fn announcements(&self) -> Vec<String> {
        self.cues()
            .into_iter()
            .filter_map(|cue| match cue {
                Cue::Announcement(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn count_tones(&self, kind: ToneKind) -> usize {
        self.tones().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl ToneOutput for CueLog {
    fn play_tone(&self, kind: ToneKind, at: f64) {
        self.push(Cue::Tone { kind, at });
    }

    fn set_volume(&self, level: f32) {
        self.push(Cue::Volume(level));
    }
}

impl Announcer for CueLog {
    fn announce(&self, text: &str) {
        self.push(Cue::Announcement(text.to_string()));
    }
}
