use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ProtocolError;

static PROTOCOL_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/protocols");

/// Length of one shuttle in metres.
pub const SHUTTLE_METRES: f64 = 20.0;

/// One stage of the protocol: how many shuttles and how long each may take.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolLevel {
    pub level: u32,
    pub shuttles: u32,
    /// seconds allowed per 20 m shuttle
    pub time_per_shuttle: f64,
    pub speed_kmh: f64,
}

impl ProtocolLevel {
    /// Total duration of the whole level in seconds.
    pub fn duration(&self) -> f64 {
        self.shuttles as f64 * self.time_per_shuttle
    }
}

/// Ordered, validated list of levels. Read-only for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    levels: Vec<ProtocolLevel>,
}

impl ProtocolTable {
    pub fn new(name: impl Into<String>, levels: Vec<ProtocolLevel>) -> Result<Self, ProtocolError> {
        let table = Self {
            name: name.into(),
            description: String::new(),
            levels,
        };
        table.validate()?;
        Ok(table)
    }

    /// Load one of the tables embedded in the binary.
    pub fn builtin(name: &str) -> Result<Self, ProtocolError> {
        let unknown = || ProtocolError::UnknownBuiltin {
            name: name.to_string(),
            available: Self::builtin_names().join(", "),
        };
        let file = PROTOCOL_DIR
            .get_file(format!("{name}.json"))
            .ok_or_else(unknown)?;
        let contents = file.contents_utf8().ok_or_else(unknown)?;
        Self::from_json_str(contents)
    }

    pub fn builtin_names() -> Vec<String> {
        let mut names: Vec<String> = PROTOCOL_DIR
            .files()
            .filter_map(|f| f.path().file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let table: ProtocolTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject tables that would divide by zero or never advance mid-test.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let first = self.levels.first().ok_or(ProtocolError::Empty)?;
        if first.level == 0 {
            return Err(ProtocolError::NonContiguous {
                expected: 1,
                found: 0,
            });
        }

        for (offset, lvl) in self.levels.iter().enumerate() {
            let expected = u32::try_from(offset)
                .ok()
                .and_then(|o| first.level.checked_add(o))
                .ok_or(ProtocolError::LevelOverflow(first.level))?;
            if lvl.level != expected {
                return Err(ProtocolError::NonContiguous {
                    expected,
                    found: lvl.level,
                });
            }
            if lvl.shuttles == 0 {
                return Err(ProtocolError::ZeroShuttles { level: lvl.level });
            }
            if !lvl.time_per_shuttle.is_finite() || lvl.time_per_shuttle <= 0.0 {
                return Err(ProtocolError::InvalidDuration {
                    level: lvl.level,
                    secs: lvl.time_per_shuttle,
                });
            }
            if !lvl.speed_kmh.is_finite() || lvl.speed_kmh <= 0.0 {
                return Err(ProtocolError::InvalidSpeed {
                    level: lvl.level,
                    kmh: lvl.speed_kmh,
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[ProtocolLevel] {
        &self.levels
    }

    /// Lookup by 0-based index.
    pub fn get(&self, index: usize) -> Option<&ProtocolLevel> {
        self.levels.get(index)
    }

    /// Lookup by the 1-based level number printed on score sheets.
    pub fn by_level(&self, level: u32) -> Option<&ProtocolLevel> {
        let first = self.levels.first()?.level;
        level
            .checked_sub(first)
            .and_then(|idx| self.levels.get(idx as usize))
    }

    pub fn shuttles_in_level(&self, level: u32) -> Option<u32> {
        self.by_level(level).map(|l| l.shuttles)
    }

    pub fn last(&self) -> Option<&ProtocolLevel> {
        self.levels.last()
    }

    pub fn total_shuttles(&self) -> u32 {
        self.levels.iter().map(|l| l.shuttles).sum()
    }

    pub fn total_duration(&self) -> f64 {
        self.levels.iter().map(ProtocolLevel::duration).sum()
    }

    pub fn total_distance(&self) -> f64 {
        self.total_shuttles() as f64 * SHUTTLE_METRES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn lvl(level: u32, shuttles: u32, time_per_shuttle: f64) -> ProtocolLevel {
        ProtocolLevel {
            level,
            shuttles,
            time_per_shuttle,
            speed_kmh: 72.0 / time_per_shuttle,
        }
    }

    #[test]
    fn test_builtin_leger_table() {
        let table = ProtocolTable::builtin("leger").unwrap();

        assert_eq!(table.name, "leger");
        assert_eq!(table.len(), 21);
        assert_eq!(table.get(0).unwrap().shuttles, 7);
        assert_eq!(table.get(0).unwrap().time_per_shuttle, 9.0);
        assert_eq!(table.by_level(5).unwrap().shuttles, 9);
        assert_eq!(table.last().unwrap().speed_kmh, 18.5);
    }

    #[test]
    fn test_leger_durations_shrink_with_level() {
        let table = ProtocolTable::builtin("leger").unwrap();
        for pair in table.levels().windows(2) {
            assert!(pair[1].time_per_shuttle < pair[0].time_per_shuttle);
            assert!(pair[1].speed_kmh > pair[0].speed_kmh);
        }
    }

    #[test]
    fn test_unknown_builtin() {
        assert_matches!(
            ProtocolTable::builtin("nope"),
            Err(ProtocolError::UnknownBuiltin { name, available })
                if name == "nope" && available.contains("leger")
        );
    }

    #[test]
    fn test_builtin_names_lists_leger() {
        assert!(ProtocolTable::builtin_names().contains(&"leger".to_string()));
    }

    #[test]
    fn test_lookup_by_index_and_level_agree() {
        let table =
            ProtocolTable::new("t", vec![lvl(3, 2, 6.0), lvl(4, 3, 5.0), lvl(5, 3, 4.0)]).unwrap();

        assert_eq!(table.get(1), table.by_level(4));
        assert_eq!(table.by_level(2), None);
        assert_eq!(table.by_level(6), None);
        assert_eq!(table.shuttles_in_level(5), Some(3));
    }

    #[test]
    fn test_rejects_empty_table() {
        assert_matches!(ProtocolTable::new("t", vec![]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_rejects_zero_shuttles() {
        assert_matches!(
            ProtocolTable::new("t", vec![lvl(1, 1, 9.0), lvl(2, 0, 8.0)]),
            Err(ProtocolError::ZeroShuttles { level: 2 })
        );
    }

    #[test]
    fn test_rejects_zero_duration() {
        let mut bad = lvl(1, 3, 1.0);
        bad.time_per_shuttle = 0.0;
        assert_matches!(
            ProtocolTable::new("t", vec![bad]),
            Err(ProtocolError::InvalidDuration { level: 1, .. })
        );

        let mut nan = lvl(1, 3, 1.0);
        nan.time_per_shuttle = f64::NAN;
        assert_matches!(
            ProtocolTable::new("t", vec![nan]),
            Err(ProtocolError::InvalidDuration { .. })
        );
    }

    #[test]
    fn test_rejects_gaps_in_levels() {
        assert_matches!(
            ProtocolTable::new("t", vec![lvl(1, 1, 9.0), lvl(3, 1, 8.0)]),
            Err(ProtocolError::NonContiguous {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_rejects_level_numbers_that_overflow() {
        let json = r#"{
            "name": "huge",
            "levels": [
                { "level": 4294967295, "shuttles": 1, "time_per_shuttle": 9.0, "speed_kmh": 8.0 },
                { "level": 4294967295, "shuttles": 1, "time_per_shuttle": 8.0, "speed_kmh": 9.0 }
            ]
        }"#;
        assert_matches!(
            ProtocolTable::from_json_str(json),
            Err(ProtocolError::LevelOverflow(u32::MAX))
        );

        // a single level at the top of the range is still fine
        assert!(ProtocolTable::new("top", vec![lvl(u32::MAX, 1, 9.0)]).is_ok());
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{ "name": "broken", "levels": [] }"#;
        assert_matches!(ProtocolTable::from_json_str(json), Err(ProtocolError::Empty));

        let json = r#"{ "name": "x", "levels": "#;
        assert_matches!(ProtocolTable::from_json_str(json), Err(ProtocolError::Parse(_)));
    }

    #[test]
    fn test_totals() {
        let table = ProtocolTable::new("t", vec![lvl(1, 2, 9.0), lvl(2, 3, 8.0)]).unwrap();
        assert_eq!(table.total_shuttles(), 5);
        assert_eq!(table.total_duration(), 42.0);
        assert_eq!(table.total_distance(), 100.0);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        let table = ProtocolTable::new("custom", vec![lvl(1, 2, 4.0)]).unwrap();
        fs::write(&path, serde_json::to_string(&table).unwrap()).unwrap();

        let loaded = ProtocolTable::from_path(&path).unwrap();
        assert_eq!(loaded, table);
    }
}
