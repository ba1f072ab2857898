use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::app_dirs::AppDirs;
use crate::error::StoreError;
use crate::scoring::TestReport;

/// Persistence collaborator for finished reports.
pub trait ReportStore: Send + Sync {
    fn save_report(&self, report: &TestReport) -> Result<(), StoreError>;

    /// Newest first.
    fn load_reports(&self) -> Result<Vec<TestReport>, StoreError>;
}

/// Append-only key/value table; each value is one JSON-encoded report.
#[derive(Debug)]
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open the store under the application state directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("shuttlerun_reports.db"));
        Self::open(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reports_key ON reports(key)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn key_for(report: &TestReport) -> String {
        format!(
            "report/{}/{}",
            report.recorded_at.to_rfc3339(),
            report.participant_id
        )
    }
}

impl ReportStore for SqliteReportStore {
    fn save_report(&self, report: &TestReport) -> Result<(), StoreError> {
        let value = serde_json::to_string(report)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO reports (key, value) VALUES (?1, ?2)",
            params![Self::key_for(report), value],
        )?;
        Ok(())
    }

    fn load_reports(&self) -> Result<Vec<TestReport>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT value FROM reports ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut reports = Vec::new();
        for value in rows {
            reports.push(serde_json::from_str(&value?)?);
        }
        Ok(reports)
    }
}

/// In-process store for headless runs and tests.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<TestReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for MemoryReportStore {
    fn save_report(&self, report: &TestReport) -> Result<(), StoreError> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
        Ok(())
    }

    fn load_reports(&self) -> Result<Vec<TestReport>, StoreError> {
        let reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        Ok(reports.iter().rev().cloned().collect())
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    recorded_at: String,
    name: &'a str,
    assessor: &'a str,
    gender: String,
    age: u32,
    protocol: &'a str,
    level: u32,
    shuttle: u32,
    distance_m: f64,
    max_speed_kmh: f64,
    vo2_max: f64,
    category: String,
    outcome: String,
    warnings: u8,
}

impl<'a> From<&'a TestReport> for CsvRow<'a> {
    fn from(r: &'a TestReport) -> Self {
        Self {
            recorded_at: r.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            name: &r.name,
            assessor: r.assessor.as_deref().unwrap_or(""),
            gender: r.gender.to_string(),
            age: r.age,
            protocol: &r.protocol,
            level: r.final_level,
            shuttle: r.final_shuttle,
            distance_m: r.final_distance_m,
            max_speed_kmh: r.max_speed_kmh,
            vo2_max: r.vo2_max,
            category: r.fitness_category.to_string(),
            outcome: r.stop_reason.to_string(),
            warnings: r.warnings,
        }
    }
}

/// Writes one header row plus one row per report.
pub fn export_csv<W: io::Write>(reports: &[TestReport], writer: W) -> Result<(), StoreError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for report in reports {
        wtr.serialize(CsvRow::from(report))?;
    }
    wtr.flush()?;
    Ok(())
}
