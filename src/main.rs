mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use shuttlerun::{
    app_dirs::AppDirs,
    clock::MonotonicClock,
    config::{Config, ConfigStore, FileConfigStore},
    cues::{Announcer, ToneKind, ToneOutput},
    logging,
    participant::{Athlete, ParticipantId, ParticipantOutcome},
    protocol::ProtocolTable,
    reports::{export_csv, ReportStore, SqliteReportStore},
    runtime::{CrosstermEventSource, FixedTicker, Runner, UiEvent},
    scoring::TestReport,
    Phase, SessionController, SessionSetup,
};
use std::{
    error::Error,
    fs::File,
    io::{self, stdin, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{info, warn};

const UI_REFRESH_MS: u64 = 50;
const VOLUME_STEP: f32 = 0.1;

/// drift-free bleep test timer for a group of runners
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Times a multi-stage 20 m shuttle run (bleep test) for a group of runners, tracks warnings and dropouts, and scores everyone with an estimated VO2max."
)]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    /// built-in protocol table to run (see `shuttlerun protocol`)
    #[clap(short = 'p', long)]
    protocol: Option<String>,

    /// load the protocol table from a JSON file
    #[clap(long, conflicts_with = "protocol")]
    protocol_file: Option<PathBuf>,

    /// seconds counted down before the first shuttle
    #[clap(short = 'c', long)]
    countdown: Option<u32>,

    /// cue volume between 0.0 and 1.0
    #[clap(long)]
    volume: Option<f32>,

    /// runner as NAME:GENDER:AGE[:ASSESSOR], may be repeated
    #[clap(short = 'r', long = "runner", value_name = "NAME:GENDER:AGE[:ASSESSOR]")]
    runners: Vec<Athlete>,

    /// JSON file holding a list of runners
    #[clap(long)]
    roster: Option<PathBuf>,

    /// do not save reports to the history database
    #[clap(long)]
    no_save: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// print the protocol table
    Protocol,
    /// list saved reports, newest first
    History {
        /// export as CSV instead ("-" for stdout)
        #[clap(long)]
        csv: Option<PathBuf>,
    },
}

impl Cli {
    /// Flags override the saved config for this run only.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(protocol) = &self.protocol {
            config.protocol = protocol.clone();
        }
        if let Some(countdown) = self.countdown {
            config.countdown_secs = countdown;
        }
        if let Some(volume) = self.volume {
            config.volume = volume.clamp(0.0, 1.0);
        }
        config
    }

    fn load_protocol(&self, config: &Config) -> Result<ProtocolTable, Box<dyn Error>> {
        let table = match &self.protocol_file {
            Some(path) => ProtocolTable::from_path(path)?,
            None => ProtocolTable::builtin(&config.protocol)?,
        };
        Ok(table)
    }

    /// Roster file entries first, then `--runner` flags.
    fn load_roster(&self) -> Result<Vec<Athlete>, Box<dyn Error>> {
        let mut roster = match &self.roster {
            Some(path) => {
                let file = File::open(path)?;
                serde_json::from_reader::<_, Vec<Athlete>>(io::BufReader::new(file))?
            }
            None => Vec::new(),
        };
        roster.extend(self.runners.iter().cloned());
        Ok(roster)
    }
}

/// Terminal stand-in for the audio and speech collaborators: rings the bell
/// and keeps the latest cue for the screen.
#[derive(Debug)]
pub struct TerminalCues {
    volume: Mutex<f32>,
    last_tone: Mutex<Option<ToneKind>>,
    last_announcement: Mutex<Option<String>>,
}

impl TerminalCues {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: Mutex::new(volume),
            last_tone: Mutex::new(None),
            last_announcement: Mutex::new(None),
        }
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_tone(&self) -> Option<ToneKind> {
        *self.last_tone.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_announcement(&self) -> Option<String> {
        self.last_announcement
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ToneOutput for TerminalCues {
    fn play_tone(&self, kind: ToneKind, _at: f64) {
        *self.last_tone.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind);
        if self.volume() > 0.0 {
            let mut out = io::stdout();
            if out.write_all(b"\x07").and_then(|_| out.flush()).is_err() {
                warn!(%kind, "unable to ring terminal bell");
            }
        }
    }

    fn set_volume(&self, level: f32) {
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };
        *self.volume.lock().unwrap_or_else(|e| e.into_inner()) = level;
    }
}

impl Announcer for TerminalCues {
    fn announce(&self, text: &str) {
        info!(text, "announcement");
        *self.last_announcement.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(text.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Live,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Quit,
}

pub struct App {
    pub controller: SessionController,
    pub cues: Arc<TerminalCues>,
    pub state: AppState,
    pub selected: usize,
    pub message: Option<String>,
}

impl App {
    pub fn new(controller: SessionController, cues: Arc<TerminalCues>) -> Self {
        controller.set_volume(cues.volume());
        Self {
            controller,
            cues,
            state: AppState::Live,
            selected: 0,
            message: None,
        }
    }

    fn participant_count(&self) -> usize {
        self.controller.view().participants.len()
    }

    fn selected_id(&self) -> Option<ParticipantId> {
        self.controller
            .view()
            .participants
            .get(self.selected)
            .map(|p| p.id)
    }

    fn on_tick(&mut self) {
        if self.state == AppState::Live
            && self.controller.phase() == Phase::Finished
            && !self.controller.reports().is_empty()
        {
            self.state = AppState::Results;
        }
    }

    fn on_key(&mut self, key: KeyEvent) -> Control {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Control::Quit;
        }

        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return Control::Quit,
            KeyCode::Char('n') => {
                if matches!(self.controller.phase(), Phase::Idle | Phase::Finished) {
                    self.new_session();
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.nudge_volume(VOLUME_STEP),
            KeyCode::Char('-') => self.nudge_volume(-VOLUME_STEP),
            _ if self.state == AppState::Live => self.on_live_key(key),
            _ => {}
        }
        Control::Continue
    }

    fn on_live_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char(' ') => match self.controller.phase() {
                Phase::Idle => {
                    self.controller.start();
                }
                Phase::Running | Phase::Paused => {
                    self.controller.toggle_pause();
                }
                _ => {}
            },
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                if self.selected + 1 < self.participant_count() {
                    self.selected += 1;
                }
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                if index < self.participant_count() {
                    self.selected = index;
                }
            }
            KeyCode::Char('s') => {
                if let Some(id) = self.selected_id() {
                    let outcome = self.controller.stop(id);
                    self.message = describe(outcome);
                }
            }
            KeyCode::Char('w') => {
                if let Some(id) = self.selected_id() {
                    let outcome = self.controller.record_warning(id);
                    self.message = describe(outcome);
                }
            }
            _ => {}
        }
    }

    fn nudge_volume(&mut self, delta: f32) {
        let level = (self.cues.volume() + delta).clamp(0.0, 1.0);
        self.controller.set_volume(level);
        self.message = Some(format!("volume {:.0}%", level * 100.0));
    }

    fn new_session(&mut self) {
        match self.controller.reset() {
            Ok(()) => {
                self.state = AppState::Live;
                self.selected = 0;
                self.message = None;
            }
            Err(e) => self.message = Some(e.to_string()),
        }
    }
}

fn describe(outcome: ParticipantOutcome) -> Option<String> {
    match outcome {
        ParticipantOutcome::Warned { count } => Some(format!("warning {count}")),
        ParticipantOutcome::Stopped(snap) => {
            Some(format!("stopped at {}.{}", snap.level, snap.shuttle))
        }
        ParticipantOutcome::Eliminated(snap) => {
            Some(format!("eliminated at {}.{}", snap.level, snap.shuttle))
        }
        ParticipantOutcome::AlreadyFinished => Some("already finished".to_string()),
        ParticipantOutcome::SessionInactive => Some("test is not running".to_string()),
        ParticipantOutcome::Unknown => None,
    }
}

fn exit_with(kind: ErrorKind, message: impl std::fmt::Display) -> ! {
    let mut cmd = Cli::command();
    cmd.error(kind, message).exit()
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = cli.apply(FileConfigStore::new().load());

    match &cli.command {
        Some(Command::Protocol) => {
            logging::init_stderr("warn");
            let table = cli
                .load_protocol(&config)
                .unwrap_or_else(|e| exit_with(ErrorKind::InvalidValue, e));
            print_protocol(&table, &mut io::stdout().lock())?;
            return Ok(());
        }
        Some(Command::History { csv }) => {
            logging::init_stderr("warn");
            let store = SqliteReportStore::open_default()?;
            let reports = store.load_reports()?;
            match csv {
                Some(path) if path == Path::new("-") => export_csv(&reports, io::stdout().lock())?,
                Some(path) => export_csv(&reports, File::create(path)?)?,
                None => print_history(&reports, &mut io::stdout().lock())?,
            }
            return Ok(());
        }
        None => {}
    }

    let roster = cli
        .load_roster()
        .unwrap_or_else(|e| exit_with(ErrorKind::InvalidValue, e));
    if roster.is_empty() {
        exit_with(
            ErrorKind::MissingRequiredArgument,
            "at least one --runner or a --roster file is required",
        );
    }
    let protocol = cli
        .load_protocol(&config)
        .unwrap_or_else(|e| exit_with(ErrorKind::InvalidValue, e));

    let cues = Arc::new(TerminalCues::new(config.volume));
    let setup = SessionSetup {
        protocol: Arc::new(protocol),
        roster,
        settings: config.engine_settings(),
        tones: cues.clone(),
        speech: cues.clone(),
    };

    let store: Option<Arc<dyn ReportStore>> = if cli.no_save {
        None
    } else {
        match SqliteReportStore::open_default() {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                eprintln!("warning: reports will not be saved ({e})");
                None
            }
        }
    };

    let controller = SessionController::new(setup, Arc::new(MonotonicClock::new()), store)
        .unwrap_or_else(|e| exit_with(ErrorKind::ValueValidation, e));

    if !stdin().is_tty() {
        exit_with(ErrorKind::Io, "stdin must be a tty");
    }

    if let Some(path) = AppDirs::log_path() {
        logging::init_file(&path, "info")?;
    }

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(controller, cues);
    let result = start_tui(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(UI_REFRESH_MS)),
    );

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        match runner.step() {
            UiEvent::Tick | UiEvent::Resize => app.on_tick(),
            UiEvent::Key(key) => {
                if app.on_key(key) == Control::Quit {
                    break;
                }
                app.on_tick();
            }
        }
    }

    Ok(())
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn print_protocol<W: Write>(table: &ProtocolTable, out: &mut W) -> io::Result<()> {
    if table.description.is_empty() {
        writeln!(out, "{}", table.name)?;
    } else {
        writeln!(out, "{}: {}", table.name, table.description)?;
    }
    writeln!(
        out,
        "{:>5} {:>8} {:>6} {:>10} {:>10} {:>8}",
        "level", "shuttles", "km/h", "s/shuttle", "distance", "elapsed"
    )?;

    let mut distance = 0.0;
    let mut elapsed = 0.0;
    for level in table.levels() {
        distance += level.shuttles as f64 * shuttlerun::protocol::SHUTTLE_METRES;
        elapsed += level.duration();
        writeln!(
            out,
            "{:>5} {:>8} {:>6.1} {:>10.3} {:>9}m {:>8}",
            level.level,
            level.shuttles,
            level.speed_kmh,
            level.time_per_shuttle,
            distance,
            format_duration(elapsed)
        )?;
    }
    writeln!(
        out,
        "total: {} levels, {} shuttles, {} m, {}",
        table.len(),
        table.total_shuttles(),
        table.total_distance(),
        format_duration(table.total_duration())
    )
}

fn print_history<W: Write>(reports: &[TestReport], out: &mut W) -> io::Result<()> {
    if reports.is_empty() {
        return writeln!(out, "no saved reports");
    }
    for r in reports {
        writeln!(
            out,
            "{}  {:<16} {:>5}  {:>5.1}  {:<10} {}",
            r.recorded_at.format("%Y-%m-%d %H:%M"),
            r.name,
            r.level_label(),
            r.vo2_max,
            r.fitness_category,
            r.stop_reason
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use shuttlerun::{clock::ManualClock, scoring::Gender, EngineSettings};

    pub(crate) fn app_with(runners: &[&str]) -> (App, Arc<ManualClock>) {
        let cues = Arc::new(TerminalCues::new(0.0));
        let setup = SessionSetup {
            protocol: Arc::new(ProtocolTable::builtin("leger").unwrap()),
            roster: runners.iter().map(|r| r.parse().unwrap()).collect(),
            settings: EngineSettings {
                countdown_steps: 0,
                report_grace: Duration::ZERO,
                ..EngineSettings::default()
            },
            tones: cues.clone(),
            speech: cues.clone(),
        };
        let clock = Arc::new(ManualClock::new(0.0));
        let controller = SessionController::new(setup, clock.clone(), None).unwrap();
        (App::new(controller, cues), clock)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["shuttlerun"]);

        assert_eq!(cli.command, None);
        assert_eq!(cli.protocol, None);
        assert!(cli.runners.is_empty());
        assert!(!cli.no_save);
        assert_eq!(cli.apply(Config::default()), Config::default());
    }

    #[test]
    fn test_cli_runners() {
        let cli = Cli::parse_from([
            "shuttlerun",
            "-r",
            "Ana:f:21",
            "--runner",
            "Ben:m:34:Coach Lee",
        ]);

        assert_eq!(cli.runners.len(), 2);
        assert_eq!(cli.runners[0].gender, Gender::Female);
        assert_eq!(cli.runners[1].assessor.as_deref(), Some("Coach Lee"));
    }

    #[test]
    fn test_cli_rejects_bad_runner() {
        assert!(Cli::try_parse_from(["shuttlerun", "-r", "Ana:x:21"]).is_err());
        assert!(Cli::try_parse_from(["shuttlerun", "-r", "Ana"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "shuttlerun",
            "--protocol",
            "custom",
            "--countdown",
            "3",
            "--volume",
            "1.5",
        ]);
        let config = cli.apply(Config::default());

        assert_eq!(config.protocol, "custom");
        assert_eq!(config.countdown_secs, 3);
        assert_eq!(config.volume, 1.0);
    }

    #[test]
    fn test_cli_protocol_conflicts_with_file() {
        assert!(Cli::try_parse_from([
            "shuttlerun",
            "--protocol",
            "leger",
            "--protocol-file",
            "table.json"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["shuttlerun", "history", "--csv", "out.csv"]);
        assert_eq!(
            cli.command,
            Some(Command::History {
                csv: Some(PathBuf::from("out.csv"))
            })
        );

        let cli = Cli::parse_from(["shuttlerun", "protocol"]);
        assert_eq!(cli.command, Some(Command::Protocol));
    }

    #[test]
    fn test_roster_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"[{ "name": "Ana", "gender": "female", "age": 21 }]"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "shuttlerun",
            "--roster",
            path.to_str().unwrap(),
            "-r",
            "Ben:m:30",
        ]);
        let names: Vec<_> = cli
            .load_roster()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Ana", "Ben"]);
    }

    #[test]
    fn test_keys_drive_the_session() {
        let (mut app, clock) = app_with(&["Ana:f:21", "Ben:m:30"]);

        assert_eq!(app.on_key(key(KeyCode::Char(' '))), Control::Continue);
        assert_eq!(app.controller.phase(), Phase::Running);

        app.on_key(key(KeyCode::Down));
        assert_eq!(app.selected, 1);
        app.on_key(key(KeyCode::Down));
        assert_eq!(app.selected, 1);

        clock.advance(1.0);
        app.on_key(key(KeyCode::Char('w')));
        assert_eq!(app.message.as_deref(), Some("warning 1"));

        app.on_key(key(KeyCode::Char(' ')));
        assert_eq!(app.controller.phase(), Phase::Paused);
        app.on_key(key(KeyCode::Char(' ')));
        assert_eq!(app.controller.phase(), Phase::Running);

        app.on_key(key(KeyCode::Char('1')));
        app.on_key(key(KeyCode::Char('s')));
        assert_eq!(app.message.as_deref(), Some("stopped at 1.1"));
        app.on_key(key(KeyCode::Char('2')));
        app.on_key(key(KeyCode::Char('s')));

        assert_eq!(app.controller.phase(), Phase::Finished);
        app.controller.wait_for_reports();
        app.on_tick();
        assert_eq!(app.state, AppState::Results);

        app.on_key(key(KeyCode::Char('n')));
        assert_eq!(app.state, AppState::Live);
        assert_eq!(app.controller.phase(), Phase::Idle);
    }

    #[test]
    fn test_quit_keys() {
        let (mut app, _clock) = app_with(&["Ana:f:21"]);
        assert_eq!(app.on_key(key(KeyCode::Char('q'))), Control::Quit);
        assert_eq!(app.on_key(key(KeyCode::Esc)), Control::Quit);
        assert_eq!(
            app.on_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Control::Quit
        );
    }

    #[test]
    fn test_volume_keys_clamp() {
        let (mut app, _clock) = app_with(&["Ana:f:21"]);
        app.on_key(key(KeyCode::Char('-')));
        assert_eq!(app.cues.volume(), 0.0);
        for _ in 0..15 {
            app.on_key(key(KeyCode::Char('+')));
        }
        assert_eq!(app.cues.volume(), 1.0);
    }

    #[test]
    fn test_terminal_cues_keep_volume_in_range() {
        let cues = TerminalCues::new(0.5);
        cues.set_volume(1.7);
        assert_eq!(cues.volume(), 1.0);
        cues.set_volume(-2.0);
        assert_eq!(cues.volume(), 0.0);
        cues.set_volume(0.25);
        assert_eq!(cues.volume(), 0.25);
        cues.set_volume(f32::NAN);
        assert_eq!(cues.volume(), 0.0);
    }

    #[test]
    fn test_print_protocol_totals() {
        let table = ProtocolTable::builtin("leger").unwrap();
        let mut out = Vec::new();
        print_protocol(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("leger"));
        assert!(text.contains("total: 21 levels, 247 shuttles, 4940 m"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(61.4), "01:01");
        assert_eq!(format_duration(-3.0), "00:00");
    }
}
