// Library surface for the terminal binary, headless runs and integration tests.
// Keep this free of terminal drawing; that lives in the binary.
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod controller;
pub mod cues;
pub mod error;
pub mod logging;
pub mod participant;
pub mod protocol;
pub mod reports;
pub mod runtime;
pub mod scoring;
pub mod session;
pub mod util;

pub use controller::{SessionController, SessionSetup, SessionView};
pub use protocol::ProtocolTable;
pub use session::{EngineSettings, Phase, Session};
