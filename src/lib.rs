use tracing::{error, info, warn};

use config::RescueConfig;
use console::OperatorConsole;
use error::{HvError, HvResult};
use interface::Hardware;
use session::{ProgrammingSession, SessionReport, SessionState};
pub use targets::{FuseSelector, Mode};

pub mod config;
pub mod console;
pub(crate) mod constants;
pub mod error;
pub mod interface;
pub mod protocols;
pub mod session;
pub mod targets;
pub mod timing;
pub(crate) mod util;

/// Fuse rescue station: one host board, one operator console, any number of
/// targets inserted one after another.
pub struct Rescuer<H: Hardware, C: OperatorConsole> {
    hardware: H,
    console: C,
    config: RescueConfig,
    mode: Mode,
    state: SessionState,
    progress_bar_enable: bool,
}

impl<H: Hardware, C: OperatorConsole> Rescuer<H, C> {
    /// Bring the lines to idle and settle the mode, asking the operator when
    /// the configuration leaves it open.
    pub fn new(mut hardware: H, mut console: C, config: RescueConfig) -> HvResult<Self> {
        config.validate()?;
        session::initialize_lines(&mut hardware, config.reset_polarity, config.start)?;

        let mode = match config.mode {
            Some(mode) => mode,
            None if config.interactive => console::select_mode(&mut console)?,
            None => Mode::ParallelATmega,
        };
        console.write_line(&format!("Selected mode: {}", mode))?;
        console.flush()?;
        info!("Selected mode {}", mode);

        Ok(Rescuer {
            hardware,
            console,
            config,
            mode,
            state: SessionState::Idle,
            progress_bar_enable: false,
        })
    }

    pub fn progress_bar(&mut self, enable: bool) {
        self.progress_bar_enable = enable;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    /// Run a session on a target that is already inserted
    pub fn run_session(&mut self) -> HvResult<SessionReport> {
        self.state = SessionState::AwaitingTarget;
        let mut session =
            ProgrammingSession::new(&mut self.hardware, &mut self.console, &self.config, self.mode);
        session.progress_bar(self.progress_bar_enable);
        let outcome = session.run();
        self.state = SessionState::Idle;

        if let Err(e) = &outcome {
            if !matches!(e, HvError::Console(_)) {
                self.console.write_line(&format!("ERROR: {}", e))?;
                self.console.write_line("Session aborted, target released.")?;
                self.console.flush()?;
            }
        }
        outcome
    }

    /// Wait for the start signal, then run one session
    pub fn run_once(&mut self) -> HvResult<SessionReport> {
        session::wait_for_start(&mut self.hardware, &mut self.console, self.config.start)?;
        self.run_session()
    }

    /// Serve targets until the operator console goes away
    pub fn run_forever(&mut self) -> HvResult<()> {
        loop {
            match self.run_once() {
                Ok(report) if report.is_verified() => info!("Session verified"),
                Ok(report) => warn!("Session finished with {} mismatches", report.mismatches.len()),
                Err(e @ HvError::Console(_)) => return Err(e),
                Err(e) => error!("Session failed: {}", e),
            }
        }
    }
}
