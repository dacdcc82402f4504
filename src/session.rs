//! One programming run, from target insertion to safe removal.
//!
//! A [`ProgrammingSession`] borrows the hardware and the operator console for
//! its whole lifetime, so nothing else can drive the lines meanwhile. States
//! only move forward; any error still runs the exit sequence so the target is
//! left unpowered.

use std::collections::BTreeMap;
use std::fmt;

use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};

use crate::config::{ResetPolarity, RescueConfig, StartSignal};
use crate::console::{self, OperatorConsole};
use crate::constants::{
    BUTTON_POLL_MS, DEBOUNCE_MS, ENTER_SETTLE_US, EXIT_RESET_HOLD_MS, POST_ENTER_MS,
    SDO_RELEASE_US, VCC_TO_RESET_US,
};
use crate::error::HvResult;
use crate::interface::{ControlLines, Direction, Hardware, Level, Signal};
use crate::protocols::{FuseProtocol, protocol_for_mode};
use crate::targets::{FuseSelector, Mode, PinRoles, SerialPins};
use crate::timing::Delay;
use crate::util::create_progress_bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    AwaitingTarget,
    Entered,
    ReadingInitial,
    AwaitingDesiredValues,
    Burning,
    Verifying,
    Exited,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fuse values keyed by selector, iterated low, high, extended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuseSet(BTreeMap<FuseSelector, u8>);

impl FuseSet {
    pub fn new() -> Self {
        FuseSet::default()
    }

    pub fn insert(&mut self, selector: FuseSelector, value: u8) {
        self.0.insert(selector, value);
    }

    pub fn get(&self, selector: FuseSelector) -> Option<u8> {
        self.0.get(&selector).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FuseSelector, u8)> + '_ {
        self.0.iter().map(|(selector, value)| (*selector, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fuse that read back different from what was burned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseMismatch {
    pub selector: FuseSelector,
    pub desired: u8,
    pub actual: u8,
}

/// Outcome of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub mode: Mode,
    pub initial: FuseSet,
    pub desired: FuseSet,
    pub verified: FuseSet,
    pub mismatches: Vec<FuseMismatch>,
}

impl SessionReport {
    pub fn is_verified(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare burned values against what the target reports now
pub fn find_mismatches(desired: &FuseSet, verified: &FuseSet) -> Vec<FuseMismatch> {
    desired
        .iter()
        .filter_map(|(selector, wanted)| match verified.get(selector) {
            Some(actual) if actual == wanted => None,
            actual => Some(FuseMismatch {
                selector,
                desired: wanted,
                actual: actual.unwrap_or(0xFF),
            }),
        })
        .collect()
}

/// Give every line its idle direction, reset supply off, VCC off.
///
/// The start button is left alone when runs are started from the console,
/// it may not be wired at all.
pub fn initialize_lines<H: Hardware + ?Sized>(
    hw: &mut H,
    polarity: ResetPolarity,
    start: StartSignal,
) -> HvResult<()> {
    hw.set_bus_direction(Direction::Input)?;
    for signal in Signal::ALL {
        if signal == Signal::Button && start != StartSignal::Button {
            continue;
        }
        hw.set_direction(signal, signal.idle_direction())?;
    }
    hw.write(Signal::Rst, polarity.deasserted())?;
    hw.write(Signal::Vcc, Level::Low)?;
    Ok(())
}

/// One debounced look at the start button: pressed now and still pressed
/// after the debounce window.
pub fn debounced_press<H>(hw: &mut H) -> HvResult<bool>
where
    H: ControlLines + Delay + ?Sized,
{
    if hw.read(Signal::Button)?.is_high() {
        return Ok(false);
    }
    hw.delay_ms(DEBOUNCE_MS);
    Ok(hw.read(Signal::Button)? == Level::Low)
}

/// Block until the start button is held through the debounce window
pub fn wait_for_button<H>(hw: &mut H) -> HvResult<()>
where
    H: ControlLines + Delay + ?Sized,
{
    while !debounced_press(hw)? {
        hw.delay_ms(BUTTON_POLL_MS);
    }
    Ok(())
}

/// Apply VCC and 12 V in the order that puts the target in programming mode
pub fn enter_programming_mode<H: Hardware + ?Sized>(
    hw: &mut H,
    mode: Mode,
    polarity: ResetPolarity,
) -> HvResult<()> {
    let roles = mode.pin_roles();

    hw.set_bus_direction(Direction::Input)?;
    hw.write(roles.pagel, Level::Low)?;
    hw.write(Signal::Xa1, Level::Low)?;
    hw.write(Signal::Xa0, Level::Low)?;
    hw.write(Signal::Bs1, Level::Low)?;
    hw.write(roles.bs2, Level::Low)?;
    // The ATtiny2313 only enters programming mode with !WR low
    hw.write(Signal::Wr, Level::Low)?;
    hw.write(Signal::Oe, Level::Low)?;

    let serial = SerialPins::STANDARD;
    if mode.is_serial() {
        hw.write(serial.data_in, Level::Low)?;
        hw.write(serial.instruction_in, Level::Low)?;
        hw.set_direction(serial.data_out, Direction::Output)?;
        hw.write(serial.data_out, Level::Low)?;
    }

    hw.write(Signal::Vcc, Level::High)?;
    hw.delay_us(VCC_TO_RESET_US);
    hw.write(Signal::Rst, polarity.asserted())?;

    if mode.is_serial() {
        // The target drives SDO high once in programming mode
        hw.delay_us(SDO_RELEASE_US);
        hw.set_direction(serial.data_out, Direction::Input)?;
    }

    hw.delay_us(ENTER_SETTLE_US);
    hw.write(Signal::Oe, Level::High)?;
    hw.write(Signal::Wr, Level::High)?;
    hw.delay_ms(POST_ENTER_MS);
    Ok(())
}

/// Release the target and power it down
pub fn exit_programming_mode<H: Hardware + ?Sized>(
    hw: &mut H,
    roles: PinRoles,
    polarity: ResetPolarity,
) -> HvResult<()> {
    hw.set_bus_direction(Direction::Input)?;
    hw.write(Signal::Rst, polarity.deasserted())?;
    hw.delay_ms(EXIT_RESET_HOLD_MS);

    hw.write(Signal::Oe, Level::Low)?;
    hw.write(Signal::Wr, Level::Low)?;
    hw.write(roles.pagel, Level::Low)?;
    hw.write(Signal::Xa1, Level::Low)?;
    hw.write(Signal::Xa0, Level::Low)?;
    hw.write(Signal::Bs1, Level::Low)?;
    hw.write(roles.bs2, Level::Low)?;
    hw.write(Signal::Vcc, Level::Low)?;
    Ok(())
}

pub struct ProgrammingSession<'a, H: Hardware + ?Sized, C: OperatorConsole + ?Sized> {
    hw: &'a mut H,
    console: &'a mut C,
    config: &'a RescueConfig,
    mode: Mode,
    roles: PinRoles,
    protocol: Box<dyn FuseProtocol<H>>,
    state: SessionState,
    initial: FuseSet,
    desired: FuseSet,
    read_back: FuseSet,
    progress_bar_enable: bool,
}

impl<'a, H: Hardware + ?Sized, C: OperatorConsole + ?Sized> ProgrammingSession<'a, H, C> {
    /// Create a session for a start request that has already been accepted
    pub fn new(hw: &'a mut H, console: &'a mut C, config: &'a RescueConfig, mode: Mode) -> Self {
        ProgrammingSession {
            hw,
            console,
            config,
            mode,
            roles: mode.pin_roles(),
            protocol: protocol_for_mode(mode, config.ready_wait()),
            state: SessionState::AwaitingTarget,
            initial: FuseSet::new(),
            desired: FuseSet::new(),
            read_back: FuseSet::new(),
            progress_bar_enable: false,
        }
    }

    pub fn progress_bar(&mut self, enable: bool) {
        self.progress_bar_enable = enable;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn read_back(&self) -> &FuseSet {
        &self.read_back
    }

    fn advance(&mut self, next: SessionState) {
        debug!("Session {} -> {}", self.state, next);
        self.state = next;
    }

    fn read_all(&mut self) -> HvResult<FuseSet> {
        let mut fuses = FuseSet::new();
        for selector in self.config.selectors() {
            let value = self.protocol.read_fuse(self.hw, selector)?;
            fuses.insert(selector, value);
        }
        Ok(fuses)
    }

    pub fn enter(&mut self) -> HvResult<()> {
        enter_programming_mode(self.hw, self.mode, self.config.reset_polarity)?;
        self.advance(SessionState::Entered);
        info!("Target in {} programming mode", self.protocol.name());
        Ok(())
    }

    pub fn read_initial(&mut self) -> HvResult<&FuseSet> {
        self.advance(SessionState::ReadingInitial);
        self.initial = self.read_all()?;
        self.read_back = self.initial.clone();
        for (selector, value) in self.initial.iter() {
            info!("Existing {} = 0x{:02X}", selector, value);
        }
        Ok(&self.initial)
    }

    pub fn obtain_desired(&mut self) -> HvResult<&FuseSet> {
        console::report_fuses(self.console, "Existing fuse values:", &self.initial)?;
        self.advance(SessionState::AwaitingDesiredValues);

        let mut desired = FuseSet::new();
        for selector in self.config.selectors() {
            let value = if self.config.interactive {
                self.console.write_str(&format!(
                    "Enter desired {} hex value (ie. 0x{:02X}): ",
                    selector.label(),
                    self.config.defaults.get(selector)
                ))?;
                self.console.flush()?;
                console::ask_fuse(self.console)?
            } else {
                self.config.defaults.get(selector)
            };
            desired.insert(selector, value);
        }
        self.desired = desired;
        Ok(&self.desired)
    }

    pub fn burn(&mut self) -> HvResult<()> {
        self.console.write_line("Burning fuses...")?;
        // Nothing may still be on the wire once the lines start moving
        self.console.flush()?;
        self.advance(SessionState::Burning);

        let order = self.config.burn_order();
        let pb = if self.progress_bar_enable {
            create_progress_bar(order.len() as u64, "Burning fuses")
        } else {
            ProgressBar::hidden()
        };

        for selector in order {
            if let Some(value) = self.desired.get(selector) {
                pb.set_message(format!("{} = 0x{:02X}", selector, value));
                self.protocol.write_fuse(self.hw, value, selector)?;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(())
    }

    pub fn verify(&mut self) -> HvResult<Vec<FuseMismatch>> {
        self.advance(SessionState::Verifying);
        self.read_back = self.read_all()?;
        console::report_fuses(self.console, "Read back fuse values:", &self.read_back)?;

        let mismatches = find_mismatches(&self.desired, &self.read_back);
        for mismatch in &mismatches {
            warn!(
                "{} verify mismatch: wanted 0x{:02X}, read 0x{:02X}",
                mismatch.selector, mismatch.desired, mismatch.actual
            );
            console::report_mismatch(self.console, mismatch)?;
        }
        Ok(mismatches)
    }

    pub fn exit(&mut self) -> HvResult<()> {
        exit_programming_mode(self.hw, self.roles, self.config.reset_polarity)?;
        self.advance(SessionState::Exited);
        Ok(())
    }

    fn program(&mut self) -> HvResult<Vec<FuseMismatch>> {
        self.enter()?;
        self.read_initial()?;
        self.obtain_desired()?;
        self.burn()?;
        self.verify()
    }

    /// Run every step, always finishing with the exit sequence
    pub fn run(mut self) -> HvResult<SessionReport> {
        let outcome = self.program();

        if let Err(e) = &outcome {
            error!("Session aborted in {}: {}", self.state, e);
        }
        self.exit()?;
        let mismatches = outcome?;

        self.console.write_line("Burn complete.")?;
        self.console.write_line("")?;
        self.console.write_line("It is now safe to remove the target AVR.")?;
        self.console.write_line("")?;
        self.console.flush()?;

        Ok(SessionReport {
            mode: self.mode,
            initial: self.initial,
            desired: self.desired,
            verified: self.read_back,
            mismatches,
        })
    }
}

/// Wait for whatever starts a run in this configuration
pub fn wait_for_start<H, C>(hw: &mut H, console: &mut C, start: StartSignal) -> HvResult<()>
where
    H: Hardware + ?Sized,
    C: OperatorConsole + ?Sized,
{
    match start {
        StartSignal::Button => {
            console.write_line("Insert target AVR and press button.")?;
            console.flush()?;
            wait_for_button(hw)
        }
        StartSignal::Console => {
            console.write_line("Insert target AVR and press Enter.")?;
            console.flush()?;
            console::wait_for_enter(console)
        }
    }
}
