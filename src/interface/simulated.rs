//! In-memory target for dry runs and tests.
//!
//! Models the target side of both protocols closely enough to catch
//! sequencing mistakes: parallel command and data latching on XTAL1, fuse
//! programming on the falling edge of !WR, fuse output while !OE is low, and
//! the serial shift registers clocked by SCI including the response register
//! that is loaded at the start of each frame. Nothing happens unless VCC is
//! on and the 12 V reset is applied.
//!
//! Delays don't sleep, they only advance a virtual clock.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::trace;

use crate::config::ResetPolarity;
use crate::constants::{HVPP_CMD_READ_FUSE, HVPP_CMD_WRITE_FUSE, SIGNAL_COUNT};
use crate::error::HvResult;
use crate::interface::{ControlLines, DataBus, Direction, Level, Signal};
use crate::targets::{FuseSelector, Mode, PinRoles, SerialPins};
use crate::timing::Delay;

const DEFAULT_BUSY_POLLS: u32 = 3;

/// Everything the host did to the simulated socket, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Direction(Signal, Direction),
    Write(Signal, Level),
    BusDirection(Direction),
    BusWrite(u8),
    Delay(u64),
}

/// Which fuse access a select pattern was observed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseAccess {
    Read,
    Program,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerialCommand {
    None,
    ReadFuse,
    WriteFuse,
}

#[derive(Debug, Default)]
struct ShiftRegister {
    data: u16,
    instruction: u16,
    position: usize,
    output: u8,
}

pub struct SimulatedTarget {
    mode: Mode,
    roles: PinRoles,
    serial: SerialPins,
    reset_polarity: ResetPolarity,

    levels: [Level; SIGNAL_COUNT],
    directions: [Direction; SIGNAL_COUNT],
    bus_direction: Direction,
    bus_value: u8,

    fuses: BTreeMap<FuseSelector, u8>,
    honor_writes: bool,
    stuck_busy: bool,
    busy_polls: u32,
    busy_remaining: u32,

    command: Option<u8>,
    data_latch: u8,

    shift: ShiftRegister,
    serial_command: SerialCommand,
    pending_response: u8,
    armed: Option<FuseSelector>,
    clock_pulses: u64,

    button: VecDeque<Level>,
    elapsed: Duration,
    recording: bool,
    events: Vec<SimEvent>,
    selections: Vec<(FuseAccess, FuseSelector, Level, Level)>,
}

impl SimulatedTarget {
    /// A target of the given family carrying ATmega168 factory fuses
    pub fn new(mode: Mode) -> Self {
        let mut fuses = BTreeMap::new();
        fuses.insert(FuseSelector::Low, 0x62);
        fuses.insert(FuseSelector::High, 0xDF);
        fuses.insert(FuseSelector::Extended, 0xF9);

        SimulatedTarget {
            mode,
            roles: mode.pin_roles(),
            serial: SerialPins::STANDARD,
            reset_polarity: ResetPolarity::ActiveLow,
            levels: [Level::Low; SIGNAL_COUNT],
            directions: [Direction::Input; SIGNAL_COUNT],
            bus_direction: Direction::Input,
            bus_value: 0,
            fuses,
            honor_writes: true,
            stuck_busy: false,
            busy_polls: DEFAULT_BUSY_POLLS,
            busy_remaining: 0,
            command: None,
            data_latch: 0,
            shift: ShiftRegister::default(),
            serial_command: SerialCommand::None,
            pending_response: 0,
            armed: None,
            clock_pulses: 0,
            button: VecDeque::new(),
            elapsed: Duration::ZERO,
            recording: false,
            events: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn with_fuses(mut self, low: u8, high: u8, extended: u8) -> Self {
        self.fuses.insert(FuseSelector::Low, low);
        self.fuses.insert(FuseSelector::High, high);
        self.fuses.insert(FuseSelector::Extended, extended);
        self
    }

    /// Accept programming cycles without changing any fuse
    pub fn ignoring_writes(mut self) -> Self {
        self.honor_writes = false;
        self
    }

    /// Hold the ready line low forever after a programming cycle
    pub fn never_ready(mut self) -> Self {
        self.stuck_busy = true;
        self
    }

    /// Number of ready polls answered with busy after each programming cycle
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn with_reset_polarity(mut self, polarity: ResetPolarity) -> Self {
        self.reset_polarity = polarity;
        self
    }

    /// Keep the event and selection logs. Off by default, a dry run serving
    /// targets forever would otherwise grow them without bound.
    pub fn recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Queue levels returned by successive reads of the start button.
    /// Once drained the button reads as pressed.
    pub fn script_button<I: IntoIterator<Item = Level>>(&mut self, levels: I) {
        self.button.extend(levels);
    }

    pub fn fuse(&self, selector: FuseSelector) -> u8 {
        self.fuses.get(&selector).copied().unwrap_or(0xFF)
    }

    pub fn level(&self, line: Signal) -> Level {
        self.levels[line.index()]
    }

    pub fn direction(&self, line: Signal) -> Direction {
        self.directions[line.index()]
    }

    pub fn bus_direction(&self) -> Direction {
        self.bus_direction
    }

    /// Rising SCI edges seen so far
    pub fn clock_pulses(&self) -> u64 {
        self.clock_pulses
    }

    /// Virtual time spent in delays
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Host actions since the last clear, empty unless [`Self::recording`]
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Select line levels observed at each fuse read and programming cycle,
    /// empty unless [`Self::recording`]
    pub fn selections(&self) -> &[(FuseAccess, FuseSelector, Level, Level)] {
        &self.selections
    }

    pub fn in_programming_mode(&self) -> bool {
        self.level(Signal::Vcc).is_high()
            && self.level(Signal::Rst) == self.reset_polarity.asserted()
    }

    fn record(&mut self, event: SimEvent) {
        if self.recording {
            self.events.push(event);
        }
    }

    fn record_selection(&mut self, access: FuseAccess, selector: FuseSelector) {
        if self.recording {
            let (bs1, bs2) = (self.level(Signal::Bs1), self.level(self.roles.bs2));
            self.selections.push((access, selector, bs1, bs2));
        }
    }

    fn selected_fuse(&self) -> Option<FuseSelector> {
        FuseSelector::from_select_pattern(self.level(Signal::Bs1), self.level(self.roles.bs2))
    }

    fn program(&mut self, selector: FuseSelector, value: u8) {
        trace!("sim: program {} = 0x{:02X}", selector, value);
        if self.honor_writes {
            self.fuses.insert(selector, value);
        }
        self.busy_remaining = self.busy_polls;
    }

    fn ready_level(&mut self) -> Level {
        if self.stuck_busy && self.command_was_programmed() {
            return Level::Low;
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Level::Low;
        }
        Level::High
    }

    fn command_was_programmed(&self) -> bool {
        self.command == Some(HVPP_CMD_WRITE_FUSE) || self.serial_command == SerialCommand::WriteFuse
    }

    fn on_xtal_rising(&mut self) {
        if self.bus_direction != Direction::Output {
            return;
        }
        match (self.level(Signal::Xa1), self.level(Signal::Xa0)) {
            (Level::High, Level::Low) => {
                trace!("sim: command 0x{:02X}", self.bus_value);
                self.command = Some(self.bus_value);
            }
            (Level::Low, Level::High) => self.data_latch = self.bus_value,
            _ => {}
        }
    }

    fn on_write_falling(&mut self) {
        if self.command != Some(HVPP_CMD_WRITE_FUSE) {
            return;
        }
        if let Some(selector) = self.selected_fuse() {
            self.record_selection(FuseAccess::Program, selector);
            self.program(selector, self.data_latch);
        }
    }

    fn on_serial_clock(&mut self) {
        self.clock_pulses += 1;
        if self.shift.position == 0 {
            self.shift.output = self.pending_response;
            self.pending_response = 0;
        }
        let data = self.level(self.serial.data_in).is_high() as u16;
        let instruction = self.level(self.serial.instruction_in).is_high() as u16;
        self.shift.data = (self.shift.data << 1) | data;
        self.shift.instruction = (self.shift.instruction << 1) | instruction;
        self.shift.position += 1;

        if self.shift.position == crate::protocols::hvsp::FRAME_BITS {
            let data = ((self.shift.data >> 2) & 0xFF) as u8;
            let instruction = ((self.shift.instruction >> 2) & 0xFF) as u8;
            self.shift = ShiftRegister::default();
            self.on_serial_frame(data, instruction);
        }
    }

    fn on_serial_frame(&mut self, data: u8, instruction: u8) {
        trace!("sim: frame data=0x{:02X} instr=0x{:02X}", data, instruction);
        match (data, instruction) {
            (0x04, 0x4C) => {
                self.serial_command = SerialCommand::ReadFuse;
                return;
            }
            (0x40, 0x4C) => {
                self.serial_command = SerialCommand::WriteFuse;
                return;
            }
            _ => {}
        }

        match self.serial_command {
            SerialCommand::ReadFuse => {
                let selector = match instruction {
                    0x68 => Some(FuseSelector::Low),
                    0x7A => Some(FuseSelector::High),
                    0x6A => Some(FuseSelector::Extended),
                    _ => None,
                };
                if let Some(selector) = selector {
                    self.pending_response = self.fuse(selector);
                }
            }
            SerialCommand::WriteFuse => match instruction {
                0x2C => self.data_latch = data,
                0x64 => self.armed = Some(FuseSelector::Low),
                0x74 => self.armed = Some(FuseSelector::High),
                0x66 => self.armed = Some(FuseSelector::Extended),
                0x6C | 0x7C | 0x6E => {
                    let commit = match instruction {
                        0x6C => FuseSelector::Low,
                        0x7C => FuseSelector::High,
                        _ => FuseSelector::Extended,
                    };
                    if self.armed.take() == Some(commit) {
                        self.program(commit, self.data_latch);
                    }
                }
                _ => {}
            },
            SerialCommand::None => {}
        }
    }

    fn serial_output(&mut self) -> Level {
        match self.shift.position {
            // After the start bit and the first seven payload bits
            position @ 1..=8 => Level::from(self.shift.output & (0x80 >> (position - 1)) != 0),
            0 => self.ready_level(),
            _ => Level::Low,
        }
    }
}

impl ControlLines for SimulatedTarget {
    fn set_direction(&mut self, line: Signal, direction: Direction) -> HvResult<()> {
        self.record(SimEvent::Direction(line, direction));
        self.directions[line.index()] = direction;
        Ok(())
    }

    fn write(&mut self, line: Signal, level: Level) -> HvResult<()> {
        self.record(SimEvent::Write(line, level));
        let previous = self.levels[line.index()];
        self.levels[line.index()] = level;

        if !self.in_programming_mode() || previous == level {
            return Ok(());
        }

        if self.mode.is_serial() {
            if line == self.serial.clock && level.is_high() {
                self.on_serial_clock();
            }
        } else if line == Signal::Xtal1 && level.is_high() {
            self.on_xtal_rising();
        } else if line == Signal::Wr && level == Level::Low {
            self.on_write_falling();
        }
        Ok(())
    }

    fn read(&mut self, line: Signal) -> HvResult<Level> {
        let level = match line {
            Signal::Button => self.button.pop_front().unwrap_or(Level::Low),
            Signal::Rdy if self.in_programming_mode() => {
                if self.mode.is_serial() {
                    self.serial_output()
                } else {
                    self.ready_level()
                }
            }
            _ => self.levels[line.index()],
        };
        Ok(level)
    }
}

impl DataBus for SimulatedTarget {
    fn set_bus_direction(&mut self, direction: Direction) -> HvResult<()> {
        self.record(SimEvent::BusDirection(direction));
        self.bus_direction = direction;
        Ok(())
    }

    fn write_bus(&mut self, value: u8) -> HvResult<()> {
        self.record(SimEvent::BusWrite(value));
        self.bus_value = value;
        Ok(())
    }

    fn read_bus(&mut self) -> HvResult<u8> {
        let driving = self.in_programming_mode()
            && self.bus_direction == Direction::Input
            && self.level(Signal::Oe) == Level::Low
            && self.command == Some(HVPP_CMD_READ_FUSE);
        if !driving {
            return Ok(0x00);
        }

        match self.selected_fuse() {
            Some(selector) => {
                self.record_selection(FuseAccess::Read, selector);
                Ok(self.fuse(selector))
            }
            None => Ok(0x00),
        }
    }
}

impl Delay for SimulatedTarget {
    fn delay_us(&mut self, us: u64) {
        self.record(SimEvent::Delay(us));
        self.elapsed += Duration::from_micros(us);
    }
}
