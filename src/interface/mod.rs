#[cfg(target_os = "linux")]
pub mod gpio;
pub mod simulated;

use std::{fmt, str::FromStr};

use crate::error::{HvError, HvResult};
use crate::timing::Delay;

/// Discrete control signals between the host and the target socket.
///
/// Names follow the parallel programming pinout. Serial mode reuses four of
/// them, see [`crate::targets::SerialPins`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Vcc = 0,
    /// RDY/!BSY from the target, SDO in serial mode
    Rdy = 1,
    Oe = 2,
    Wr = 3,
    Bs1 = 4,
    Xa0 = 5,
    Xa1 = 6,
    Pagel = 7,
    /// Enable of the 12 V reset supply
    Rst = 8,
    Xtal1 = 9,
    Bs2 = 10,
    /// Operator start button, active low
    Button = 11,
}

impl Signal {
    pub const ALL: [Signal; 12] = [
        Signal::Vcc,
        Signal::Rdy,
        Signal::Oe,
        Signal::Wr,
        Signal::Bs1,
        Signal::Xa0,
        Signal::Xa1,
        Signal::Pagel,
        Signal::Rst,
        Signal::Xtal1,
        Signal::Bs2,
        Signal::Button,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Vcc => "vcc",
            Signal::Rdy => "rdy",
            Signal::Oe => "oe",
            Signal::Wr => "wr",
            Signal::Bs1 => "bs1",
            Signal::Xa0 => "xa0",
            Signal::Xa1 => "xa1",
            Signal::Pagel => "pagel",
            Signal::Rst => "rst",
            Signal::Xtal1 => "xtal1",
            Signal::Bs2 => "bs2",
            Signal::Button => "button",
        }
    }

    /// Direction a line rests in between sessions
    pub fn idle_direction(&self) -> Direction {
        match self {
            Signal::Rdy | Signal::Button => Direction::Input,
            _ => Direction::Output,
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

impl FromStr for Signal {
    type Err = HvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signal::ALL
            .into_iter()
            .find(|signal| signal.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HvError::ConfigurationError(format!("Unknown signal name {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        *self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Named control lines with switchable direction.
///
/// Writing a line configured as input, or reading one configured as output,
/// is undefined. Implementations don't have to detect it.
pub trait ControlLines {
    fn set_direction(&mut self, line: Signal, direction: Direction) -> HvResult<()>;

    fn write(&mut self, line: Signal, level: Level) -> HvResult<()>;

    fn read(&mut self, line: Signal) -> HvResult<Level>;
}

/// 8-bit parallel data bus used by the parallel protocol.
///
/// After switching to [`Direction::Input`] the bus must be undriven before
/// the next `read_bus`.
pub trait DataBus {
    fn set_bus_direction(&mut self, direction: Direction) -> HvResult<()>;

    fn write_bus(&mut self, value: u8) -> HvResult<()>;

    fn read_bus(&mut self) -> HvResult<u8>;
}

/// Everything a programming session needs from the host board
pub trait Hardware: ControlLines + DataBus + Delay {}

impl<T: ControlLines + DataBus + Delay + ?Sized> Hardware for T {}
