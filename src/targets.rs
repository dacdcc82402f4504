use std::fmt;

use clap::ValueEnum;

use crate::error::{HvError, HvResult};
use crate::interface::{Level, Signal};

/// Target family being rescued. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// 28-pin ATmega parts, parallel programming
    #[value(name = "atmega")]
    ParallelATmega,

    /// ATtiny2313, parallel programming with shared PAGEL/BS2
    #[value(name = "attiny2313")]
    ParallelATtiny2313,

    /// 8-pin ATtiny parts, serial programming
    #[value(name = "hvsp")]
    SerialHvsp,
}

impl Mode {
    /// Menu entries in the order the operator picks them
    pub const MENU: [Mode; 3] = [Mode::ParallelATmega, Mode::ParallelATtiny2313, Mode::SerialHvsp];

    pub fn from_menu_choice(choice: u8) -> HvResult<Self> {
        match choice {
            b'1' => Ok(Mode::ParallelATmega),
            b'2' => Ok(Mode::ParallelATtiny2313),
            b'3' => Ok(Mode::SerialHvsp),
            other => Err(HvError::InvalidModeSelection(other as char)),
        }
    }

    pub fn menu_label(&self) -> &'static str {
        match self {
            Mode::ParallelATmega => "ATmega (28-pin)",
            Mode::ParallelATtiny2313 => "ATtiny2313",
            Mode::SerialHvsp => "ATtiny (8-pin) / HVSP",
        }
    }

    pub fn is_serial(&self) -> bool {
        *self == Mode::SerialHvsp
    }

    /// Resolve which physical signals carry the aliased roles in this mode
    pub fn pin_roles(&self) -> PinRoles {
        match self {
            Mode::ParallelATmega | Mode::SerialHvsp => PinRoles {
                pagel: Signal::Pagel,
                bs2: Signal::Bs2,
            },
            Mode::ParallelATtiny2313 => PinRoles {
                pagel: Signal::Bs1,
                bs2: Signal::Xa1,
            },
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::ParallelATmega => "ATMEGA",
            Mode::ParallelATtiny2313 => "ATtiny2313",
            Mode::SerialHvsp => "ATtiny/HVSP",
        };
        f.write_str(name)
    }
}

/// Physical lines carrying PAGEL and BS2 for one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRoles {
    pub pagel: Signal,
    pub bs2: Signal,
}

impl PinRoles {
    /// False when BS2 shares a line with XA1 and must be left alone during
    /// command and data loads.
    pub fn has_dedicated_bs2(&self) -> bool {
        self.bs2 == Signal::Bs2
    }
}

/// Serial programming pins, shared with the parallel pinout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialPins {
    /// SCI, serial clock
    pub clock: Signal,
    /// SDO, response from the target and ready flag
    pub data_out: Signal,
    /// SII, instruction bits
    pub instruction_in: Signal,
    /// SDI, data bits
    pub data_in: Signal,
}

impl SerialPins {
    pub const STANDARD: SerialPins = SerialPins {
        clock: Signal::Bs1,
        data_out: Signal::Rdy,
        instruction_in: Signal::Xa0,
        data_in: Signal::Xa1,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FuseSelector {
    Low,
    High,
    Extended,
}

impl FuseSelector {
    /// Read order
    pub const ALL: [FuseSelector; 3] = [FuseSelector::Low, FuseSelector::High, FuseSelector::Extended];

    pub fn label(&self) -> &'static str {
        match self {
            FuseSelector::Low => "LFUSE",
            FuseSelector::High => "HFUSE",
            FuseSelector::Extended => "EFUSE",
        }
    }

    /// (BS1, BS2) levels addressing this fuse, shared by read and write
    pub fn select_pattern(&self) -> (Level, Level) {
        match self {
            FuseSelector::Low => (Level::Low, Level::Low),
            FuseSelector::High => (Level::High, Level::High),
            FuseSelector::Extended => (Level::Low, Level::High),
        }
    }

    pub fn from_select_pattern(bs1: Level, bs2: Level) -> Option<Self> {
        FuseSelector::ALL
            .into_iter()
            .find(|selector| selector.select_pattern() == (bs1, bs2))
    }
}

impl fmt::Display for FuseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
