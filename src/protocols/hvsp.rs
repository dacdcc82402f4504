//! High-voltage serial programming for 8-pin ATtiny parts.
//!
//! Every transfer is an 11-bit frame clocked on SCI: a zero start bit, eight
//! bits MSB first, two zero stop bits. SDI carries the data byte and SII the
//! instruction byte in lockstep. The target shifts its response out on SDO
//! starting right after the start bit, so the response seen during a frame
//! belongs to the instructions of the frames before it.
//!
//! Instruction sequences are from the ATtiny25/45/85 serial programming
//! instruction set.

use tracing::{debug, trace};

use crate::constants::SCLK_HOLD_MS;
use crate::error::{HvError, HvResult};
use crate::interface::{ControlLines, Hardware, Level};
use crate::protocols::FuseProtocol;
use crate::targets::{FuseSelector, SerialPins};
use crate::timing::{Delay, PollOutcome, ReadyWait, poll_until_high, strobe};

pub const FRAME_BITS: usize = 11;

/// Start bit plus the seven bits after it; the last payload bit isn't sampled
const SAMPLED_BITS: usize = 8;

const READ_FUSE_LOAD: SerialFrame = SerialFrame::new(0b0000_0100, 0b0100_1100);
const WRITE_FUSE_LOAD: SerialFrame = SerialFrame::new(0b0100_0000, 0b0100_1100);
const WRITE_DATA_INSTRUCTION: u8 = 0b0010_1100;

/// One data byte and one instruction byte shifted out together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFrame {
    pub data: u8,
    pub instruction: u8,
}

impl SerialFrame {
    pub const fn new(data: u8, instruction: u8) -> Self {
        SerialFrame { data, instruction }
    }

    const fn instruction(instruction: u8) -> Self {
        SerialFrame::new(0x00, instruction)
    }

    /// (SDI, SII) levels for each of the 11 clock cycles
    pub fn bits(&self) -> impl Iterator<Item = (Level, Level)> + use<> {
        let data = self.data;
        let instruction = self.instruction;
        let payload = (0..8).map(move |bit| {
            let mask = 0x80 >> bit;
            (
                Level::from(data & mask != 0),
                Level::from(instruction & mask != 0),
            )
        });

        std::iter::once((Level::Low, Level::Low))
            .chain(payload)
            .chain(std::iter::repeat_n((Level::Low, Level::Low), 2))
    }
}

/// Frames reading one fuse; the fuse byte is the response of the last one
pub fn read_sequence(selector: FuseSelector) -> [SerialFrame; 3] {
    let (select, output) = match selector {
        FuseSelector::Low => (0b0110_1000, 0b0110_1100),
        FuseSelector::High => (0b0111_1010, 0b0111_1110),
        FuseSelector::Extended => (0b0110_1010, 0b0110_1110),
    };
    [
        READ_FUSE_LOAD,
        SerialFrame::instruction(select),
        SerialFrame::instruction(output),
    ]
}

/// Frames programming `value` into one fuse
pub fn write_sequence(selector: FuseSelector, value: u8) -> [SerialFrame; 4] {
    let (write, commit) = match selector {
        FuseSelector::Low => (0b0110_0100, 0b0110_1100),
        FuseSelector::High => (0b0111_0100, 0b0111_1100),
        FuseSelector::Extended => (0b0110_0110, 0b0110_1110),
    };
    [
        WRITE_FUSE_LOAD,
        SerialFrame::new(value, WRITE_DATA_INSTRUCTION),
        SerialFrame::instruction(write),
        SerialFrame::instruction(commit),
    ]
}

/// Shift one frame out and collect what the target shifted back.
///
/// Always emits exactly [`FRAME_BITS`] clock pulses. SDO is sampled after
/// the start bit (response MSB) and after each of the first seven payload
/// bits.
pub fn transfer_frame<H>(hw: &mut H, pins: &SerialPins, frame: SerialFrame) -> HvResult<u8>
where
    H: ControlLines + Delay + ?Sized,
{
    let mut response = 0u8;

    hw.write(pins.clock, Level::Low)?;
    for (index, (data, instruction)) in frame.bits().enumerate() {
        hw.write(pins.data_in, data)?;
        hw.write(pins.instruction_in, instruction)?;
        strobe(hw, pins.clock, SCLK_HOLD_MS)?;

        if index < SAMPLED_BITS && hw.read(pins.data_out)?.is_high() {
            response |= 0x80 >> index;
        }
    }

    trace!(
        "HVSP frame data=0x{:02X} instr=0x{:02X} -> 0x{:02X}",
        frame.data, frame.instruction, response
    );
    Ok(response)
}

/// High-voltage serial programming engine
pub struct Hvsp {
    pins: SerialPins,
    ready: ReadyWait,
}

impl Hvsp {
    pub fn new(ready: ReadyWait) -> Self {
        Hvsp {
            pins: SerialPins::STANDARD,
            ready,
        }
    }
}

impl<H: Hardware + ?Sized> FuseProtocol<H> for Hvsp {
    fn read_fuse(&self, hw: &mut H, selector: FuseSelector) -> HvResult<u8> {
        let mut value = 0;
        // Responses to the first two frames are handshake noise
        for frame in read_sequence(selector) {
            value = transfer_frame(hw, &self.pins, frame)?;
        }

        debug!("HVSP read {} = 0x{:02X}", selector, value);
        Ok(value)
    }

    fn write_fuse(&self, hw: &mut H, value: u8, selector: FuseSelector) -> HvResult<()> {
        debug!("HVSP write {} = 0x{:02X}", selector, value);
        for frame in write_sequence(selector, value) {
            transfer_frame(hw, &self.pins, frame)?;
        }

        match poll_until_high(hw, self.pins.data_out, &self.ready)? {
            PollOutcome::Ready => Ok(()),
            PollOutcome::TimedOut => Err(HvError::TargetTimeout {
                line: self.pins.data_out,
                timeout: self.ready.timeout,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "HVSP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bits_are_msb_first_with_padding() {
        let bits: Vec<_> = SerialFrame::new(0b1000_0001, 0b0100_0000).bits().collect();
        assert_eq!(bits.len(), FRAME_BITS);
        assert_eq!(bits[0], (Level::Low, Level::Low));
        assert_eq!(bits[1], (Level::High, Level::Low));
        assert_eq!(bits[2], (Level::Low, Level::High));
        assert_eq!(bits[8], (Level::High, Level::Low));
        assert_eq!(bits[9], (Level::Low, Level::Low));
        assert_eq!(bits[10], (Level::Low, Level::Low));
    }

    #[test]
    fn write_sequence_carries_value_in_second_frame() {
        let frames = write_sequence(FuseSelector::High, 0xD9);
        assert_eq!(frames[0], SerialFrame::new(0x40, 0x4C));
        assert_eq!(frames[1], SerialFrame::new(0xD9, 0x2C));
        assert_eq!(frames[2], SerialFrame::new(0x00, 0x74));
        assert_eq!(frames[3], SerialFrame::new(0x00, 0x7C));
    }

    #[test]
    fn read_sequences_share_the_load_frame() {
        for selector in FuseSelector::ALL {
            let frames = read_sequence(selector);
            assert_eq!(frames[0], SerialFrame::new(0x04, 0x4C));
            assert_eq!(frames[1].data, 0x00);
            assert_eq!(frames[2].data, 0x00);
        }
        assert_eq!(read_sequence(FuseSelector::Low)[2].instruction, 0x6C);
        assert_eq!(read_sequence(FuseSelector::Extended)[1].instruction, 0x6A);
    }
}
