use tracing::{debug, trace};

use crate::constants::{
    CONTROL_SETTLE_MS, HVPP_CMD_READ_FUSE, HVPP_CMD_WRITE_FUSE, OUTPUT_ENABLE_SETTLE_MS,
    WRITE_PULSE_MS, XTAL_STROBE_HOLD_MS,
};
use crate::error::{HvError, HvResult};
use crate::interface::{Direction, Hardware, Level, Signal};
use crate::protocols::FuseProtocol;
use crate::targets::{FuseSelector, PinRoles};
use crate::timing::{PollOutcome, ReadyWait, poll_until_high, strobe};

/// High-voltage parallel programming over the 8-bit data bus
pub struct Hvpp {
    roles: PinRoles,
    ready: ReadyWait,
}

impl Hvpp {
    pub fn new(roles: PinRoles, ready: ReadyWait) -> Self {
        Hvpp { roles, ready }
    }

    /// Put `value` on the bus, latch it with XTAL1 and release the bus.
    fn latch_byte<H: Hardware + ?Sized>(&self, hw: &mut H, value: u8) -> HvResult<()> {
        hw.set_bus_direction(Direction::Output)?;
        hw.write_bus(value)?;
        strobe(hw, Signal::Xtal1, XTAL_STROBE_HOLD_MS)?;

        // Leave the bus undriven, the target may drive it next
        hw.write_bus(0x00)?;
        hw.set_bus_direction(Direction::Input)?;
        Ok(())
    }

    pub fn send_command<H: Hardware + ?Sized>(&self, hw: &mut H, command: u8) -> HvResult<()> {
        trace!("HVPP command 0x{:02X}", command);
        hw.write(Signal::Xa1, Level::High)?;
        hw.write(Signal::Xa0, Level::Low)?;
        hw.write(Signal::Bs1, Level::Low)?;
        // Command load fails with BS2 high; on the 2313 BS2 is XA1 itself
        if self.roles.has_dedicated_bs2() {
            hw.write(self.roles.bs2, Level::Low)?;
        }

        self.latch_byte(hw, command)
    }

    pub fn load_fuse_data<H: Hardware + ?Sized>(&self, hw: &mut H, value: u8) -> HvResult<()> {
        trace!("HVPP data 0x{:02X}", value);
        hw.write(Signal::Xa1, Level::Low)?;
        hw.write(Signal::Xa0, Level::High)?;
        // Low byte
        hw.write(Signal::Bs1, Level::Low)?;
        if self.roles.has_dedicated_bs2() {
            hw.write(self.roles.bs2, Level::Low)?;
        }
        hw.delay_ms(CONTROL_SETTLE_MS);

        self.latch_byte(hw, value)
    }

    fn select_fuse<H: Hardware + ?Sized>(&self, hw: &mut H, selector: FuseSelector) -> HvResult<()> {
        let (bs1, bs2) = selector.select_pattern();
        hw.write(Signal::Bs1, bs1)?;
        hw.write(self.roles.bs2, bs2)?;
        Ok(())
    }
}

impl<H: Hardware + ?Sized> FuseProtocol<H> for Hvpp {
    fn read_fuse(&self, hw: &mut H, selector: FuseSelector) -> HvResult<u8> {
        self.send_command(hw, HVPP_CMD_READ_FUSE)?;

        hw.set_bus_direction(Direction::Input)?;
        self.select_fuse(hw, selector)?;

        hw.write(Signal::Oe, Level::Low)?;
        hw.delay_ms(OUTPUT_ENABLE_SETTLE_MS);
        let value = hw.read_bus()?;
        hw.write(Signal::Oe, Level::High)?;

        debug!("HVPP read {} = 0x{:02X}", selector, value);
        Ok(value)
    }

    fn write_fuse(&self, hw: &mut H, value: u8, selector: FuseSelector) -> HvResult<()> {
        debug!("HVPP write {} = 0x{:02X}", selector, value);
        self.send_command(hw, HVPP_CMD_WRITE_FUSE)?;
        self.load_fuse_data(hw, value)?;

        self.select_fuse(hw, selector)?;
        hw.delay_ms(CONTROL_SETTLE_MS);

        hw.write(Signal::Wr, Level::Low)?;
        hw.delay_ms(WRITE_PULSE_MS);
        hw.write(Signal::Wr, Level::High)?;

        let outcome = poll_until_high(hw, Signal::Rdy, &self.ready)?;

        // Select lines go back low even when the target never answered
        hw.write(Signal::Bs1, Level::Low)?;
        hw.write(self.roles.bs2, Level::Low)?;

        match outcome {
            PollOutcome::Ready => Ok(()),
            PollOutcome::TimedOut => Err(HvError::TargetTimeout {
                line: Signal::Rdy,
                timeout: self.ready.timeout,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "HVPP"
    }
}
