use crate::error::HvResult;
use crate::interface::Hardware;
use crate::targets::{FuseSelector, Mode};
use crate::timing::ReadyWait;

pub mod hvpp;
pub mod hvsp;

/// Fuse access over one high-voltage programming protocol. Only valid while
/// the target is in programming mode.
pub trait FuseProtocol<H: Hardware + ?Sized> {
    fn read_fuse(&self, hw: &mut H, selector: FuseSelector) -> HvResult<u8>;

    /// Program `value` and wait until the target reports ready
    fn write_fuse(&self, hw: &mut H, value: u8, selector: FuseSelector) -> HvResult<()>;

    fn name(&self) -> &'static str;
}

/// Pick the protocol engine for a mode
pub fn protocol_for_mode<H: Hardware + ?Sized>(
    mode: Mode,
    ready: ReadyWait,
) -> Box<dyn FuseProtocol<H>> {
    match mode {
        Mode::ParallelATmega | Mode::ParallelATtiny2313 => {
            Box::new(hvpp::Hvpp::new(mode.pin_roles(), ready))
        }
        Mode::SerialHvsp => Box::new(hvsp::Hvsp::new(ready)),
    }
}
