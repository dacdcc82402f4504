// Enter sequence
pub(crate) const VCC_TO_RESET_US: u64 = 80;
pub(crate) const SDO_RELEASE_US: u64 = 1;
pub(crate) const ENTER_SETTLE_US: u64 = 10;
pub(crate) const POST_ENTER_MS: u64 = 1;
pub(crate) const EXIT_RESET_HOLD_MS: u64 = 1;

// Line strobes and settle times
pub(crate) const XTAL_STROBE_HOLD_MS: u64 = 1;
pub(crate) const SCLK_HOLD_MS: u64 = 1;
pub(crate) const CONTROL_SETTLE_MS: u64 = 1;
pub(crate) const WRITE_PULSE_MS: u64 = 1;
pub(crate) const OUTPUT_ENABLE_SETTLE_MS: u64 = 1;

pub(crate) const DEBOUNCE_MS: u64 = 100;
pub(crate) const BUTTON_POLL_MS: u64 = 10;

// Below this a delay is spun instead of slept
pub(crate) const SPIN_THRESHOLD_US: u64 = 200;

pub(crate) const DEFAULT_READY_TIMEOUT_MS: u64 = 100;
pub(crate) const DEFAULT_READY_POLL_INTERVAL_US: u64 = 100;

// HVPP commands
pub(crate) const HVPP_CMD_WRITE_FUSE: u8 = 0b0100_0000;
pub(crate) const HVPP_CMD_READ_FUSE: u8 = 0b0000_0100;

// Control signals including the start button
pub(crate) const SIGNAL_COUNT: usize = 12;
