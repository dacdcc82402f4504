use std::time::Duration;

use clap::ValueEnum;

use crate::constants::{DEFAULT_READY_POLL_INTERVAL_US, DEFAULT_READY_TIMEOUT_MS};
use crate::error::{HvError, HvResult};
use crate::interface::Level;
use crate::targets::{FuseSelector, Mode};
use crate::timing::ReadyWait;

/// Fuse values burned when the operator is not prompted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseDefaults {
    pub low: u8,
    pub high: u8,
    pub extended: u8,
}

impl Default for FuseDefaults {
    // ATmega168 factory values
    fn default() -> Self {
        FuseDefaults {
            low: 0x62,
            high: 0xDF,
            extended: 0xF9,
        }
    }
}

impl FuseDefaults {
    pub fn get(&self, selector: FuseSelector) -> u8 {
        match selector {
            FuseSelector::Low => self.low,
            FuseSelector::High => self.high,
            FuseSelector::Extended => self.extended,
        }
    }
}

/// What starts a programming run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StartSignal {
    /// Debounced press of the start button line
    Button,
    /// Enter key on the operator console
    Console,
}

/// Level that switches the 12 V reset supply on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolarity {
    ActiveLow,
    ActiveHigh,
}

impl ResetPolarity {
    pub fn asserted(&self) -> Level {
        match self {
            ResetPolarity::ActiveLow => Level::Low,
            ResetPolarity::ActiveHigh => Level::High,
        }
    }

    pub fn deasserted(&self) -> Level {
        match self {
            ResetPolarity::ActiveLow => Level::High,
            ResetPolarity::ActiveHigh => Level::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RescueConfig {
    /// `None` asks the operator at startup
    pub mode: Option<Mode>,
    pub interactive: bool,
    pub burn_extended: bool,
    pub defaults: FuseDefaults,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub start: StartSignal,
    pub reset_polarity: ResetPolarity,
}

impl Default for RescueConfig {
    fn default() -> Self {
        RescueConfig {
            mode: None,
            interactive: true,
            burn_extended: false,
            defaults: FuseDefaults::default(),
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            ready_poll_interval: Duration::from_micros(DEFAULT_READY_POLL_INTERVAL_US),
            start: StartSignal::Button,
            reset_polarity: ResetPolarity::ActiveLow,
        }
    }
}

impl RescueConfig {
    /// Fuses handled in this run, in read order
    pub fn selectors(&self) -> Vec<FuseSelector> {
        FuseSelector::ALL
            .into_iter()
            .filter(|selector| self.burn_extended || *selector != FuseSelector::Extended)
            .collect()
    }

    /// Fuses in burn order: high before low so the low fuse is programmed
    /// under the new high fuse settings.
    pub fn burn_order(&self) -> Vec<FuseSelector> {
        let mut order = vec![FuseSelector::High, FuseSelector::Low];
        if self.burn_extended {
            order.push(FuseSelector::Extended);
        }
        order
    }

    pub fn ready_wait(&self) -> ReadyWait {
        ReadyWait {
            timeout: self.ready_timeout,
            interval: self.ready_poll_interval,
        }
    }

    pub fn validate(&self) -> HvResult<()> {
        if self.ready_timeout.is_zero() {
            return Err(HvError::ConfigurationError(
                "Ready timeout must be greater than zero".to_string(),
            ));
        }
        if self.ready_poll_interval.is_zero() || self.ready_poll_interval > self.ready_timeout {
            return Err(HvError::ConfigurationError(format!(
                "Ready poll interval {:?} must be non-zero and within the timeout {:?}",
                self.ready_poll_interval, self.ready_timeout
            )));
        }
        Ok(())
    }
}

/// Parse a fuse byte given as `62`, `0x62` or `0X62`
pub fn parse_fuse_byte(value: &str) -> HvResult<u8> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 2 {
        return Err(HvError::ConfigurationError(format!(
            "Fuse value {:?} must be one or two hex digits",
            value
        )));
    }

    u8::from_str_radix(digits, 16).map_err(|e| {
        HvError::ConfigurationError(format!("Fuse value {:?} is not hex: {}", value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_bytes_accept_optional_prefix() {
        assert_eq!(parse_fuse_byte("62").unwrap(), 0x62);
        assert_eq!(parse_fuse_byte("0xDF").unwrap(), 0xDF);
        assert_eq!(parse_fuse_byte("0Xf9").unwrap(), 0xF9);
        assert_eq!(parse_fuse_byte("7").unwrap(), 0x07);
    }

    #[test]
    fn fuse_bytes_reject_garbage() {
        assert!(parse_fuse_byte("").is_err());
        assert!(parse_fuse_byte("0x").is_err());
        assert!(parse_fuse_byte("G1").is_err());
        assert!(parse_fuse_byte("100").is_err());
    }

    #[test]
    fn extended_fuse_only_when_enabled() {
        let mut config = RescueConfig::default();
        assert_eq!(config.selectors(), vec![FuseSelector::Low, FuseSelector::High]);
        assert_eq!(config.burn_order(), vec![FuseSelector::High, FuseSelector::Low]);

        config.burn_extended = true;
        assert_eq!(config.selectors(), FuseSelector::ALL.to_vec());
        assert_eq!(config.burn_order().last(), Some(&FuseSelector::Extended));
    }

    #[test]
    fn poll_interval_must_fit_timeout() {
        let mut config = RescueConfig::default();
        assert!(config.validate().is_ok());
        config.ready_poll_interval = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
