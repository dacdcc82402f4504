//! Host board driven through the Linux GPIO character device.
//!
//! Every control signal and the eight data lines are individual GPIO lines
//! requested together on one chip. Which offset carries which signal is
//! runtime configuration, so any board wiring works without rebuilding.

use std::collections::BTreeMap;
use std::time::Duration;

use gpiocdev::line::{Bias, Offset, Value};
use gpiocdev::request::{Config, Request};
use tracing::{debug, info};

use crate::error::{HvError, HvResult};
use crate::interface::{ControlLines, DataBus, Direction, Level, Signal};
use crate::timing::{Delay, precise_delay};

const CONSUMER: &str = "hvrescue";

#[derive(Debug, Clone)]
pub struct GpioBoardConfig {
    /// Device path, e.g. "/dev/gpiochip0"
    pub chip: String,
    pub lines: BTreeMap<Signal, Offset>,
    /// Data bus offsets, D0 first
    pub data_lines: [Offset; 8],
}

impl GpioBoardConfig {
    pub fn new(chip: impl Into<String>) -> Self {
        GpioBoardConfig {
            chip: chip.into(),
            lines: BTreeMap::new(),
            data_lines: [0; 8],
        }
    }

    pub fn with_line(mut self, signal: Signal, offset: Offset) -> Self {
        self.lines.insert(signal, offset);
        self
    }

    pub fn with_data_lines(mut self, data_lines: [Offset; 8]) -> Self {
        self.data_lines = data_lines;
        self
    }

    /// Every signal must be wired, except the start button when the run is
    /// started from the console.
    pub fn validate(&self, needs_button: bool) -> HvResult<()> {
        if self.chip.is_empty() {
            return Err(HvError::ConfigurationError("No GPIO chip given".to_string()));
        }

        let missing: Vec<&str> = Signal::ALL
            .iter()
            .filter(|signal| needs_button || **signal != Signal::Button)
            .filter(|signal| !self.lines.contains_key(signal))
            .map(|signal| signal.name())
            .collect();
        if !missing.is_empty() {
            return Err(HvError::ConfigurationError(format!(
                "No GPIO line assigned to {}",
                missing.join(", ")
            )));
        }

        let mut seen: Vec<Offset> = self.lines.values().copied().collect();
        seen.extend_from_slice(&self.data_lines);
        seen.sort_unstable();
        if seen.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(HvError::ConfigurationError(
                "GPIO line offsets must be unique".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct GpioBoard {
    request: Request,
    lines: BTreeMap<Signal, Offset>,
    data_lines: [Offset; 8],
}

fn gpio_value(level: Level) -> Value {
    match level {
        Level::High => Value::Active,
        Level::Low => Value::Inactive,
    }
}

impl GpioBoard {
    pub fn open(config: &GpioBoardConfig) -> HvResult<Self> {
        debug!("Opening GPIO chip {}", config.chip);

        let mut req_config = Config::default();
        for (signal, offset) in &config.lines {
            match signal {
                Signal::Button => {
                    req_config.with_line(*offset).as_input().with_bias(Bias::PullUp);
                }
                Signal::Rdy => {
                    req_config.with_line(*offset).as_input();
                }
                _ => {
                    req_config.with_line(*offset).as_output(Value::Inactive);
                }
            }
        }
        for offset in config.data_lines {
            req_config.with_line(offset).as_input();
        }

        let request = Request::from_config(req_config)
            .on_chip(&config.chip)
            .with_consumer(CONSUMER)
            .request()
            .map_err(|e| {
                HvError::Hardware(format!("Failed to request GPIO lines on {}: {}", config.chip, e))
            })?;

        info!(
            "Opened {} ({} control lines, data bus {:?})",
            config.chip,
            config.lines.len(),
            config.data_lines
        );

        Ok(GpioBoard {
            request,
            lines: config.lines.clone(),
            data_lines: config.data_lines,
        })
    }

    fn offset(&self, line: Signal) -> HvResult<Offset> {
        self.lines
            .get(&line)
            .copied()
            .ok_or_else(|| HvError::ConfigurationError(format!("No GPIO line assigned to {}", line)))
    }

    fn reconfigure(&self, offsets: &[Offset], direction: Direction) -> HvResult<()> {
        let mut cfg = self.request.config();
        for offset in offsets {
            match direction {
                Direction::Output => {
                    cfg.with_line(*offset).as_output(Value::Inactive);
                }
                Direction::Input => {
                    cfg.with_line(*offset).as_input();
                }
            }
        }
        self.request
            .reconfigure(&cfg)
            .map_err(|e| HvError::Hardware(format!("Failed to reconfigure GPIO lines: {}", e)))
    }
}

impl ControlLines for GpioBoard {
    fn set_direction(&mut self, line: Signal, direction: Direction) -> HvResult<()> {
        let offset = self.offset(line)?;
        self.reconfigure(&[offset], direction)
    }

    fn write(&mut self, line: Signal, level: Level) -> HvResult<()> {
        let offset = self.offset(line)?;
        self.request
            .set_value(offset, gpio_value(level))
            .map_err(|e| HvError::Hardware(format!("Failed to set {}: {}", line, e)))
    }

    fn read(&mut self, line: Signal) -> HvResult<Level> {
        let offset = self.offset(line)?;
        match self.request.value(offset) {
            Ok(Value::Active) => Ok(Level::High),
            Ok(Value::Inactive) => Ok(Level::Low),
            Err(e) => Err(HvError::Hardware(format!("Failed to get {}: {}", line, e))),
        }
    }
}

impl DataBus for GpioBoard {
    fn set_bus_direction(&mut self, direction: Direction) -> HvResult<()> {
        let data_lines = self.data_lines;
        self.reconfigure(&data_lines, direction)
    }

    fn write_bus(&mut self, value: u8) -> HvResult<()> {
        for (bit, offset) in self.data_lines.iter().enumerate() {
            let level = Level::from(value & (1 << bit) != 0);
            self.request
                .set_value(*offset, gpio_value(level))
                .map_err(|e| HvError::Hardware(format!("Failed to set D{}: {}", bit, e)))?;
        }
        Ok(())
    }

    fn read_bus(&mut self) -> HvResult<u8> {
        let mut value = 0u8;
        for (bit, offset) in self.data_lines.iter().enumerate() {
            match self.request.value(*offset) {
                Ok(Value::Active) => value |= 1 << bit,
                Ok(Value::Inactive) => {}
                Err(e) => {
                    return Err(HvError::Hardware(format!("Failed to get D{}: {}", bit, e)));
                }
            }
        }
        Ok(value)
    }
}

impl Delay for GpioBoard {
    fn delay_us(&mut self, us: u64) {
        precise_delay(Duration::from_micros(us));
    }
}
