use std::time::Duration;

use clap::{Parser, ValueEnum};
use hvrescue::{
    Mode, Rescuer,
    config::{FuseDefaults, ResetPolarity, RescueConfig, StartSignal, parse_fuse_byte},
    console::{OperatorConsole, serialport::open_serial_console, stdio_console},
    error::{HvError, HvResult},
    interface::{Hardware, Signal, simulated::SimulatedTarget},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Backend {
    /// Linux GPIO character device
    Gpio,
    /// In-memory target, nothing is driven
    Simulated,
}

#[derive(Parser, Debug, Clone)]
pub(crate) struct RescueOptions {
    /// Target family; asked on the console when omitted
    #[clap(short, long)]
    mode: Option<Mode>,

    /// Hardware backend
    #[clap(short, long, default_value = "gpio")]
    backend: Backend,

    /// GPIO chip device
    #[clap(long, default_value = "/dev/gpiochip0")]
    chip: String,

    /// Control line wiring as NAME=OFFSET, repeated for every signal
    #[clap(long = "line", value_parser = parse_line_assignment)]
    lines: Vec<(Signal, u32)>,

    /// Data bus line offsets D0..D7, comma separated
    #[clap(long, value_delimiter = ',')]
    data_lines: Vec<u32>,

    /// Operator console serial port; stdin/stdout when omitted
    #[clap(short, long)]
    serial: Option<String>,

    /// Operator console baud rate
    #[clap(long, default_value_t = 9600)]
    baudrate: u32,

    /// Burn the configured fuse values instead of prompting
    #[clap(long, default_value_t = false)]
    non_interactive: bool,

    /// Low fuse for non-interactive runs
    #[clap(long, value_parser = parse_fuse_arg, default_value = "0x62")]
    lfuse: u8,

    /// High fuse for non-interactive runs
    #[clap(long, value_parser = parse_fuse_arg, default_value = "0xDF")]
    hfuse: u8,

    /// Extended fuse for non-interactive runs
    #[clap(long, value_parser = parse_fuse_arg, default_value = "0xF9")]
    efuse: u8,

    /// Also read and burn the extended fuse
    #[clap(short, long, default_value_t = false)]
    extended: bool,

    /// Longest wait for the target to finish a fuse write
    #[clap(long, default_value_t = 100)]
    ready_timeout_ms: u64,

    /// What starts a run
    #[clap(long, default_value = "button")]
    start: StartSignal,

    /// The 12 V enable is non-inverting
    #[clap(long, default_value_t = false)]
    reset_active_high: bool,

    /// Stop after one target
    #[clap(long, default_value_t = false)]
    once: bool,

    #[clap(long, default_value_t = false)]
    no_progress: bool,

    #[clap(short, long, default_value_t = false)]
    pub(crate) verbose: bool,
}

fn parse_line_assignment(arg: &str) -> Result<(Signal, u32), String> {
    let (name, offset) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=OFFSET, got {:?}", arg))?;
    let signal = name.parse::<Signal>().map_err(|e| e.to_string())?;
    let offset = offset
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad offset {:?}: {}", offset, e))?;
    Ok((signal, offset))
}

fn parse_fuse_arg(arg: &str) -> Result<u8, String> {
    parse_fuse_byte(arg).map_err(|e| e.to_string())
}

impl RescueOptions {
    fn config(&self) -> RescueConfig {
        RescueConfig {
            mode: self.mode,
            interactive: !self.non_interactive,
            burn_extended: self.extended,
            defaults: FuseDefaults {
                low: self.lfuse,
                high: self.hfuse,
                extended: self.efuse,
            },
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            start: self.start,
            reset_polarity: if self.reset_active_high {
                ResetPolarity::ActiveHigh
            } else {
                ResetPolarity::ActiveLow
            },
            ..RescueConfig::default()
        }
    }
}

fn serve<H: Hardware, C: OperatorConsole>(
    hardware: H,
    console: C,
    config: RescueConfig,
    opts: &RescueOptions,
) -> HvResult<()> {
    let mut rescuer = Rescuer::new(hardware, console, config)?;
    rescuer.progress_bar(!opts.no_progress);

    if opts.once {
        rescuer.run_once()?;
        Ok(())
    } else {
        rescuer.run_forever()
    }
}

fn serve_on_console<H: Hardware>(
    hardware: H,
    config: RescueConfig,
    opts: &RescueOptions,
) -> HvResult<()> {
    match &opts.serial {
        Some(port) => {
            let console = open_serial_console(port.clone(), opts.baudrate)?;
            serve(hardware, console, config, opts)
        }
        None => serve(hardware, stdio_console(), config, opts),
    }
}

#[cfg(target_os = "linux")]
fn open_gpio_board(opts: &RescueOptions) -> HvResult<hvrescue::interface::gpio::GpioBoard> {
    use hvrescue::interface::gpio::{GpioBoard, GpioBoardConfig};

    let data_lines: [u32; 8] = opts.data_lines.as_slice().try_into().map_err(|_| {
        HvError::ConfigurationError(format!(
            "Expected 8 data lines, got {}",
            opts.data_lines.len()
        ))
    })?;

    let board = opts
        .lines
        .iter()
        .fold(GpioBoardConfig::new(opts.chip.clone()), |board, (signal, offset)| {
            board.with_line(*signal, *offset)
        })
        .with_data_lines(data_lines);
    board.validate(opts.start == StartSignal::Button)?;

    GpioBoard::open(&board)
}

pub(crate) fn handle_rescue(opts: RescueOptions) -> HvResult<()> {
    let config = opts.config();

    match opts.backend {
        Backend::Simulated => {
            // The simulated target has to know its family before the menu
            let mode = config.mode.ok_or_else(|| {
                HvError::ConfigurationError(
                    "The simulated backend needs --mode".to_string(),
                )
            })?;
            serve_on_console(SimulatedTarget::new(mode), config, &opts)
        }
        #[cfg(target_os = "linux")]
        Backend::Gpio => {
            let board = open_gpio_board(&opts)?;
            serve_on_console(board, config, &opts)
        }
        #[cfg(not(target_os = "linux"))]
        Backend::Gpio => Err(HvError::ConfigurationError(
            "The GPIO backend is only available on Linux".to_string(),
        )),
    }
}
