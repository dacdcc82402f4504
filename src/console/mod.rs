pub mod serialport;

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, warn};

use crate::error::{HvError, HvResult};
use crate::session::{FuseMismatch, FuseSet};
use crate::targets::Mode;

/// Synchronisation marker preceding every hex fuse value
pub const HEX_MARKER: u8 = b'x';

/// Line-oriented text channel to the operator
pub trait OperatorConsole {
    /// Block until one byte arrives
    fn read_byte(&mut self) -> HvResult<u8>;

    fn write_str(&mut self, text: &str) -> HvResult<()>;

    fn write_line(&mut self, line: &str) -> HvResult<()> {
        self.write_str(line)?;
        self.write_str("\r\n")
    }

    /// Wait until everything written has left the host
    fn flush(&mut self) -> HvResult<()>;
}

/// Console over any byte stream pair: stdio, a serial port, or buffers
pub struct TextConsole<R: Read, W: Write> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> TextConsole<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        TextConsole { reader, writer }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<R: Read, W: Write> OperatorConsole for TextConsole<R, W> {
    fn read_byte(&mut self) -> HvResult<u8> {
        let mut buffer = [0u8; 1];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => return Err(HvError::Console("Operator console closed".to_string())),
                Ok(_) => return Ok(buffer[0]),
                // Serial ports time out while the operator is thinking
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) => return Err(HvError::Console(format!("{:?}", e))),
            }
        }
    }

    fn write_str(&mut self, text: &str) -> HvResult<()> {
        self.writer
            .write_all(text.as_bytes())
            .map_err(|e| HvError::Console(format!("{:?}", e)))
    }

    fn flush(&mut self) -> HvResult<()> {
        self.writer
            .flush()
            .map_err(|e| HvError::Console(format!("Failed to flush console, {}", e)))
    }
}

/// Console on the process' own stdin/stdout
pub fn stdio_console() -> TextConsole<std::io::Stdin, std::io::Stdout> {
    TextConsole::new(std::io::stdin(), std::io::stdout())
}

fn is_line_break(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Show the mode menu and wait for a valid choice
pub fn select_mode<C: OperatorConsole + ?Sized>(console: &mut C) -> HvResult<Mode> {
    console.write_line("Select mode:")?;
    for (index, mode) in Mode::MENU.iter().enumerate() {
        console.write_line(&format!("{}: {}", index + 1, mode.menu_label()))?;
    }
    console.flush()?;

    loop {
        let choice = console.read_byte()?;
        if is_line_break(choice) {
            continue;
        }
        match Mode::from_menu_choice(choice) {
            Ok(mode) => return Ok(mode),
            Err(e) => {
                debug!("{}", e);
                console.write_line("Invalid response. Try again.")?;
                console.flush()?;
            }
        }
    }
}

/// Block until the operator presses Enter
pub fn wait_for_enter<C: OperatorConsole + ?Sized>(console: &mut C) -> HvResult<()> {
    while !is_line_break(console.read_byte()?) {}
    Ok(())
}

/// One uppercase hex digit
pub fn parse_hex_digit(digit: u8) -> HvResult<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(HvError::MalformedHexInput(other as char)),
    }
}

/// Read one fuse byte sent as `x` followed by two hex digits.
///
/// Anything before the marker is discarded. A bad digit is reported to the
/// operator as soon as it arrives; if that digit is itself a marker it
/// starts the next attempt. The accepted byte is echoed.
pub fn ask_fuse<C: OperatorConsole + ?Sized>(console: &mut C) -> HvResult<u8> {
    let mut resync = false;
    loop {
        if !resync {
            while console.read_byte()? != HEX_MARKER {}
        }

        let rejected = match parse_hex_digit(console.read_byte()?) {
            Ok(high) => match parse_hex_digit(console.read_byte()?) {
                Ok(low) => {
                    let value = high << 4 | low;
                    console.write_line(&format!("{:02X}", value))?;
                    return Ok(value);
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        warn!("Rejected fuse input: {}", rejected);
        console.write_line("Invalid hex value. Try again.")?;
        console.flush()?;
        resync = matches!(rejected, HvError::MalformedHexInput(c) if c == HEX_MARKER as char);
    }
}

pub fn report_fuses<C: OperatorConsole + ?Sized>(
    console: &mut C,
    title: &str,
    fuses: &FuseSet,
) -> HvResult<()> {
    console.write_line("")?;
    console.write_line(title)?;
    for (selector, value) in fuses.iter() {
        console.write_line(&format!("{}: {:02X}", selector.label(), value))?;
    }
    console.write_line("")
}

pub fn report_mismatch<C: OperatorConsole + ?Sized>(
    console: &mut C,
    mismatch: &FuseMismatch,
) -> HvResult<()> {
    console.write_line(&format!(
        "WARNING: {} mismatch (wanted {:02X}, read {:02X})",
        mismatch.selector.label(),
        mismatch.desired,
        mismatch.actual
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn console(input: &str) -> TextConsole<Cursor<Vec<u8>>, Vec<u8>> {
        TextConsole::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(console: &TextConsole<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(console.writer()).into_owned()
    }

    #[test]
    fn hex_digits_accept_digits_and_uppercase() {
        assert_eq!(parse_hex_digit(b'0').unwrap(), 0x0);
        assert_eq!(parse_hex_digit(b'9').unwrap(), 0x9);
        assert_eq!(parse_hex_digit(b'A').unwrap(), 0xA);
        assert_eq!(parse_hex_digit(b'F').unwrap(), 0xF);
    }

    #[test]
    fn hex_digits_reject_other_characters() {
        assert!(matches!(parse_hex_digit(b'G'), Err(HvError::MalformedHexInput('G'))));
        assert!(matches!(parse_hex_digit(b'f'), Err(HvError::MalformedHexInput('f'))));
        assert!(parse_hex_digit(b' ').is_err());
    }

    #[test]
    fn ask_fuse_parses_after_marker() {
        let mut console = console("x3F");
        assert_eq!(ask_fuse(&mut console).unwrap(), 0x3F);
        assert_eq!(output(&console), "3F\r\n");
    }

    #[test]
    fn ask_fuse_discards_noise_before_marker() {
        let mut console = console("0x62");
        assert_eq!(ask_fuse(&mut console).unwrap(), 0x62);
    }

    #[test]
    fn ask_fuse_rejects_bad_digit_and_waits_for_next_marker() {
        let mut console = console("xG1x3F");
        assert_eq!(ask_fuse(&mut console).unwrap(), 0x3F);
        assert!(output(&console).starts_with("Invalid hex value. Try again.\r\n"));
    }

    #[test]
    fn ask_fuse_rejects_first_bad_digit_without_eating_the_retry() {
        let mut console = console("xGx3F");
        assert_eq!(ask_fuse(&mut console).unwrap(), 0x3F);
        assert_eq!(output(&console), "Invalid hex value. Try again.\r\n3F\r\n");
    }

    #[test]
    fn ask_fuse_treats_marker_in_second_digit_as_retry() {
        let mut console = console("x3xD9");
        assert_eq!(ask_fuse(&mut console).unwrap(), 0xD9);
        assert_eq!(output(&console).matches("Invalid hex value. Try again.").count(), 1);
    }

    #[test]
    fn ask_fuse_with_only_bad_input_runs_out_of_console() {
        let mut console = console("xG1");
        assert!(matches!(ask_fuse(&mut console), Err(HvError::Console(_))));
    }

    #[test]
    fn mode_menu_reprompts_on_invalid_choice() {
        let mut console = console("9\n3");
        assert_eq!(select_mode(&mut console).unwrap(), Mode::SerialHvsp);
        let text = output(&console);
        assert!(text.contains("1: ATmega (28-pin)"));
        assert!(text.contains("3: ATtiny (8-pin) / HVSP"));
        assert_eq!(text.matches("Invalid response. Try again.").count(), 1);
    }
}
