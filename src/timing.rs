use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::constants::SPIN_THRESHOLD_US;
use crate::error::HvResult;
use crate::interface::{ControlLines, Level, Signal};

/// Blocking delays. Every delay is a minimum: implementations may take
/// longer, never shorter.
pub trait Delay {
    fn delay_us(&mut self, us: u64);

    fn delay_ms(&mut self, ms: u64) {
        self.delay_us(ms * 1_000);
    }
}

/// Sleep for at least `duration`, even if the OS wakes us early
pub fn reliable_sleep(mut duration: Duration) {
    loop {
        let now = Instant::now();
        thread::sleep(duration);
        let elapsed = now.elapsed();
        if elapsed >= duration {
            return;
        }
        duration -= elapsed;
    }
}

/// Wait for at least `duration`, spinning when it is too short for the
/// scheduler to honour reasonably.
pub fn precise_delay(duration: Duration) {
    if duration < Duration::from_micros(SPIN_THRESHOLD_US) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    } else {
        reliable_sleep(duration);
    }
}

/// Pulse `line` high: settle, raise, hold, drop.
pub fn strobe<H>(hw: &mut H, line: Signal, hold_ms: u64) -> HvResult<()>
where
    H: ControlLines + Delay + ?Sized,
{
    hw.delay_ms(hold_ms);
    hw.write(line, Level::High)?;
    hw.delay_ms(hold_ms);
    hw.write(line, Level::Low)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

/// Bound for waiting on a ready/busy line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyWait {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Poll `line` until it reads high or `wait.timeout` has been spent.
///
/// Time is counted as the sum of the poll delays, so the real wait is never
/// shorter than the configured bound.
pub fn poll_until_high<H>(hw: &mut H, line: Signal, wait: &ReadyWait) -> HvResult<PollOutcome>
where
    H: ControlLines + Delay + ?Sized,
{
    let interval_us = (wait.interval.as_micros() as u64).max(1);
    let mut waited = Duration::ZERO;
    let mut polls = 0u64;

    loop {
        polls += 1;
        if hw.read(line)?.is_high() {
            trace!("{} high after {} polls", line, polls);
            return Ok(PollOutcome::Ready);
        }
        if waited >= wait.timeout {
            trace!("{} still low after {} polls", line, polls);
            return Ok(PollOutcome::TimedOut);
        }
        hw.delay_us(interval_us);
        waited += Duration::from_micros(interval_us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A line that rises after a fixed number of reads
    struct SlowLine {
        reads_until_high: u32,
        waited_us: u64,
    }

    impl ControlLines for SlowLine {
        fn set_direction(&mut self, _: Signal, _: crate::interface::Direction) -> HvResult<()> {
            Ok(())
        }

        fn write(&mut self, _: Signal, _: Level) -> HvResult<()> {
            Ok(())
        }

        fn read(&mut self, _: Signal) -> HvResult<Level> {
            if self.reads_until_high == 0 {
                return Ok(Level::High);
            }
            self.reads_until_high -= 1;
            Ok(Level::Low)
        }
    }

    impl Delay for SlowLine {
        fn delay_us(&mut self, us: u64) {
            self.waited_us += us;
        }
    }

    fn wait() -> ReadyWait {
        ReadyWait {
            timeout: Duration::from_millis(1),
            interval: Duration::from_micros(100),
        }
    }

    #[test]
    fn poll_returns_once_line_rises() {
        let mut line = SlowLine {
            reads_until_high: 4,
            waited_us: 0,
        };
        let outcome = poll_until_high(&mut line, Signal::Rdy, &wait()).unwrap();
        assert_eq!(outcome, PollOutcome::Ready);
        assert_eq!(line.waited_us, 400);
    }

    #[test]
    fn poll_gives_up_after_timeout() {
        let mut line = SlowLine {
            reads_until_high: u32::MAX,
            waited_us: 0,
        };
        let outcome = poll_until_high(&mut line, Signal::Rdy, &wait()).unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(line.waited_us, 1_000);
    }

    #[test]
    fn strobe_holds_on_both_sides() {
        let mut line = SlowLine {
            reads_until_high: 0,
            waited_us: 0,
        };
        strobe(&mut line, Signal::Xtal1, 1).unwrap();
        assert_eq!(line.waited_us, 2_000);
    }
}
