#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hvrescue::{
        FuseSelector, Mode,
        config::{ResetPolarity, StartSignal},
        error::HvError,
        interface::{
            Direction, Level, Signal,
            simulated::{SimEvent, SimulatedTarget},
        },
        protocols::{
            FuseProtocol,
            hvsp::{FRAME_BITS, Hvsp, SerialFrame, read_sequence, transfer_frame},
        },
        session::{enter_programming_mode, initialize_lines},
        targets::SerialPins,
        timing::ReadyWait,
    };

    fn ready_wait() -> ReadyWait {
        ReadyWait {
            timeout: Duration::from_millis(10),
            interval: Duration::from_micros(100),
        }
    }

    fn entered(mut target: SimulatedTarget) -> SimulatedTarget {
        initialize_lines(&mut target, ResetPolarity::ActiveLow, StartSignal::Button).unwrap();
        enter_programming_mode(&mut target, Mode::SerialHvsp, ResetPolarity::ActiveLow).unwrap();
        assert!(target.in_programming_mode());
        target
    }

    #[test]
    fn test_every_frame_is_eleven_clocks() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp));
        let pins = SerialPins::STANDARD;

        for frame in [
            SerialFrame::new(0x00, 0x00),
            SerialFrame::new(0xFF, 0xFF),
            SerialFrame::new(0xA5, 0x5A),
            SerialFrame::new(0x40, 0x4C),
        ] {
            let before = target.clock_pulses();
            transfer_frame(&mut target, &pins, frame).unwrap();
            assert_eq!(target.clock_pulses() - before, FRAME_BITS as u64);
        }
    }

    #[test]
    fn test_fuse_byte_arrives_on_third_frame_only() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp).with_fuses(0xA5, 0xDF, 0xFF));
        let pins = SerialPins::STANDARD;

        let responses: Vec<u8> = read_sequence(FuseSelector::Low)
            .into_iter()
            .map(|frame| transfer_frame(&mut target, &pins, frame).unwrap())
            .collect();
        assert_eq!(responses, vec![0x00, 0x00, 0xA5]);
    }

    #[test]
    fn test_reads_factory_fuses() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp));
        let hvsp = Hvsp::new(ready_wait());

        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::Low).unwrap(), 0x62);
        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::High).unwrap(), 0xDF);
        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::Extended).unwrap(), 0xF9);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp));
        let hvsp = Hvsp::new(ready_wait());

        for selector in FuseSelector::ALL {
            for value in [0x00, 0xFF, 0x5A, 0xE1] {
                hvsp.write_fuse(&mut target, value, selector).unwrap();
                assert_eq!(hvsp.read_fuse(&mut target, selector).unwrap(), value);
                assert_eq!(target.fuse(selector), value);
            }
        }
    }

    #[test]
    fn test_writes_do_not_leak_into_other_fuses() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp));
        let hvsp = Hvsp::new(ready_wait());

        hvsp.write_fuse(&mut target, 0x5D, FuseSelector::High).unwrap();
        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::Low).unwrap(), 0x62);
        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::High).unwrap(), 0x5D);
        assert_eq!(hvsp.read_fuse(&mut target, FuseSelector::Extended).unwrap(), 0xF9);
    }

    #[test]
    fn test_write_times_out_when_target_stays_busy() {
        let mut target = entered(SimulatedTarget::new(Mode::SerialHvsp).never_ready());
        let hvsp = Hvsp::new(ready_wait());

        let started = target.elapsed();
        let result = hvsp.write_fuse(&mut target, 0x62, FuseSelector::Low);
        assert!(matches!(
            result,
            Err(HvError::TargetTimeout { line: Signal::Rdy, .. })
        ));
        // Four frames of 11 two-millisecond clocks plus the bounded wait
        let spent = target.elapsed() - started;
        assert!(spent >= Duration::from_millis(10));
        assert!(spent < Duration::from_millis(4 * 11 * 2 + 20));
    }

    #[test]
    fn test_sdo_released_before_target_drives_it() {
        let mut target = SimulatedTarget::new(Mode::SerialHvsp).recording();
        initialize_lines(&mut target, ResetPolarity::ActiveLow, StartSignal::Button).unwrap();
        target.clear_events();
        enter_programming_mode(&mut target, Mode::SerialHvsp, ResetPolarity::ActiveLow).unwrap();

        let events = target.events();
        let position = |event: SimEvent| events.iter().position(|e| *e == event).unwrap();

        let sdo_output = position(SimEvent::Direction(Signal::Rdy, Direction::Output));
        let vcc_on = position(SimEvent::Write(Signal::Vcc, Level::High));
        let reset_on = position(SimEvent::Write(Signal::Rst, Level::Low));
        let sdo_input = position(SimEvent::Direction(Signal::Rdy, Direction::Input));
        let oe_high = position(SimEvent::Write(Signal::Oe, Level::High));

        assert!(sdo_output < vcc_on);
        assert!(vcc_on < reset_on);
        assert!(reset_on < sdo_input);
        assert!(sdo_input < oe_high);
        assert_eq!(target.direction(Signal::Rdy), Direction::Input);
    }
}
