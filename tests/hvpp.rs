#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hvrescue::{
        FuseSelector, Mode,
        config::{ResetPolarity, StartSignal},
        error::HvError,
        interface::{
            Direction, Level, Signal,
            simulated::{FuseAccess, SimEvent, SimulatedTarget},
        },
        protocols::{FuseProtocol, hvpp::Hvpp},
        session::{enter_programming_mode, initialize_lines},
        timing::ReadyWait,
    };

    fn ready_wait() -> ReadyWait {
        ReadyWait {
            timeout: Duration::from_millis(5),
            interval: Duration::from_micros(100),
        }
    }

    fn entered(mode: Mode, mut target: SimulatedTarget) -> (SimulatedTarget, Hvpp) {
        initialize_lines(&mut target, ResetPolarity::ActiveLow, StartSignal::Button).unwrap();
        enter_programming_mode(&mut target, mode, ResetPolarity::ActiveLow).unwrap();
        assert!(target.in_programming_mode());
        (target, Hvpp::new(mode.pin_roles(), ready_wait()))
    }

    #[test]
    fn test_reads_factory_fuses() {
        for mode in [Mode::ParallelATmega, Mode::ParallelATtiny2313] {
            let (mut target, hvpp) = entered(mode, SimulatedTarget::new(mode));
            assert_eq!(hvpp.read_fuse(&mut target, FuseSelector::Low).unwrap(), 0x62);
            assert_eq!(hvpp.read_fuse(&mut target, FuseSelector::High).unwrap(), 0xDF);
            assert_eq!(hvpp.read_fuse(&mut target, FuseSelector::Extended).unwrap(), 0xF9);
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        for mode in [Mode::ParallelATmega, Mode::ParallelATtiny2313] {
            let (mut target, hvpp) = entered(mode, SimulatedTarget::new(mode));
            for (selector, value) in [
                (FuseSelector::High, 0xD9),
                (FuseSelector::Low, 0xE2),
                (FuseSelector::Extended, 0xFF),
            ] {
                hvpp.write_fuse(&mut target, value, selector).unwrap();
                assert_eq!(target.fuse(selector), value);
                assert_eq!(hvpp.read_fuse(&mut target, selector).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_read_and_write_use_the_same_select_pattern() {
        for mode in [Mode::ParallelATmega, Mode::ParallelATtiny2313] {
            let (mut target, hvpp) = entered(mode, SimulatedTarget::new(mode).recording());
            for selector in FuseSelector::ALL {
                hvpp.read_fuse(&mut target, selector).unwrap();
                hvpp.write_fuse(&mut target, 0x5A, selector).unwrap();
            }

            for selector in FuseSelector::ALL {
                let patterns: Vec<(FuseAccess, Level, Level)> = target
                    .selections()
                    .iter()
                    .filter(|(_, seen, _, _)| *seen == selector)
                    .map(|(access, _, bs1, bs2)| (*access, *bs1, *bs2))
                    .collect();
                let (bs1, bs2) = selector.select_pattern();
                assert_eq!(
                    patterns,
                    vec![(FuseAccess::Read, bs1, bs2), (FuseAccess::Program, bs1, bs2)],
                    "{} in {}",
                    selector,
                    mode
                );
            }
        }
    }

    #[test]
    fn test_command_latched_with_bus_released_afterwards() {
        let target = SimulatedTarget::new(Mode::ParallelATmega).recording();
        let (mut target, hvpp) = entered(Mode::ParallelATmega, target);
        target.clear_events();

        hvpp.send_command(&mut target, 0x04).unwrap();
        assert_eq!(
            target.events(),
            &[
                SimEvent::Write(Signal::Xa1, Level::High),
                SimEvent::Write(Signal::Xa0, Level::Low),
                SimEvent::Write(Signal::Bs1, Level::Low),
                SimEvent::Write(Signal::Bs2, Level::Low),
                SimEvent::BusDirection(Direction::Output),
                SimEvent::BusWrite(0x04),
                SimEvent::Delay(1_000),
                SimEvent::Write(Signal::Xtal1, Level::High),
                SimEvent::Delay(1_000),
                SimEvent::Write(Signal::Xtal1, Level::Low),
                SimEvent::BusWrite(0x00),
                SimEvent::BusDirection(Direction::Input),
            ]
        );
        assert_eq!(target.bus_direction(), Direction::Input);
    }

    #[test]
    fn test_attiny2313_command_keeps_xa1_high() {
        let target = SimulatedTarget::new(Mode::ParallelATtiny2313).recording();
        let (mut target, hvpp) = entered(Mode::ParallelATtiny2313, target);
        target.clear_events();

        hvpp.send_command(&mut target, 0x40).unwrap();
        assert!(!target.events().contains(&SimEvent::Write(Signal::Xa1, Level::Low)));
        assert!(!target.events().iter().any(|e| matches!(e, SimEvent::Write(Signal::Bs2, _))));
        assert_eq!(target.level(Signal::Xa1), Level::High);
    }

    #[test]
    fn test_write_times_out_when_ready_never_rises() {
        let (mut target, hvpp) = entered(
            Mode::ParallelATmega,
            SimulatedTarget::new(Mode::ParallelATmega).never_ready(),
        );

        let result = hvpp.write_fuse(&mut target, 0xD9, FuseSelector::High);
        match result {
            Err(HvError::TargetTimeout { line, timeout }) => {
                assert_eq!(line, Signal::Rdy);
                assert_eq!(timeout, Duration::from_millis(5));
            }
            other => panic!("Expected a timeout, got {:?}", other),
        }
        assert_eq!(target.level(Signal::Bs1), Level::Low);
        assert_eq!(target.level(Signal::Bs2), Level::Low);
    }

    #[test]
    fn test_busy_target_is_waited_for() {
        let (mut target, hvpp) = entered(
            Mode::ParallelATmega,
            SimulatedTarget::new(Mode::ParallelATmega).with_busy_polls(20),
        );

        hvpp.write_fuse(&mut target, 0xE2, FuseSelector::Low).unwrap();
        assert_eq!(target.fuse(FuseSelector::Low), 0xE2);
    }
}
