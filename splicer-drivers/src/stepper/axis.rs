//! Step/dir axis with a TMC2209 behind it
//!
//! Motion comes from the core step ramp and is emitted as step pulses on
//! plain GPIOs. Driver settings changed through the `AxisDriver` seam
//! are buffered and pushed to the chip by [`StepDirAxis::sync_driver`],
//! which also polls DRV_STATUS and SG_RESULT for the stall and
//! over-temperature flags.

use embedded_hal::digital::OutputPin;
use embedded_io::{Read, Write};
use splicer_core::motion::StepRamp;
use splicer_core::traits::AxisDriver;

use super::tmc2209::{is_stall, reg, Tmc2209Config, Tmc2209Error, Tmc2209Uart};

/// One positional axis: STEP, DIR and active-low EN pins
pub struct StepDirAxis<STEP, DIR, EN> {
    step: STEP,
    dir: DIR,
    enable: EN,
    ramp: StepRamp,
    driver: Tmc2209Config,
    /// Driver settings changed since the last sync
    dirty: bool,
    enabled: bool,
    invert_dir: bool,
    /// Direction currently on the DIR pin, 0 before the first step
    dir_level: i8,
    stalled: bool,
    over_temp: bool,
}

impl<STEP, DIR, EN> StepDirAxis<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    /// Create a disabled axis at position zero
    pub fn new(step: STEP, dir: DIR, enable: EN, driver: Tmc2209Config) -> Self {
        let mut axis = Self {
            step,
            dir,
            enable,
            ramp: StepRamp::new(1000.0, 1000.0),
            driver,
            dirty: true,
            enabled: false,
            invert_dir: false,
            dir_level: 0,
            stalled: false,
            over_temp: false,
        };
        axis.enable(false);
        axis
    }

    /// Reverse the DIR pin polarity
    pub fn inverted(mut self) -> Self {
        self.invert_dir = true;
        self
    }

    pub fn driver_config(&self) -> &Tmc2209Config {
        &self.driver
    }

    pub fn ramp(&self) -> &StepRamp {
        &self.ramp
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Settings are waiting to be written to the chip
    pub fn needs_sync(&self) -> bool {
        self.dirty
    }

    /// Write the full register image
    pub fn init_driver<U: Read + Write>(
        &mut self,
        uart: &mut Tmc2209Uart<U>,
    ) -> Result<(), Tmc2209Error> {
        uart.apply_config(&self.driver)?;
        self.dirty = false;
        Ok(())
    }

    /// Push pending settings and refresh the status flags
    ///
    /// Call from the slow loop; one sync costs a few UART transactions.
    pub fn sync_driver<U: Read + Write>(
        &mut self,
        uart: &mut Tmc2209Uart<U>,
    ) -> Result<(), Tmc2209Error> {
        if self.dirty {
            uart.write_register(reg::CHOPCONF, self.driver.chopconf())?;
            uart.write_register(reg::IHOLD_IRUN, self.driver.ihold_irun())?;
            uart.write_register(reg::SGTHRS, self.driver.sgthrs())?;
            self.dirty = false;
        }

        let status = uart.read_status()?;
        self.over_temp = status.ot_prewarning || status.ot_shutdown;
        if status.has_fault() {
            warn!("stepper driver fault");
        }

        if let Some(threshold) = self.driver.stallguard_threshold {
            if self.ramp.is_running() {
                let sg = uart.read_sg_result()?;
                if is_stall(sg, threshold) {
                    debug!("stall sg={}", sg);
                    self.stalled = true;
                }
            }
        }
        Ok(())
    }

    fn set_direction(&mut self, direction: i8) {
        if direction == self.dir_level {
            return;
        }
        self.dir_level = direction;
        let high = (direction > 0) != self.invert_dir;
        let result = if high {
            self.dir.set_high()
        } else {
            self.dir.set_low()
        };
        if result.is_err() {
            warn!("dir pin write failed");
        }
    }

    fn pulse(&mut self) {
        if self.step.set_high().is_err() || self.step.set_low().is_err() {
            warn!("step pin write failed");
        }
    }
}

impl<STEP, DIR, EN> AxisDriver for StepDirAxis<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        let result = if enabled {
            self.enable.set_low()
        } else {
            self.enable.set_high()
        };
        if result.is_err() {
            warn!("enable pin write failed");
        }
    }

    fn set_max_speed(&mut self, steps_per_s: f32) {
        self.ramp.set_max_speed(steps_per_s);
    }

    fn max_speed(&self) -> f32 {
        self.ramp.max_speed()
    }

    fn set_acceleration(&mut self, steps_per_s2: f32) {
        self.ramp.set_acceleration(steps_per_s2);
    }

    fn move_by(&mut self, steps: i32) {
        self.ramp.move_by(steps);
    }

    fn current_position(&self) -> i32 {
        self.ramp.position()
    }

    fn set_current_position(&mut self, steps: i32) {
        self.ramp.set_position(steps);
    }

    fn distance_to_go(&self) -> i32 {
        self.ramp.distance_to_go()
    }

    fn stop(&mut self) {
        self.ramp.stop();
    }

    fn run(&mut self, now_us: u32) {
        if !self.enabled {
            return;
        }
        if let Some(direction) = self.ramp.poll(now_us) {
            self.set_direction(direction);
            self.pulse();
        }
    }

    fn set_current_ma(&mut self, milliamps: u16) {
        // the motor layer switches run/hold itself
        self.driver.run_current_ma = milliamps;
        self.driver.hold_current_ma = milliamps;
        self.dirty = true;
    }

    fn set_microsteps(&mut self, microsteps: u16) {
        self.driver.microsteps = microsteps;
        self.dirty = true;
    }

    fn set_stall_guard(&mut self, threshold: Option<u8>) {
        self.driver.stallguard_threshold = threshold;
        self.stalled = false;
        self.dirty = true;
    }

    fn stall_detected(&mut self) -> bool {
        self.stalled
    }

    fn over_temp_warning(&mut self) -> bool {
        self.over_temp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stepper::tmc2209::tests::MockUart;
    use core::convert::Infallible;

    #[derive(Debug, Default)]
    struct PulsePin {
        high: bool,
        rises: u32,
    }

    impl embedded_hal::digital::ErrorType for PulsePin {
        type Error = Infallible;
    }

    impl OutputPin for PulsePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Self::Error> {
            if !self.high {
                self.rises += 1;
            }
            self.high = true;
            Ok(())
        }
    }

    type Axis = StepDirAxis<PulsePin, PulsePin, PulsePin>;

    fn axis() -> Axis {
        let mut a = StepDirAxis::new(
            PulsePin::default(),
            PulsePin::default(),
            PulsePin::default(),
            Tmc2209Config::default(),
        );
        a.set_max_speed(2000.0);
        a.set_acceleration(4000.0);
        a
    }

    fn run_until_idle(a: &mut Axis) {
        let mut now = 0u32;
        for _ in 0..1_000_000 {
            if !a.is_running() {
                break;
            }
            a.run(now);
            now = now.wrapping_add(50);
        }
    }

    #[test]
    fn test_starts_disabled() {
        let a = axis();
        assert!(!a.is_enabled());
        // EN is active-low
        assert!(a.enable.high);
    }

    #[test]
    fn test_disabled_axis_does_not_step() {
        let mut a = axis();
        a.move_by(10);
        a.run(0);
        a.run(10_000);
        assert_eq!(a.step.rises, 0);
        assert_eq!(a.current_position(), 0);
    }

    #[test]
    fn test_pulses_match_distance() {
        let mut a = axis();
        a.enable(true);
        assert!(!a.enable.high);
        a.move_by(200);
        run_until_idle(&mut a);
        assert_eq!(a.current_position(), 200);
        assert_eq!(a.step.rises, 200);
        assert!(a.dir.high);
    }

    #[test]
    fn test_reverse_direction() {
        let mut a = axis().inverted();
        a.enable(true);
        a.move_by(-30);
        run_until_idle(&mut a);
        assert_eq!(a.current_position(), -30);
        // inverted: negative steps drive DIR high
        assert!(a.dir.high);
    }

    #[test]
    fn test_set_position_cancels_motion() {
        let mut a = axis();
        a.enable(true);
        a.move_by(500);
        a.run(0);
        a.set_current_position(0);
        assert_eq!(a.distance_to_go(), 0);
        assert!(!a.is_running());
    }

    #[test]
    fn test_settings_mark_dirty() {
        let mut a = axis();
        let mut uart = MockUart::default();
        uart.queue_reply(reg::DRV_STATUS, 0);
        let mut tmc = Tmc2209Uart::new(uart, 0);

        a.set_microsteps(32);
        a.set_current_ma(400);
        assert!(a.needs_sync());
        a.sync_driver(&mut tmc).unwrap();
        assert!(!a.needs_sync());
        assert_eq!(a.driver_config().mres(), 3);

        // three writes then a status read
        let uart = tmc.release();
        assert_eq!(uart.tx.len(), 3 * 8 + 4);
        assert_eq!(uart.tx[2], reg::CHOPCONF | 0x80);
    }

    #[test]
    fn test_init_writes_full_image() {
        let mut a = axis();
        let mut tmc = Tmc2209Uart::new(MockUart::default(), 0);
        a.init_driver(&mut tmc).unwrap();
        assert!(!a.needs_sync());
        assert_eq!(tmc.release().tx.len(), 7 * 8);
    }

    #[test]
    fn test_status_sets_over_temp() {
        let mut a = axis();
        let mut uart = MockUart::default();
        uart.queue_reply(reg::DRV_STATUS, 0b01);
        let mut tmc = Tmc2209Uart::new(uart, 0);
        a.sync_driver(&mut tmc).unwrap();
        assert!(a.over_temp_warning());
        assert!(!a.stall_detected());
    }

    #[test]
    fn test_stall_from_sg_result() {
        let mut a = axis();
        a.enable(true);
        a.set_stall_guard(Some(8));
        a.move_by(1000);

        let mut uart = MockUart::default();
        uart.queue_reply(reg::DRV_STATUS, 0);
        uart.queue_reply(reg::SG_RESULT, 10);
        let mut tmc = Tmc2209Uart::new(uart, 0);
        a.sync_driver(&mut tmc).unwrap();
        assert!(a.stall_detected());

        // disarming clears the latch
        a.set_stall_guard(None);
        assert!(!a.stall_detected());
    }

    #[test]
    fn test_no_stall_check_at_rest() {
        let mut a = axis();
        a.set_stall_guard(Some(8));
        let mut uart = MockUart::default();
        uart.queue_reply(reg::DRV_STATUS, 0);
        let mut tmc = Tmc2209Uart::new(uart, 0);
        a.sync_driver(&mut tmc).unwrap();
        assert!(!a.stall_detected());
    }

    #[test]
    fn test_missing_reply_is_io_error() {
        let mut a = axis();
        let mut tmc = Tmc2209Uart::new(MockUart::default(), 0);
        assert_eq!(a.sync_driver(&mut tmc), Err(Tmc2209Error::Io));
    }
}
