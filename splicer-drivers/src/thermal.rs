//! Weld heater controller
//!
//! Owns the temperature sensor, heater and fan outputs and runs the
//! fixed-period PID loop behind the core `ThermalControl` seam. Each
//! sample goes through the interlocks first (sensor plausibility,
//! ceiling, PID watchdog, runaway), then the stage machine, the ramped
//! setpoint and finally the PID.
//!
//! Any interlock latches a fault: heater to zero, fan full on, stage
//! FAULT. The fault is only cleared by requesting a new non-zero target,
//! and trips again on the next sample if the condition persists.

use splicer_core::config::{Material, ThermalProfile};
use splicer_core::report::{ReportSink, StatusLine};
use splicer_core::thermal::{
    HeatingStage, RunawayGuard, SetpointRamp, StageTracker, TemperatureTelemetry, ThermalConfig,
    ThermalFault,
};
use splicer_core::traits::{FanOutput, HeaterOutput, TemperatureSensor, ThermalControl};

use crate::heater::{AutotuneConfig, AutotuneError, Pid, PidConfig, PidGains, RelayAutotune};

/// PID heater loop over a sensor, a heater and a fan
pub struct ThermalController<S, H, F> {
    sensor: S,
    heater: H,
    fan: F,
    config: ThermalConfig,
    pid: Pid,
    autotune: RelayAutotune,
    stage: StageTracker,
    ramp: SetpointRamp,
    runaway: RunawayGuard,
    material: Material,
    current_x10: i16,
    target_x10: i16,
    setpoint_x10: i16,
    pid_enabled: bool,
    /// Restart the ramp and runaway window on the next reading
    rearm: bool,
    fault: Option<ThermalFault>,
    last_sample_ms: Option<u32>,
    last_pid_ms: u32,
    last_log_ms: u32,
    now_ms: u32,
}

impl<S, H, F> ThermalController<S, H, F>
where
    S: TemperatureSensor,
    H: HeaterOutput,
    F: FanOutput,
{
    /// Create a controller with the default gains; heater and fan start off
    pub fn new(sensor: S, heater: H, fan: F, config: ThermalConfig) -> Self {
        Self::with_gains(sensor, heater, fan, config, PidGains::default())
    }

    pub fn with_gains(
        sensor: S,
        mut heater: H,
        mut fan: F,
        config: ThermalConfig,
        gains: PidGains,
    ) -> Self {
        heater.set_power(0);
        fan.set_pwm(0);
        let pid_config = PidConfig {
            sample_ms: config.sample_ms,
            ..PidConfig::default()
        };
        let autotune_config = AutotuneConfig {
            max_temp_x10: config.max_temp_x10,
            ..AutotuneConfig::default()
        };
        Self {
            sensor,
            heater,
            fan,
            config,
            pid: Pid::new(gains, pid_config),
            autotune: RelayAutotune::new(autotune_config),
            stage: StageTracker::new(),
            ramp: SetpointRamp::default(),
            runaway: RunawayGuard::default(),
            material: Material::default(),
            current_x10: 0,
            target_x10: 0,
            setpoint_x10: 0,
            pid_enabled: false,
            rearm: false,
            fault: None,
            last_sample_ms: None,
            last_pid_ms: 0,
            last_log_ms: 0,
            now_ms: 0,
        }
    }

    pub fn config(&self) -> &ThermalConfig {
        &self.config
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn heater(&self) -> &H {
        &self.heater
    }

    pub fn fan(&self) -> &F {
        &self.fan
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn autotuner(&self) -> &RelayAutotune {
        &self.autotune
    }

    pub fn material(&self) -> Material {
        self.material
    }

    /// Latched fault, if any
    pub fn fault(&self) -> Option<ThermalFault> {
        self.fault
    }

    /// Ramped setpoint fed to the PID on the last sample
    pub fn setpoint_x10(&self) -> i16 {
        self.setpoint_x10
    }

    fn trip<R: ReportSink>(&mut self, fault: ThermalFault, sink: &mut R) {
        if self.fault.is_some() {
            return;
        }
        self.fault = Some(fault);
        self.pid_enabled = false;
        if self.autotune.is_active() {
            let reason = match fault {
                ThermalFault::OverTemp => AutotuneError::OverTemp,
                _ => AutotuneError::SensorFault,
            };
            self.autotune.fail(reason);
            sink.emit(StatusLine::AutotuneFailed(reason.label()));
        }
        self.heater.set_power(0);
        self.fan.set_pwm(255);
        self.stage.enter(HeatingStage::Fault, self.now_ms);
        error!("thermal fault: {}", fault.label());
        sink.emit(StatusLine::ThermalFault(fault));
    }

    fn run_autotune<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        match self.autotune.update(self.current_x10, now_ms) {
            None => self.heater.set_power(self.autotune.output()),
            Some(Ok(gains)) => {
                info!("autotune done kp={} ki={} kd={}", gains.kp, gains.ki, gains.kd);
                self.pid.set_gains(gains);
                self.set_target_x10(0);
                sink.emit(StatusLine::AutotuneDone {
                    kp: gains.kp,
                    ki: gains.ki,
                    kd: gains.kd,
                });
            }
            Some(Err(e)) => {
                warn!("autotune failed: {}", e.label());
                self.set_target_x10(0);
                sink.emit(StatusLine::AutotuneFailed(e.label()));
            }
        }
        self.last_pid_ms = now_ms;
    }

    fn log<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        let interval = self.config.log_interval_ms;
        if interval == 0 || now_ms.wrapping_sub(self.last_log_ms) < interval {
            return;
        }
        self.last_log_ms = now_ms;
        sink.emit(StatusLine::TempLog {
            current_x10: self.current_x10,
            target_x10: self.target_x10,
            setpoint_x10: self.setpoint_x10,
            pwm: self.heater.power(),
            stage: self.stage.stage(),
        });
    }
}

impl<S, H, F> ThermalControl for ThermalController<S, H, F>
where
    S: TemperatureSensor,
    H: HeaterOutput,
    F: FanOutput,
{
    fn update<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        self.now_ms = now_ms;
        if let Some(last) = self.last_sample_ms {
            if now_ms.wrapping_sub(last) < self.config.sample_ms {
                return;
            }
        }
        self.last_sample_ms = Some(now_ms);

        let reading = self.sensor.read_celsius_x10();
        if let Ok(raw) = reading {
            self.current_x10 = raw;
        }
        if let Err(fault) = self.config.classify_reading(reading) {
            self.trip(fault, sink);
            return;
        }
        if self.fault.is_some() {
            return;
        }

        if self.autotune.is_active() {
            self.run_autotune(now_ms, sink);
            self.log(now_ms, sink);
            return;
        }

        if self.pid_enabled {
            if self.rearm {
                self.rearm = false;
                self.ramp.restart(self.current_x10, now_ms);
                self.runaway.arm(self.current_x10, now_ms);
            }
            if now_ms.wrapping_sub(self.last_pid_ms) > self.config.watchdog_ms {
                self.trip(ThermalFault::PidWatchdog, sink);
                return;
            }
            if self.runaway.check(
                self.current_x10,
                self.target_x10,
                self.config.hysteresis_x10,
                self.config.runaway_min_rise_x10,
                self.config.runaway_window_ms,
                now_ms,
            ) {
                self.trip(ThermalFault::Runaway, sink);
                return;
            }

            let profile = self.active_profile();
            if let Some(stage) = self.stage.update(
                self.current_x10,
                self.target_x10,
                self.config.hysteresis_x10,
                profile.soak_ms,
                now_ms,
            ) {
                debug!("heating stage {}", stage.code());
            }

            self.setpoint_x10 = self
                .ramp
                .setpoint(self.target_x10, profile.ramp_x10_per_s, now_ms);
            let power = self.pid.compute(self.setpoint_x10, self.current_x10);
            self.heater.set_power(power);
            self.last_pid_ms = now_ms;
        }

        self.log(now_ms, sink);
    }

    fn set_target_x10(&mut self, target_x10: i16) {
        let target = self.config.clamp_target(target_x10);
        self.target_x10 = target;
        let now = self.now_ms;

        if target > 0 {
            if let Some(fault) = self.fault.take() {
                info!("thermal fault {} cleared", fault.label());
            }
            if matches!(self.stage.stage(), HeatingStage::Off | HeatingStage::Fault) {
                self.stage.enter(HeatingStage::Preheat, now);
                self.pid.reset();
            }
            self.pid_enabled = true;
            self.rearm = true;
            self.last_pid_ms = now;
        } else {
            self.autotune.cancel();
            self.pid_enabled = false;
            self.setpoint_x10 = 0;
            self.heater.set_power(0);
            if self.fault.is_none() {
                self.stage.enter(HeatingStage::Off, now);
            }
        }
    }

    fn target_x10(&self) -> i16 {
        self.target_x10
    }

    fn current_x10(&self) -> i16 {
        self.current_x10
    }

    fn is_target_reached(&self) -> bool {
        self.target_x10 > 0
            && self.current_x10 >= self.target_x10.saturating_sub(self.config.hysteresis_x10)
    }

    fn set_heater_power(&mut self, power: u8) {
        self.pid_enabled = false;
        if self.fault.is_some() && power > 0 {
            warn!("heater held off while faulted");
            self.heater.set_power(0);
            return;
        }
        self.heater.set_power(power);
    }

    fn heater_power(&self) -> u8 {
        self.heater.power()
    }

    fn set_cooling_fan(&mut self, on: bool) {
        self.fan.set_pwm(if on { 255 } else { 0 });
    }

    fn set_cooling_fan_pwm(&mut self, pwm: u8) {
        self.fan.set_pwm(pwm);
    }

    fn cooling_fan_pwm(&self) -> u8 {
        self.fan.pwm()
    }

    fn is_cold_extrusion_blocked(&self) -> bool {
        self.target_x10 > 0 && self.current_x10 < self.config.cold_extrusion_min_x10
    }

    fn stage(&self) -> HeatingStage {
        self.stage.stage()
    }

    fn set_material(&mut self, material: Material) {
        self.material = material;
        self.set_target_x10(material.thermal_profile().target_x10);
    }

    fn active_profile(&self) -> ThermalProfile {
        self.material.thermal_profile()
    }

    fn set_pid_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.pid.set_gains(PidGains { kp, ki, kd });
    }

    fn start_autotune(&mut self, target_x10: i16) -> bool {
        let target = self.config.clamp_target(target_x10);
        if self.fault.is_some() || self.autotune.is_active() || target <= 0 {
            return false;
        }
        info!("autotune around {}", target);
        self.pid_enabled = false;
        self.target_x10 = target;
        self.stage.enter(HeatingStage::Preheat, self.now_ms);
        self.autotune.start(target, self.now_ms);
        self.heater.set_power(self.autotune.output());
        true
    }

    fn cancel_autotune(&mut self) {
        if self.autotune.is_active() {
            self.set_target_x10(0);
        }
    }

    fn is_autotuning(&self) -> bool {
        self.autotune.is_active()
    }

    fn telemetry(&self) -> TemperatureTelemetry {
        TemperatureTelemetry {
            current_x10: self.current_x10,
            target_x10: self.target_x10,
            setpoint_x10: self.setpoint_x10,
            seconds_to_target: self.seconds_to_target(),
            output_pwm: self.heater.power(),
            autotuning: self.autotune.is_active(),
            fault: self.fault,
            stage: self.stage.stage(),
        }
    }

    fn set_log_interval(&mut self, interval_ms: u32) {
        self.config.log_interval_ms = interval_ms;
        self.last_log_ms = self.now_ms;
    }

    fn has_fault(&self) -> bool {
        self.fault.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::PI;
    use splicer_core::traits::SensorError;

    struct MockSensor {
        reading: Result<i16, SensorError>,
    }

    impl TemperatureSensor for MockSensor {
        fn read_celsius_x10(&mut self) -> Result<i16, SensorError> {
            self.reading
        }
    }

    #[derive(Default)]
    struct MockHeater {
        power: u8,
    }

    impl HeaterOutput for MockHeater {
        fn set_power(&mut self, power: u8) {
            self.power = power;
        }
        fn power(&self) -> u8 {
            self.power
        }
    }

    #[derive(Default)]
    struct MockFan {
        pwm: u8,
    }

    impl FanOutput for MockFan {
        fn set_pwm(&mut self, pwm: u8) {
            self.pwm = pwm;
        }
        fn pwm(&self) -> u8 {
            self.pwm
        }
    }

    type Controller = ThermalController<MockSensor, MockHeater, MockFan>;
    type Lines = heapless::Vec<StatusLine, 32>;

    fn controller(temp_x10: i16) -> Controller {
        ThermalController::new(
            MockSensor {
                reading: Ok(temp_x10),
            },
            MockHeater::default(),
            MockFan::default(),
            ThermalConfig::default(),
        )
    }

    fn faults(lines: &Lines) -> usize {
        lines
            .iter()
            .filter(|l| matches!(l, StatusLine::ThermalFault(_)))
            .count()
    }

    #[test]
    fn test_starts_off() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.update(100, &mut out);
        assert_eq!(t.stage(), HeatingStage::Off);
        assert_eq!(t.heater_power(), 0);
        assert_eq!(t.current_x10(), 250);
        assert!(out.is_empty());
    }

    #[test]
    fn test_heats_toward_target() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_target_x10(2100);
        assert_eq!(t.stage(), HeatingStage::Preheat);
        t.update(100, &mut out);
        assert_eq!(t.setpoint_x10(), 250);
        t.update(200, &mut out);
        assert!(t.heater_power() > 0);
        // setpoint ramps from the first reading at 2°C/s
        assert_eq!(t.setpoint_x10(), 252);
        assert!(!t.is_target_reached());
    }

    #[test]
    fn test_target_clamped() {
        let mut t = controller(250);
        t.set_target_x10(3500);
        assert_eq!(t.target_x10(), 2800);
    }

    #[test]
    fn test_sample_gating() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.update(100, &mut out);
        t.sensor_mut().reading = Ok(300);
        t.update(150, &mut out);
        assert_eq!(t.current_x10(), 250);
        t.update(200, &mut out);
        assert_eq!(t.current_x10(), 300);
    }

    #[test]
    fn test_thermistor_fault_latches() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_target_x10(2100);
        t.sensor_mut().reading = Err(SensorError::OpenCircuit);
        t.update(100, &mut out);

        assert_eq!(t.fault(), Some(ThermalFault::Thermistor));
        assert!(t.has_fault());
        assert_eq!(t.stage(), HeatingStage::Fault);
        assert_eq!(t.heater_power(), 0);
        assert_eq!(t.cooling_fan_pwm(), 255);
        assert_eq!(out[0], StatusLine::ThermalFault(ThermalFault::Thermistor));

        t.update(200, &mut out);
        assert_eq!(faults(&out), 1);
        // heater stays off even when driven directly
        t.set_heater_power(200);
        assert_eq!(t.heater_power(), 0);
    }

    #[test]
    fn test_overtemp_fault() {
        let mut t = controller(2850);
        let mut out = Lines::new();
        t.update(100, &mut out);
        assert_eq!(t.fault(), Some(ThermalFault::OverTemp));
        assert_eq!(t.telemetry().fault, Some(ThermalFault::OverTemp));
    }

    #[test]
    fn test_runaway_fault() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_target_x10(2100);
        for now in (100..=40_000).step_by(100) {
            t.update(now, &mut out);
        }
        assert_eq!(t.fault(), None);
        // window started at the first reading after the target was set
        t.update(40_100, &mut out);
        assert_eq!(t.fault(), Some(ThermalFault::Runaway));
        assert_eq!(t.heater_power(), 0);
    }

    #[test]
    fn test_pid_watchdog() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_target_x10(2100);
        t.update(100, &mut out);
        assert_eq!(t.fault(), None);
        t.update(2500, &mut out);
        assert_eq!(t.fault(), Some(ThermalFault::PidWatchdog));
    }

    #[test]
    fn test_new_target_clears_fault() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.sensor_mut().reading = Err(SensorError::ShortCircuit);
        t.update(100, &mut out);
        assert!(t.has_fault());

        // switching off keeps the fault latched
        t.set_target_x10(0);
        assert_eq!(t.stage(), HeatingStage::Fault);

        t.sensor_mut().reading = Ok(250);
        t.set_target_x10(2100);
        assert!(!t.has_fault());
        assert_eq!(t.stage(), HeatingStage::Preheat);
        t.update(200, &mut out);
        t.update(300, &mut out);
        assert!(!t.has_fault());
        assert!(t.heater_power() > 0);
    }

    #[test]
    fn test_fault_trips_again_while_present() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.sensor_mut().reading = Err(SensorError::OpenCircuit);
        t.update(100, &mut out);
        t.set_target_x10(2100);
        t.update(200, &mut out);
        assert!(t.has_fault());
        assert_eq!(faults(&out), 2);
    }

    #[test]
    fn test_manual_power_disables_pid() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_heater_power(100);
        t.update(100, &mut out);
        assert_eq!(t.heater_power(), 100);

        t.set_target_x10(2100);
        t.heater_off();
        assert_eq!(t.heater_power(), 0);
        assert_eq!(t.stage(), HeatingStage::Off);
    }

    #[test]
    fn test_reaches_ready() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_target_x10(2100);

        // heater adds up to 1°C per sample, losses pull toward ambient
        let mut temp = 250.0f32;
        for step in 1..=3000u32 {
            t.sensor_mut().reading = Ok(temp as i16);
            t.update(step * 100, &mut out);
            temp += t.heater_power() as f32 * 10.0 / 255.0 - (temp - 250.0) / 2000.0;
        }

        assert_eq!(t.fault(), None);
        assert_eq!(t.stage(), HeatingStage::Ready);
        assert!(t.is_target_reached());
        assert!((t.current_x10() - 2100).abs() < 50);
        assert_eq!(t.setpoint_x10(), 2100);
    }

    #[test]
    fn test_autotune_applies_gains() {
        let mut t = controller(2000);
        let mut out = Lines::new();
        assert!(t.start_autotune(2100));
        assert!(t.is_autotuning());
        assert!(!t.start_autotune(2100));

        let mut temp = 2000i16;
        let mut now = 0;
        while t.is_autotuning() && now < 60_000 {
            now += 100;
            t.sensor_mut().reading = Ok(temp);
            t.update(now, &mut out);
            temp += if t.heater_power() > 0 { 5 } else { -5 };
        }

        let ku = 4.0 * 200.0 / (PI * 2.5);
        match out.last() {
            Some(StatusLine::AutotuneDone { kp, .. }) => assert!((kp - 0.6 * ku).abs() < 0.01),
            other => panic!("unexpected {:?}", other),
        }
        assert!((t.pid().gains().kd - 0.075 * ku * 2.0).abs() < 0.01);
        assert_eq!(t.heater_power(), 0);
        assert_eq!(t.target_x10(), 0);
        assert_eq!(t.stage(), HeatingStage::Off);
    }

    #[test]
    fn test_autotune_cancel_and_refusals() {
        let mut t = controller(2000);
        assert!(!t.start_autotune(0));
        assert!(t.start_autotune(2100));
        assert_eq!(t.heater_power(), 200);
        t.cancel_autotune();
        assert!(!t.is_autotuning());
        assert_eq!(t.heater_power(), 0);

        let mut out = Lines::new();
        t.sensor_mut().reading = Err(SensorError::OpenCircuit);
        t.update(100, &mut out);
        assert!(!t.start_autotune(2100));
    }

    #[test]
    fn test_autotune_aborted_by_fault() {
        let mut t = controller(2000);
        let mut out = Lines::new();
        t.start_autotune(2100);
        t.sensor_mut().reading = Err(SensorError::OpenCircuit);
        t.update(100, &mut out);
        assert!(!t.is_autotuning());
        assert_eq!(out[0], StatusLine::AutotuneFailed("SENSOR"));
        assert_eq!(out[1], StatusLine::ThermalFault(ThermalFault::Thermistor));
    }

    #[test]
    fn test_temp_log_interval() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.set_log_interval(1000);
        for now in (100..=3000).step_by(100) {
            t.update(now, &mut out);
        }
        let logs = out
            .iter()
            .filter(|l| matches!(l, StatusLine::TempLog { .. }))
            .count();
        assert_eq!(logs, 3);

        t.set_log_interval(0);
        out.clear();
        for now in (3100..=6000).step_by(100) {
            t.update(now, &mut out);
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_cold_extrusion_guard() {
        let mut t = controller(250);
        let mut out = Lines::new();
        t.update(100, &mut out);
        assert!(!t.is_cold_extrusion_blocked());
        t.set_target_x10(2100);
        assert!(t.is_cold_extrusion_blocked());
        t.sensor_mut().reading = Ok(1800);
        t.update(200, &mut out);
        assert!(!t.is_cold_extrusion_blocked());
    }

    #[test]
    fn test_material_selection() {
        let mut t = controller(250);
        t.set_material(Material::Petg);
        assert_eq!(t.material(), Material::Petg);
        assert_eq!(t.target_x10(), 2350);
        assert_eq!(t.active_profile().ramp_x10_per_s, 15);
    }

    #[test]
    fn test_fan_last_write_wins() {
        let mut t = controller(250);
        t.set_cooling_fan(true);
        assert_eq!(t.cooling_fan_pwm(), 255);
        t.set_cooling_fan_pwm(100);
        assert_eq!(t.cooling_fan_pwm(), 100);
        t.set_cooling_fan(false);
        assert_eq!(t.cooling_fan_pwm(), 0);
    }
}
