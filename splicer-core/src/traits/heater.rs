//! Heater, fan and temperature sensor traits

/// Errors that can occur with temperature sensing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Sensor disconnected (open circuit)
    OpenCircuit,
    /// Sensor shorted to ground
    ShortCircuit,
    /// Reading out of expected range
    OutOfRange,
    /// ADC conversion error
    ConversionError,
}

/// Trait for temperature sensors
///
/// Implementations handle the specific sensor type (NTC thermistor,
/// thermocouple, ...).
pub trait TemperatureSensor {
    /// Read the current temperature in 0.1°C units
    ///
    /// For example, 210.5°C is returned as 2105.
    fn read_celsius_x10(&mut self) -> Result<i16, SensorError>;

    /// Read the current temperature in whole degrees Celsius
    fn read_celsius(&mut self) -> Result<i16, SensorError> {
        self.read_celsius_x10().map(|t| t / 10)
    }
}

/// Trait for the weld heater output
///
/// Power is a duty value from 0 (off) to 255 (full on). Implementations
/// may drive a hardware PWM channel or time-proportion a plain GPIO.
pub trait HeaterOutput {
    /// Set the heater duty
    fn set_power(&mut self, power: u8);

    /// Last duty written
    fn power(&self) -> u8;

    /// Force the heater off
    fn off(&mut self) {
        self.set_power(0);
    }
}

/// Trait for the part cooling fan
pub trait FanOutput {
    /// Set fan duty (0 = off, 255 = full)
    fn set_pwm(&mut self, pwm: u8);

    /// Last duty written
    fn pwm(&self) -> u8;
}
