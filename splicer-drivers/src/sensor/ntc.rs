//! NTC thermistor on a resistor divider
//!
//! Circuit: VCC -- series resistor -- ADC_PIN -- NTC -- GND
//!
//! Several ADC samples are averaged per reading, converted to a
//! resistance and then to temperature with the beta equation.

use libm::{logf, roundf};
use splicer_core::traits::{SensorError, TemperatureSensor};

const KELVIN_OFFSET: f32 = 273.15;

/// ADC reading trait for platform abstraction
pub trait AdcReader {
    /// Read one raw conversion
    #[allow(clippy::result_unit_err)]
    fn read(&mut self) -> Result<u16, ()>;
}

/// Thermistor and divider parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NtcConfig {
    /// Resistance at the nominal temperature (ohms)
    pub nominal_ohms: f32,
    /// Nominal temperature (°C)
    pub nominal_c: f32,
    /// Beta coefficient (K)
    pub beta: f32,
    /// Divider resistor (ohms)
    pub series_ohms: f32,
    /// Full-scale ADC count
    pub adc_max: u16,
    /// Conversions averaged per reading
    pub samples: u8,
}

impl Default for NtcConfig {
    /// 100k B3950 with a 4.7k divider on a 12-bit ADC
    fn default() -> Self {
        Self {
            nominal_ohms: 100_000.0,
            nominal_c: 25.0,
            beta: 3950.0,
            series_ohms: 4700.0,
            adc_max: 4095,
            samples: 5,
        }
    }
}

/// NTC thermistor sensor
pub struct NtcThermistor<A> {
    adc: A,
    config: NtcConfig,
}

impl<A> NtcThermistor<A> {
    pub fn new(adc: A, config: NtcConfig) -> Self {
        Self { adc, config }
    }

    pub fn config(&self) -> &NtcConfig {
        &self.config
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    /// Convert an averaged ADC count to thermistor resistance
    ///
    /// Counts pinned at either rail mean the divider is broken.
    pub fn adc_to_resistance(&self, adc: f32) -> Result<f32, SensorError> {
        let max = self.config.adc_max as f32;
        if adc <= 1.0 {
            return Err(SensorError::ShortCircuit);
        }
        if adc >= max - 1.0 {
            return Err(SensorError::OpenCircuit);
        }
        Ok(self.config.series_ohms * adc / (max - adc))
    }

    /// Beta equation, result in 0.1°C units
    pub fn resistance_to_temp_x10(&self, ohms: f32) -> Result<i16, SensorError> {
        if ohms <= 0.0 {
            return Err(SensorError::OutOfRange);
        }
        let inv_t = 1.0 / (self.config.nominal_c + KELVIN_OFFSET)
            + logf(ohms / self.config.nominal_ohms) / self.config.beta;
        let celsius = 1.0 / inv_t - KELVIN_OFFSET;
        let x10 = roundf(celsius * 10.0);
        if !x10.is_finite() || x10 < i16::MIN as f32 || x10 > i16::MAX as f32 {
            return Err(SensorError::OutOfRange);
        }
        Ok(x10 as i16)
    }
}

impl<A: AdcReader> TemperatureSensor for NtcThermistor<A> {
    fn read_celsius_x10(&mut self) -> Result<i16, SensorError> {
        let samples = self.config.samples.max(1);
        let mut sum: u32 = 0;
        for _ in 0..samples {
            let raw = self.adc.read().map_err(|_| SensorError::ConversionError)?;
            sum += raw as u32;
        }
        let avg = sum as f32 / samples as f32;
        let ohms = self.adc_to_resistance(avg)?;
        self.resistance_to_temp_x10(ohms)
    }
}
