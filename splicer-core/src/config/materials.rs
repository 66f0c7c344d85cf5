//! Built-in material tables

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Supported filament materials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Material {
    /// Polylactic acid
    #[default]
    Pla,
    /// PET-G copolyester
    Petg,
    /// Acrylonitrile butadiene styrene
    Abs,
}

impl Material {
    /// All materials in table order
    pub const ALL: [Material; 3] = [Material::Pla, Material::Petg, Material::Abs];

    /// Look up by table index; out-of-range indices fall back to PLA
    pub fn from_index(index: u8) -> Self {
        Self::ALL.get(index as usize).copied().unwrap_or(Material::Pla)
    }

    /// Table index
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Parse an upper- or lower-case material name
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLA") {
            Some(Material::Pla)
        } else if name.eq_ignore_ascii_case("PETG") {
            Some(Material::Petg)
        } else if name.eq_ignore_ascii_case("ABS") {
            Some(Material::Abs)
        } else {
            None
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Material::Pla => "PLA",
            Material::Petg => "PETG",
            Material::Abs => "ABS",
        }
    }

    /// Heating parameters for this material
    pub const fn thermal_profile(self) -> ThermalProfile {
        match self {
            Material::Pla => ThermalProfile {
                material: Material::Pla,
                target_x10: 2100,
                min_motion_x10: 1800,
                ramp_x10_per_s: 20,
                soak_ms: 2000,
            },
            Material::Petg => ThermalProfile {
                material: Material::Petg,
                target_x10: 2350,
                min_motion_x10: 2100,
                ramp_x10_per_s: 15,
                soak_ms: 3000,
            },
            Material::Abs => ThermalProfile {
                material: Material::Abs,
                target_x10: 2500,
                min_motion_x10: 2200,
                ramp_x10_per_s: 10,
                soak_ms: 4000,
            },
        }
    }

    /// Weld cycle parameters for this material
    pub const fn splice_profile(self) -> SpliceProfile {
        match self {
            Material::Pla => SpliceProfile {
                temperature_x10: 2100,
                compression_mm: 2.0,
                hold_ms: 2000,
                cool_ms: 5000,
                cool_target_x10: 500,
                pull_test_mm: 1.0,
                min_pull_force_n: 20.0,
            },
            Material::Petg => SpliceProfile {
                temperature_x10: 2350,
                compression_mm: 2.5,
                hold_ms: 3000,
                cool_ms: 6000,
                cool_target_x10: 600,
                pull_test_mm: 1.0,
                min_pull_force_n: 18.0,
            },
            Material::Abs => SpliceProfile {
                temperature_x10: 2500,
                compression_mm: 3.0,
                hold_ms: 4000,
                cool_ms: 8000,
                cool_target_x10: 700,
                pull_test_mm: 1.0,
                min_pull_force_n: 15.0,
            },
        }
    }
}

/// Heating parameters of one material
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThermalProfile {
    /// Material this profile belongs to
    pub material: Material,
    /// Splice temperature (°C × 10)
    pub target_x10: i16,
    /// Below this the filament must not be moved (°C × 10)
    pub min_motion_x10: i16,
    /// Effective setpoint ramp rate (°C × 10 per second)
    pub ramp_x10_per_s: i16,
    /// Time at temperature before READY (ms)
    pub soak_ms: u32,
}

/// Weld cycle parameters of one material
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpliceProfile {
    /// Weld temperature (°C × 10)
    pub temperature_x10: i16,
    /// Push distance while molten (mm)
    pub compression_mm: f32,
    /// Hold at temperature after compression (ms)
    pub hold_ms: u32,
    /// Cooling time cap (ms)
    pub cool_ms: u32,
    /// Cooling is done at or below this (°C × 10)
    pub cool_target_x10: i16,
    /// Pull-back distance for the joint check; zero skips verification (mm)
    pub pull_test_mm: f32,
    /// Minimum joint strength (N), informational
    pub min_pull_force_n: f32,
}
