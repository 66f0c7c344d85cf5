//! TMC2209 stepper driver (UART mode)
//!
//! The TMC2209 takes step/dir pulses for motion and is configured over a
//! single-wire UART: current, microstepping, StealthChop and the
//! StallGuard threshold used for sensorless homing and stall reporting.
//!
//! # UART Protocol
//!
//! 115200 baud 8N1, one wire shared by TX and RX, so every byte sent is
//! also received back:
//! - Sync byte: 0x05
//! - Slave address: 0-3 (set by the MS1/MS2 pins)
//! - Register address, bit 7 set for writes
//! - Data (4 bytes, big-endian, writes and replies only)
//! - CRC8 over the preceding bytes

use embedded_io::{Read, Write};

/// TMC2209 register addresses
pub mod reg {
    /// General configuration
    pub const GCONF: u8 = 0x00;
    /// Global status flags
    pub const GSTAT: u8 = 0x01;
    /// Interface transmission counter
    pub const IFCNT: u8 = 0x02;
    /// Hold/run current settings
    pub const IHOLD_IRUN: u8 = 0x10;
    /// Power down delay
    pub const TPOWERDOWN: u8 = 0x11;
    /// Measured time between steps
    pub const TSTEP: u8 = 0x12;
    /// Lower velocity for StallGuard
    pub const TCOOLTHRS: u8 = 0x14;
    /// StallGuard threshold
    pub const SGTHRS: u8 = 0x40;
    /// StallGuard result
    pub const SG_RESULT: u8 = 0x41;
    /// Chopper configuration
    pub const CHOPCONF: u8 = 0x6C;
    /// Driver status
    pub const DRV_STATUS: u8 = 0x6F;
    /// StealthChop PWM configuration
    pub const PWMCONF: u8 = 0x70;
}

/// UART sync byte for TMC2209
pub const SYNC_BYTE: u8 = 0x05;

/// Master address in read replies
const MASTER_ADDRESS: u8 = 0xFF;

/// Write bit in the register byte
const WRITE_BIT: u8 = 0x80;

/// TMC2209 driver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tmc2209Config {
    /// UART address (0-3, set by MS1/MS2 pins)
    pub uart_address: u8,
    /// Run current in mA
    pub run_current_ma: u16,
    /// Hold current in mA
    pub hold_current_ma: u16,
    /// Enable StealthChop mode (quiet operation)
    pub stealthchop: bool,
    /// StallGuard threshold, `None` when stall detection is off
    pub stallguard_threshold: Option<u8>,
    /// Microstepping (1, 2, 4 ... 256)
    pub microsteps: u16,
}

impl Default for Tmc2209Config {
    fn default() -> Self {
        Self {
            uart_address: 0,
            run_current_ma: 800,
            hold_current_ma: 400,
            stealthchop: true,
            stallguard_threshold: None,
            microsteps: 16,
        }
    }
}

impl Tmc2209Config {
    /// Convert microsteps to MRES register value
    pub fn mres(&self) -> u8 {
        match self.microsteps {
            256 => 0,
            128 => 1,
            64 => 2,
            32 => 3,
            16 => 4,
            8 => 5,
            4 => 6,
            2 => 7,
            1 => 8,
            _ => 4, // Default to 16 microsteps
        }
    }

    /// Convert current in mA to IRUN/IHOLD register value (0-31)
    /// Based on Rsense = 0.11 ohm (typical for TMC2209 breakout boards)
    pub fn current_to_cs(current_ma: u16) -> u8 {
        // CS = (I_rms * 32 * 1.41 * Rsense) / Vref - 1
        // With Rsense = 0.11, Vref = 0.325 (internal)
        // CS ≈ I_rms * 15.34 - 1
        let cs = ((current_ma as u32) * 1534 / 100000).saturating_sub(1);
        (cs.min(31)) as u8
    }

    /// GCONF register value
    pub fn gconf(&self) -> u32 {
        let mut gconf = 0u32;
        // Bit 2: en_spreadcycle = !stealthchop
        if !self.stealthchop {
            gconf |= 1 << 2;
        }
        // Bit 6: pdn_disable = 1 (UART owns the PDN pin)
        gconf |= 1 << 6;
        // Bit 7: mstep_reg_select = 1 (MRES from CHOPCONF)
        gconf |= 1 << 7;
        // Bit 8: multistep_filt = 1
        gconf |= 1 << 8;
        gconf
    }

    /// CHOPCONF register value
    pub fn chopconf(&self) -> u32 {
        // TOFF = 5, HSTRT = 4, TBL = 2, intpol = 1
        5 | (4 << 4) | (2 << 15) | ((self.mres() as u32) << 24) | (1 << 28)
    }

    /// IHOLD_IRUN register value
    pub fn ihold_irun(&self) -> u32 {
        let ihold = Self::current_to_cs(self.hold_current_ma) as u32;
        let irun = Self::current_to_cs(self.run_current_ma) as u32;
        let iholddelay = 6u32;
        ((iholddelay & 0x0F) << 16) | ((irun & 0x1F) << 8) | (ihold & 0x1F)
    }

    /// PWMCONF register value for StealthChop
    pub fn pwmconf(&self) -> u32 {
        // PWM_OFS 36, PWM_GRAD 14, PWM_FREQ 1, autoscale, autograd, PWM_REG 4, PWM_LIM 12
        36 | (14 << 8) | (1 << 16) | (1 << 18) | (1 << 19) | (4 << 24) | (12 << 28)
    }

    /// SGTHRS register value; zero disables the stall output
    pub fn sgthrs(&self) -> u32 {
        self.stallguard_threshold.unwrap_or(0) as u32
    }

    /// Full register image written at start-up
    pub fn init_writes(&self) -> [(u8, u32); 7] {
        [
            (reg::GCONF, self.gconf()),
            (reg::CHOPCONF, self.chopconf()),
            (reg::IHOLD_IRUN, self.ihold_irun()),
            (reg::TPOWERDOWN, 20),
            (reg::PWMCONF, self.pwmconf()),
            // StallGuard active at every speed
            (reg::TCOOLTHRS, 0x000F_FFFF),
            (reg::SGTHRS, self.sgthrs()),
        ]
    }
}

/// CRC8 calculation for TMC2209 UART
///
/// Polynomial 0x07, each byte fed least significant bit first.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }
    crc
}

/// Build a write datagram for TMC2209
pub fn build_write_datagram(addr: u8, reg: u8, data: u32) -> [u8; 8] {
    let mut datagram = [0u8; 8];
    datagram[0] = SYNC_BYTE;
    datagram[1] = addr;
    datagram[2] = reg | WRITE_BIT;
    datagram[3..7].copy_from_slice(&data.to_be_bytes());
    datagram[7] = crc8(&datagram[..7]);
    datagram
}

/// Build a read request datagram for TMC2209
pub fn build_read_request(addr: u8, reg: u8) -> [u8; 4] {
    let mut datagram = [0u8; 4];
    datagram[0] = SYNC_BYTE;
    datagram[1] = addr;
    datagram[2] = reg;
    datagram[3] = crc8(&datagram[..3]);
    datagram
}

/// Parse a read reply
///
/// The reply is sync, master address (0xFF), register, four data bytes
/// (big-endian) and CRC8.
pub fn parse_read_response(response: &[u8; 8], expected_reg: u8) -> Result<u32, Tmc2209Error> {
    if response[0] != SYNC_BYTE || response[1] != MASTER_ADDRESS {
        return Err(Tmc2209Error::InvalidSync);
    }
    if response[7] != crc8(&response[..7]) {
        return Err(Tmc2209Error::CrcMismatch);
    }
    if response[2] != expected_reg {
        return Err(Tmc2209Error::WrongRegister);
    }
    Ok(u32::from_be_bytes([response[3], response[4], response[5], response[6]]))
}

/// TMC2209 communication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tmc2209Error {
    /// Invalid sync byte in response
    InvalidSync,
    /// CRC mismatch
    CrcMismatch,
    /// Reply for a different register
    WrongRegister,
    /// UART failed or ran out of bytes
    Io,
}

/// Parsed DRV_STATUS register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrvStatus {
    /// Overtemperature pre-warning (120°C)
    pub ot_prewarning: bool,
    /// Overtemperature shutdown (150°C)
    pub ot_shutdown: bool,
    /// Short to ground on phase A
    pub s2ga: bool,
    /// Short to ground on phase B
    pub s2gb: bool,
    /// Short to supply on phase A
    pub s2vsa: bool,
    /// Short to supply on phase B
    pub s2vsb: bool,
    /// Open load on phase A
    pub ola: bool,
    /// Open load on phase B
    pub olb: bool,
    /// Current scaling (0-31)
    pub cs_actual: u8,
    /// StealthChop active
    pub stealth: bool,
    /// Motor standstill indicator
    pub standstill: bool,
}

impl DrvStatus {
    /// Parse from raw DRV_STATUS register value
    pub fn from_register(value: u32) -> Self {
        let bit = |n: u32| value & (1 << n) != 0;
        Self {
            ot_prewarning: bit(0),
            ot_shutdown: bit(1),
            s2ga: bit(2),
            s2gb: bit(3),
            s2vsa: bit(4),
            s2vsb: bit(5),
            ola: bit(6),
            olb: bit(7),
            cs_actual: ((value >> 16) & 0x1F) as u8,
            stealth: bit(30),
            standstill: bit(31),
        }
    }

    /// Check if any fault condition is present
    pub fn has_fault(&self) -> bool {
        self.ot_shutdown || self.s2ga || self.s2gb || self.s2vsa || self.s2vsb
    }

    /// Check if driver is in warning state
    pub fn has_warning(&self) -> bool {
        self.ot_prewarning || self.ola || self.olb
    }
}

/// StallGuard rule: a stall is signalled when SG_RESULT ≤ 2 × SGTHRS
pub fn is_stall(sg_result: u16, threshold: u8) -> bool {
    threshold > 0 && sg_result <= 2 * threshold as u16
}

/// Register access over a single-wire UART
pub struct Tmc2209Uart<U> {
    uart: U,
    address: u8,
}

impl<U: Read + Write> Tmc2209Uart<U> {
    pub fn new(uart: U, address: u8) -> Self {
        Self { uart, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Give the UART back
    pub fn release(self) -> U {
        self.uart
    }

    fn skip_echo(&mut self, len: usize) -> Result<(), Tmc2209Error> {
        let mut echo = [0u8; 8];
        self.uart
            .read_exact(&mut echo[..len])
            .map_err(|_| Tmc2209Error::Io)
    }

    /// Write one register
    pub fn write_register(&mut self, reg: u8, data: u32) -> Result<(), Tmc2209Error> {
        let datagram = build_write_datagram(self.address, reg, data);
        self.uart.write_all(&datagram).map_err(|_| Tmc2209Error::Io)?;
        self.uart.flush().map_err(|_| Tmc2209Error::Io)?;
        self.skip_echo(datagram.len())
    }

    /// Read one register
    pub fn read_register(&mut self, reg: u8) -> Result<u32, Tmc2209Error> {
        let request = build_read_request(self.address, reg);
        self.uart.write_all(&request).map_err(|_| Tmc2209Error::Io)?;
        self.uart.flush().map_err(|_| Tmc2209Error::Io)?;
        self.skip_echo(request.len())?;

        let mut response = [0u8; 8];
        self.uart
            .read_exact(&mut response)
            .map_err(|_| Tmc2209Error::Io)?;
        parse_read_response(&response, reg)
    }

    /// Write the full start-up register image
    pub fn apply_config(&mut self, config: &Tmc2209Config) -> Result<(), Tmc2209Error> {
        for (reg, value) in config.init_writes() {
            self.write_register(reg, value)?;
        }
        Ok(())
    }

    pub fn read_status(&mut self) -> Result<DrvStatus, Tmc2209Error> {
        self.read_register(reg::DRV_STATUS).map(DrvStatus::from_register)
    }

    /// Current StallGuard load value (lower means more load)
    pub fn read_sg_result(&mut self) -> Result<u16, Tmc2209Error> {
        self.read_register(reg::SG_RESULT).map(|v| (v & 0x3FF) as u16)
    }

    /// Successful-write counter, used to confirm a write landed
    pub fn read_ifcnt(&mut self) -> Result<u8, Tmc2209Error> {
        self.read_register(reg::IFCNT).map(|v| v as u8)
    }
}
