// Feetech STS serial protocol implementation
//
// Protocol is similar to Dynamixel Protocol 1.0:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
//
// The bus is generic over its transport so the packet layer can run against
// an in-memory port in tests. Hardware use goes through `FeetechBus::open`.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech motors
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set (subset used by the swerve channels)
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Register addresses for STS3215
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Register {
    MinAngleLimit = 9,    // 2 bytes, EEPROM
    MaxAngleLimit = 11,   // 2 bytes, EEPROM; both limits 0 = multi-turn
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte: 0=off, 1=on
    GoalPosition = 42,    // 2 bytes (sign-magnitude when multi-turn)
    GoalVelocity = 46,    // 2 bytes (sign-magnitude, velocity mode)
    Lock = 55,            // 1 byte: 0=unlocked, 1=locked
    PresentPosition = 56, // 2 bytes, read-only
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

/// Error types for Feetech communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Feetech motor bus - handles serial communication with motors
pub struct FeetechBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl FeetechBus {
    /// Open a new connection to the motor bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl<P: Read + Write> FeetechBus<P> {
    /// Wrap an already-open transport
    pub fn from_port(port: P) -> Self {
        Self { port }
    }

    #[cfg(test)]
    pub(crate) fn port_ref(&self) -> &P {
        &self.port
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.extend_from_slice(&[id, length, instruction as u8]);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    /// Send one instruction and read back the status packet parameters
    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(id, instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        self.read_response(id)
    }

    fn read_exact_or_timeout(&mut self, buf: &mut [u8], id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                FeetechError::Timeout { id }
            }
            _ => FeetechError::Io(e),
        })
    }

    /// Read a status packet: [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.read_exact_or_timeout(&mut head, expected_id)?;

        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }

        let (id, length) = (head[2], head[3] as usize);
        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Status length {} too short", length),
            });
        }

        // error + params + checksum = length bytes
        let mut body = vec![0u8; length];
        self.read_exact_or_timeout(&mut body, id)?;

        let (payload, checksum) = body.split_at(length - 1);
        let mut summed = vec![id, length as u8];
        summed.extend_from_slice(payload);
        if Self::checksum(&summed) != checksum[0] {
            return Err(FeetechError::ChecksumMismatch { id });
        }

        if payload[0] != 0 {
            return Err(FeetechError::MotorError {
                id,
                status: payload[0],
            });
        }

        Ok(payload[1..].to_vec())
    }

    /// Ping a motor to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a single byte to a register
    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to motor {}: reg={:?}, value={}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])?;
        Ok(())
    }

    /// Write two bytes (little-endian) to a register
    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        debug!("Write u16 to motor {}: reg={:?}, value={}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])?;
        Ok(())
    }

    /// Write a signed 16-bit value in sign-magnitude encoding
    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    /// Read two bytes (little-endian) from a register
    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        match response.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", response.len()),
            }),
        }
    }

    /// Read a signed 16-bit register in sign-magnitude encoding
    pub fn read_i16(&mut self, id: u8, register: Register) -> Result<i16> {
        Ok(decode_sign_magnitude(self.read_u16(id, register)?))
    }

    // === High-level convenience methods ===

    /// Enable torque on a motor
    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    /// Disable torque on a motor
    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Switch operating mode, cycling torque around the change
    pub fn switch_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.disable_torque(id)?;
        self.write_u8(id, Register::OperatingMode, mode as u8)?;
        self.enable_torque(id)
    }

    /// Absolute position mode without angle limits, so goal and present
    /// position count across turns
    pub fn enable_multi_turn_position(&mut self, id: u8) -> Result<()> {
        self.disable_torque(id)?;
        self.write_u16(id, Register::MinAngleLimit, 0)?;
        self.write_u16(id, Register::MaxAngleLimit, 0)?;
        self.write_u8(id, Register::OperatingMode, OperatingMode::Position as u8)?;
        self.enable_torque(id)
    }

    /// Set goal velocity for a motor (must be in velocity mode)
    pub fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.write_i16(id, Register::GoalVelocity, velocity)
    }

    /// Set goal position in ticks (absolute, multi-turn once limits are cleared)
    pub fn set_position(&mut self, id: u8, ticks: i16) -> Result<()> {
        self.write_i16(id, Register::GoalPosition, ticks)
    }

    /// Read present position in ticks
    pub fn get_position(&mut self, id: u8) -> Result<i16> {
        self.read_i16(id, Register::PresentPosition)
    }

    /// Read the unsigned position register as reported by the encoder
    pub fn get_position_raw(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }
}

/// Encode a signed value to sign-magnitude format
/// Bit 15 = sign (1 = negative), Bits 0-14 = magnitude
fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

/// Decode sign-magnitude format to signed value
fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// In-memory port: replies are queued up front, writes are captured
    #[derive(Default)]
    pub(crate) struct ScriptedPort {
        pub rx: VecDeque<u8>,
        pub tx: Vec<u8>,
    }

    impl ScriptedPort {
        /// Queue a status packet carrying `params`
        pub fn reply(&mut self, id: u8, params: &[u8]) {
            let length = (params.len() + 2) as u8;
            let mut body = vec![id, length, 0];
            body.extend_from_slice(params);
            let checksum = FeetechBus::<ScriptedPort>::checksum(&body);
            self.rx.extend(HEADER);
            self.rx.extend(body);
            self.rx.push_back(checksum);
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
            }
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_checksum() {
        // Example: ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(FeetechBus::<ScriptedPort>::checksum(&data), 215);
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064); // 0x8000 | 100
        assert_eq!(decode_sign_magnitude(0x8064), -100);
        assert_eq!(decode_sign_magnitude(0x0400), 1024);
    }

    #[test]
    fn test_read_position_decodes_negative() {
        let mut port = ScriptedPort::default();
        port.reply(3, &[0x00, 0x84]); // 0x8400 -> -1024
        let mut bus = FeetechBus::from_port(port);

        assert_eq!(bus.get_position(3).unwrap(), -1024);
        // Read request: header, id, len=4, READ, addr, count, checksum
        assert_eq!(&bus.port.tx[..7], &[0xFF, 0xFF, 3, 4, 0x02, 56, 2]);
    }

    #[test]
    fn test_ping_timeout_is_not_an_error() {
        let mut bus = FeetechBus::from_port(ScriptedPort::default());
        assert!(!bus.ping(9).unwrap());
    }

    #[test]
    fn test_motor_error_status() {
        let mut port = ScriptedPort::default();
        // Status with error byte 0x20 (overload)
        let body = [1u8, 2, 0x20];
        let checksum = FeetechBus::<ScriptedPort>::checksum(&body);
        port.rx.extend([0xFF, 0xFF, 1, 2, 0x20, checksum]);
        let mut bus = FeetechBus::from_port(port);

        match bus.write_u8(1, Register::TorqueEnable, 1) {
            Err(FeetechError::MotorError { id: 1, status: 0x20 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut port = ScriptedPort::default();
        port.rx.extend([0xFF, 0xFF, 1, 2, 0x00, 0x00]);
        let mut bus = FeetechBus::from_port(port);
        assert!(matches!(
            bus.ping(1),
            Err(FeetechError::ChecksumMismatch { id: 1 })
        ));
    }
}
