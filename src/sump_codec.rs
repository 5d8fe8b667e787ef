//! Byte-level encoding of the SUMP serial protocol.
//!
//! Everything here is pure: settings go in, command bytes come out, and
//! device responses are turned back into values. The [`crate::sump_interface`]
//! module moves these bytes over a serial port.

use crate::device_settings::{
    DeviceSettings, SettingsError, TriggerAction, TriggerEnable, TriggerMode, TriggerStage,
    STAGE_COUNT,
};
use std::fmt;

pub const CMD_RESET: u8 = 0x00;
pub const CMD_RUN: u8 = 0x01;
pub const CMD_ID: u8 = 0x02;
pub const CMD_METADATA: u8 = 0x04;
pub const CMD_XON: u8 = 0x11;
pub const CMD_XOFF: u8 = 0x13;
pub const CMD_SET_DIVIDER: u8 = 0x80;
pub const CMD_SET_READ_DELAY: u8 = 0x81;
pub const CMD_SET_FLAGS: u8 = 0x82;
pub const CMD_TRIGGER_MASK: u8 = 0xC0;
pub const CMD_TRIGGER_VALUES: u8 = 0xC1;
pub const CMD_TRIGGER_CONFIG: u8 = 0xC2;

/// ID the device answers with, after byte reversal.
pub const SUMP_ID: &[u8; 4] = b"SLA1";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Capture response truncated: expected {expected} bytes, got {received}")]
    TruncatedCapture { expected: usize, received: usize },

    #[error("Capture response too long: expected {expected} bytes, got {received}")]
    TrailingCaptureBytes { expected: usize, received: usize },

    #[error("Metadata stream ended inside the field of token 0x{token:02x}")]
    TruncatedMetadata { token: u8 },

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One command of the SUMP protocol.
///
/// Short commands are a single opcode byte; long commands carry a four byte
/// little-endian payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumpCommand {
    Reset,
    Run,
    Id,
    Metadata,
    XOn,
    XOff,
    /// Sample-rate divider; the wire carries `divider - 1`
    SetDivider(u32),
    /// Read and delay counts in units of four samples
    SetReadDelay { read_units: u16, delay_units: u16 },
    SetFlags(u8),
    SetTriggerMask { stage: u8, mask: u32 },
    SetTriggerValues { stage: u8, values: u32 },
    SetTriggerConfig {
        stage: u8,
        delay: u16,
        channel: u8,
        level: u8,
        start: bool,
        serial: bool,
    },
}

impl SumpCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            SumpCommand::Reset => CMD_RESET,
            SumpCommand::Run => CMD_RUN,
            SumpCommand::Id => CMD_ID,
            SumpCommand::Metadata => CMD_METADATA,
            SumpCommand::XOn => CMD_XON,
            SumpCommand::XOff => CMD_XOFF,
            SumpCommand::SetDivider(_) => CMD_SET_DIVIDER,
            SumpCommand::SetReadDelay { .. } => CMD_SET_READ_DELAY,
            SumpCommand::SetFlags(_) => CMD_SET_FLAGS,
            SumpCommand::SetTriggerMask { stage, .. } => CMD_TRIGGER_MASK | (stage << 2),
            SumpCommand::SetTriggerValues { stage, .. } => CMD_TRIGGER_VALUES | (stage << 2),
            SumpCommand::SetTriggerConfig { stage, .. } => CMD_TRIGGER_CONFIG | (stage << 2),
        }
    }

    pub fn legend(&self) -> &'static str {
        match self {
            SumpCommand::Reset => "Reset",
            SumpCommand::Run => "Run",
            SumpCommand::Id => "Id",
            SumpCommand::Metadata => "Metadata",
            SumpCommand::XOn => "Xon",
            SumpCommand::XOff => "Xoff",
            SumpCommand::SetDivider(_) => "Divider",
            SumpCommand::SetReadDelay { .. } => "Read/Delay",
            SumpCommand::SetFlags(_) => "Flags",
            SumpCommand::SetTriggerMask { .. } => "Trigger mask",
            SumpCommand::SetTriggerValues { .. } => "Trigger values",
            SumpCommand::SetTriggerConfig { .. } => "Trigger config",
        }
    }

    fn payload(&self) -> Option<[u8; 4]> {
        match *self {
            SumpCommand::Reset
            | SumpCommand::Run
            | SumpCommand::Id
            | SumpCommand::Metadata
            | SumpCommand::XOn
            | SumpCommand::XOff => None,
            SumpCommand::SetDivider(divider) => {
                let [lo, mid, hi, _] = divider.saturating_sub(1).to_le_bytes();
                Some([lo, mid, hi, 0x00])
            }
            SumpCommand::SetReadDelay {
                read_units,
                delay_units,
            } => {
                let [r_lo, r_hi] = read_units.to_le_bytes();
                let [d_lo, d_hi] = delay_units.to_le_bytes();
                Some([r_lo, r_hi, d_lo, d_hi])
            }
            SumpCommand::SetFlags(flags) => Some([flags, 0x00, 0x00, 0x00]),
            SumpCommand::SetTriggerMask { mask, .. } => Some(mask.to_le_bytes()),
            SumpCommand::SetTriggerValues { values, .. } => Some(values.to_le_bytes()),
            SumpCommand::SetTriggerConfig {
                delay,
                channel,
                level,
                start,
                serial,
                ..
            } => {
                let [d_lo, d_hi] = delay.to_le_bytes();
                Some([
                    d_lo,
                    d_hi,
                    ((channel & 0x0F) << 4) | (level & 0x03),
                    (u8::from(start) << 3) | (u8::from(serial) << 2) | ((channel >> 4) & 0x01),
                ])
            }
        }
    }

    /// Wire bytes of this command.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.opcode()];
        if let Some(payload) = self.payload() {
            bytes.extend_from_slice(&payload);
        }
        bytes
    }

    /// Read one command from the front of `bytes`, as the device would.
    /// Returns the command and the number of bytes it occupied, or `None`
    /// when the bytes are incomplete or the opcode is unknown.
    pub fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        let opcode = *bytes.first()?;
        let short = match opcode {
            CMD_RESET => Some(SumpCommand::Reset),
            CMD_RUN => Some(SumpCommand::Run),
            CMD_ID => Some(SumpCommand::Id),
            CMD_METADATA => Some(SumpCommand::Metadata),
            CMD_XON => Some(SumpCommand::XOn),
            CMD_XOFF => Some(SumpCommand::XOff),
            _ => None,
        };
        if let Some(command) = short {
            return Some((command, 1));
        }

        let payload: [u8; 4] = bytes.get(1..5)?.try_into().ok()?;
        let word = u32::from_le_bytes(payload);
        let stage = (opcode >> 2) & 0x03;
        let command = match opcode {
            CMD_SET_DIVIDER => SumpCommand::SetDivider((word & 0x00FF_FFFF) + 1),
            CMD_SET_READ_DELAY => SumpCommand::SetReadDelay {
                read_units: u16::from_le_bytes([payload[0], payload[1]]),
                delay_units: u16::from_le_bytes([payload[2], payload[3]]),
            },
            CMD_SET_FLAGS => SumpCommand::SetFlags(payload[0]),
            op if op & 0xF3 == CMD_TRIGGER_MASK => SumpCommand::SetTriggerMask { stage, mask: word },
            op if op & 0xF3 == CMD_TRIGGER_VALUES => SumpCommand::SetTriggerValues {
                stage,
                values: word,
            },
            op if op & 0xF3 == CMD_TRIGGER_CONFIG => SumpCommand::SetTriggerConfig {
                stage,
                delay: u16::from_le_bytes([payload[0], payload[1]]),
                channel: (payload[2] >> 4) | ((payload[3] & 0x01) << 4),
                level: payload[2] & 0x03,
                start: payload[3] & 0x08 != 0,
                serial: payload[3] & 0x04 != 0,
            },
            _ => return None,
        };
        Some((command, 5))
    }
}

impl fmt::Display for SumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \t", self.legend())?;
        for byte in self.to_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Five zero bytes: flushes any long command the device was part way through.
pub fn encode_reset() -> [u8; 5] {
    [CMD_RESET; 5]
}

fn long_command(command: SumpCommand) -> [u8; 5] {
    let mut bytes = [command.opcode(), 0, 0, 0, 0];
    if let Some(payload) = command.payload() {
        bytes[1..].copy_from_slice(&payload);
    }
    bytes
}

pub fn encode_divider(settings: &DeviceSettings) -> [u8; 5] {
    long_command(SumpCommand::SetDivider(settings.divider))
}

fn four_sample_units(count: u32) -> u16 {
    count.div_ceil(4).min(u32::from(u16::MAX)) as u16
}

/// The hardware counts in four-sample units, rounded up.
pub fn encode_read_delay(settings: &DeviceSettings) -> [u8; 5] {
    long_command(read_delay_command(settings))
}

fn read_delay_command(settings: &DeviceSettings) -> SumpCommand {
    SumpCommand::SetReadDelay {
        read_units: four_sample_units(settings.read_count),
        delay_units: four_sample_units(settings.delay_count),
    }
}

pub fn flags_byte(settings: &DeviceSettings) -> u8 {
    (u8::from(settings.clock_inverted) << 7)
        | (u8::from(settings.external_clock) << 6)
        | ((settings.channel_groups & 0x0F) << 2)
        | (u8::from(settings.noise_filter) << 1)
        | u8::from(settings.demux)
}

pub fn encode_flags(settings: &DeviceSettings) -> [u8; 5] {
    long_command(SumpCommand::SetFlags(flags_byte(settings)))
}

fn check_stage(stage: usize) -> Result<u8, SettingsError> {
    if stage >= STAGE_COUNT {
        return Err(SettingsError::StageOutOfRange(stage));
    }
    Ok(stage as u8)
}

pub fn encode_trigger_mask(stage: usize, mask: u32) -> Result<[u8; 5], SettingsError> {
    let stage = check_stage(stage)?;
    Ok(long_command(SumpCommand::SetTriggerMask { stage, mask }))
}

pub fn encode_trigger_values(stage: usize, values: u32) -> Result<[u8; 5], SettingsError> {
    let stage = check_stage(stage)?;
    Ok(long_command(SumpCommand::SetTriggerValues { stage, values }))
}

pub fn encode_trigger_config(
    stage: usize,
    delay: u16,
    channel: u8,
    level: u8,
    start: bool,
    serial: bool,
) -> Result<[u8; 5], SettingsError> {
    let stage = check_stage(stage)?;
    Ok(long_command(SumpCommand::SetTriggerConfig {
        stage,
        delay,
        channel,
        level,
        start,
        serial,
    }))
}

fn stage_commands(index: u8, stage: &TriggerStage, level: u8) -> [SumpCommand; 3] {
    [
        SumpCommand::SetTriggerConfig {
            stage: index,
            delay: stage.delay.min(u32::from(u16::MAX)) as u16,
            channel: stage.channel,
            level,
            start: stage.action == TriggerAction::Capture,
            serial: stage.mode == TriggerMode::Serial,
        },
        SumpCommand::SetTriggerMask {
            stage: index,
            mask: stage.mask,
        },
        SumpCommand::SetTriggerValues {
            stage: index,
            values: stage.values,
        },
    ]
}

fn disabled_stage(index: u8, start: bool) -> [SumpCommand; 3] {
    [
        SumpCommand::SetTriggerConfig {
            stage: index,
            delay: 0,
            channel: 0,
            level: 0,
            start,
            serial: false,
        },
        SumpCommand::SetTriggerMask {
            stage: index,
            mask: 0,
        },
        SumpCommand::SetTriggerValues {
            stage: index,
            values: 0,
        },
    ]
}

/// The command sequence that programs `settings` into the device.
///
/// Settings are validated first; nothing is produced for invalid settings.
pub fn encode_settings(settings: &DeviceSettings) -> Result<Vec<SumpCommand>, SettingsError> {
    settings.validate()?;

    let mut commands = vec![
        SumpCommand::SetDivider(settings.divider),
        read_delay_command(settings),
        SumpCommand::SetFlags(flags_byte(settings)),
    ];

    match settings.trigger_enable {
        TriggerEnable::None => {
            // stage 0 fires on anything, the rest never act
            commands.extend(disabled_stage(0, true));
            for index in 1..STAGE_COUNT as u8 {
                commands.extend(disabled_stage(index, false));
            }
        }
        TriggerEnable::Simple => {
            let mut stage = settings.stages[0].clone();
            stage.action = TriggerAction::Capture;
            commands.extend(stage_commands(0, &stage, 0));
            for index in 1..STAGE_COUNT as u8 {
                commands.extend(disabled_stage(index, false));
            }
        }
        TriggerEnable::Complex => {
            let per_stage: Vec<[SumpCommand; 3]> = settings
                .stages
                .iter()
                .zip(0u8..)
                .map(|(stage, index)| stage_commands(index, stage, stage.arm_level))
                .collect();
            // all configurations, then all masks, then all values
            for kind in 0..3 {
                commands.extend(per_stage.iter().map(|stage| stage[kind]));
            }
        }
    }

    Ok(commands)
}

/// Bytes each sample occupies in a capture response.
pub fn bytes_per_sample(channel_groups: u8) -> usize {
    (0..4).filter(|group| channel_groups & (1 << group) == 0).count()
}

/// Rebuild the sample array from a capture response.
///
/// Samples arrive most recent first and carry one byte per enabled channel
/// group, lowest group first. Index 0 of the result is the oldest sample.
pub fn parse_capture_response(
    read_count: usize,
    channel_groups: u8,
    bytes: &[u8],
) -> Result<Vec<u32>, CodecError> {
    let width = bytes_per_sample(channel_groups);
    let expected = read_count * width;
    if bytes.len() < expected {
        return Err(CodecError::TruncatedCapture {
            expected,
            received: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(CodecError::TrailingCaptureBytes {
            expected,
            received: bytes.len(),
        });
    }

    let groups: Vec<u32> = (0..4u32)
        .filter(|group| channel_groups & (1 << group) == 0)
        .collect();

    let mut samples = vec![0u32; read_count];
    let mut cursor = 0;
    for slot in samples.iter_mut().rev() {
        let chunk = &bytes[cursor..cursor + width];
        *slot = chunk
            .iter()
            .zip(&groups)
            .fold(0, |word, (byte, group)| word | (u32::from(*byte) << (8 * group)));
        cursor += width;
    }
    debug_assert_eq!(cursor, expected);

    Ok(samples)
}

/// The ID arrives as a little-endian word; reverse it for the ASCII form.
pub fn parse_id_string(raw: [u8; 4]) -> [u8; 4] {
    let [a, b, c, d] = raw;
    [d, c, b, a]
}
