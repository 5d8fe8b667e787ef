//! Protocol decoders over a captured [`SampleBuffer`](crate::SampleBuffer).
//!
//! Every decoder borrows the buffer, walks it once and returns its events in
//! non-decreasing sample order. Anomalies in the signal (glitches, parity
//! mismatches, unfinished bytes) are events, not errors; a decoder only fails
//! when its configuration does not fit the buffer.

pub mod baudot;
pub mod i2c;
pub mod spi;
pub mod uart;
pub mod uart_detect;

#[cfg(test)]
pub(crate) mod synth;

use crate::sample_buffer::{check_channel, SampleBufferError};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Channel {0} out of range (0..=31)")]
    ChannelOutOfRange(u8),

    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),

    #[error("Auto-detection failed: {0}")]
    AmbiguousAutoDetect(&'static str),
}

impl From<SampleBufferError> for DecodeError {
    fn from(error: SampleBufferError) -> Self {
        match error {
            SampleBufferError::ChannelOutOfRange(channel) => DecodeError::ChannelOutOfRange(channel),
            other => DecodeError::InvalidConfig(other.to_string()),
        }
    }
}

pub(crate) fn check_channels(channels: &[u8]) -> Result<(), DecodeError> {
    for &channel in channels {
        check_channel(channel)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Which line or field a decoded byte belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Mosi,
    Miso,
    /// I2C address byte; the value is the 7-bit address
    Address(Direction),
    /// I2C data byte
    Data,
    /// UART receive line
    Rx,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Mosi => f.write_str("MOSI"),
            ChannelRole::Miso => f.write_str("MISO"),
            ChannelRole::Address(Direction::Read) => f.write_str("Address (read)"),
            ChannelRole::Address(Direction::Write) => f.write_str("Address (write)"),
            ChannelRole::Data => f.write_str("Data"),
            ChannelRole::Rx => f.write_str("RX"),
        }
    }
}

/// Why an unfinished byte was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// The frame ended (chip select released, I2C STOP)
    FrameEnd,
    /// The buffer ended
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    FrameStart {
        sample: usize,
    },
    FrameEnd {
        sample: usize,
    },
    DataByte {
        sample: usize,
        role: ChannelRole,
        value: u8,
        length_bits: u8,
    },
    Ack {
        sample: usize,
    },
    Nak {
        sample: usize,
    },
    ParityError {
        sample: usize,
        value: u8,
    },
    Glitch {
        sample: usize,
    },
    /// Fewer than eight bits were shifted in. `value` holds them in arrival
    /// order, the first bit most significant; `order` is the bit order the
    /// line was decoded with and decides how the bits are shown.
    PartialByte {
        sample: usize,
        bitcount: u8,
        value: u8,
        role: ChannelRole,
        cause: Truncation,
        order: BitOrder,
    },
}

impl DecodedEvent {
    pub fn sample(&self) -> usize {
        match *self {
            DecodedEvent::FrameStart { sample }
            | DecodedEvent::FrameEnd { sample }
            | DecodedEvent::DataByte { sample, .. }
            | DecodedEvent::Ack { sample }
            | DecodedEvent::Nak { sample }
            | DecodedEvent::ParityError { sample, .. }
            | DecodedEvent::Glitch { sample }
            | DecodedEvent::PartialByte { sample, .. } => sample,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DecodedEvent::FrameStart { .. } => "FrameStart",
            DecodedEvent::FrameEnd { .. } => "FrameEnd",
            DecodedEvent::DataByte { .. } => "DataByte",
            DecodedEvent::Ack { .. } => "Ack",
            DecodedEvent::Nak { .. } => "Nak",
            DecodedEvent::ParityError { .. } => "ParityError",
            DecodedEvent::Glitch { .. } => "Glitch",
            DecodedEvent::PartialByte { .. } => "PartialByte",
        }
    }

    pub fn role(&self) -> Option<ChannelRole> {
        match *self {
            DecodedEvent::DataByte { role, .. } | DecodedEvent::PartialByte { role, .. } => {
                Some(role)
            }
            _ => None,
        }
    }

    pub fn value(&self) -> Option<u8> {
        match *self {
            DecodedEvent::DataByte { value, .. }
            | DecodedEvent::ParityError { value, .. }
            | DecodedEvent::PartialByte { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedEvent::FrameStart { .. } => f.write_str("Frame start"),
            DecodedEvent::FrameEnd { .. } => f.write_str("Frame end"),
            DecodedEvent::DataByte { role, value, .. } => write!(f, "{role} 0x{value:02x}"),
            DecodedEvent::Ack { .. } => f.write_str("ACK"),
            DecodedEvent::Nak { .. } => f.write_str("NAK"),
            DecodedEvent::ParityError { value, .. } => write!(f, "Parity error on 0x{value:02x}"),
            DecodedEvent::Glitch { .. } => f.write_str("Glitch"),
            DecodedEvent::PartialByte {
                bitcount,
                value,
                role,
                cause,
                order,
                ..
            } => {
                let bits = format_partial_bits(*bitcount, *value, *order);
                match cause {
                    Truncation::FrameEnd => write!(f, "{role} {bits}"),
                    Truncation::End => write!(f, "{role} {bits} (end)"),
                }
            }
        }
    }
}

/// Render an unfinished byte as eight characters, `x` for bits never seen.
///
/// `value` holds `bitcount` bits, the first received most significant.
/// MSB-first puts the received bits on the left; LSB-first lists the padding
/// first, followed by the received bits from the newest down.
pub fn format_partial_bits(bitcount: u8, value: u8, order: BitOrder) -> String {
    let bitcount = bitcount.min(8);
    let padding = "x".repeat(usize::from(8 - bitcount));
    let newest_first: String = (0..bitcount)
        .map(|i| if (value >> i) & 1 == 1 { '1' } else { '0' })
        .collect();
    match order {
        BitOrder::MsbFirst => newest_first.chars().rev().collect::<String>() + &padding,
        BitOrder::LsbFirst => padding + &newest_first,
    }
}
