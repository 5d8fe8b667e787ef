//! Asynchronous serial decoding.
//!
//! A character is a low start bit, 5 to 8 data bits sent LSB first, an
//! optional parity bit and one or two high stop bits. Timing comes from the
//! configured baud rate, or from [`auto_baud`] when none is given; the frame
//! format likewise falls back to [`auto_format`].

use crate::decoders::uart_detect::{auto_baud, auto_format, BaudEstimate, STANDARD_BAUD_RATES};
use crate::decoders::{check_channels, ChannelRole, DecodeError, DecodedEvent};
use crate::sample_buffer::SampleBuffer;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl Parity {
    /// Parity bit a transmitter sends with the low `data_bits` of `value`.
    pub fn bit(&self, value: u8, data_bits: u8) -> Option<bool> {
        let odd_ones = (value & data_mask(data_bits)).count_ones() % 2 == 1;
        match self {
            Parity::None => None,
            Parity::Even => Some(odd_ones),
            Parity::Odd => Some(!odd_ones),
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

fn data_mask(data_bits: u8) -> u8 {
    if data_bits >= 8 {
        0xFF
    } else {
        (1 << data_bits) - 1
    }
}

/// Character framing, written the usual way as e.g. `8N1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl FrameFormat {
    pub fn new(data_bits: u8, parity: Parity, stop_bits: u8) -> Self {
        Self {
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// Bits per character including start, parity and stop bits.
    pub fn frame_bits(&self) -> usize {
        1 + usize::from(self.data_bits)
            + usize::from(self.parity != Parity::None)
            + usize::from(self.stop_bits)
    }

    /// Bit index of the parity bit within the frame.
    pub(crate) fn parity_index(&self) -> Option<usize> {
        (self.parity != Parity::None).then_some(1 + usize::from(self.data_bits))
    }

    pub(crate) fn first_stop_index(&self) -> usize {
        self.frame_bits() - usize::from(self.stop_bits)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(5..=8).contains(&self.data_bits) {
            return Err(DecodeError::InvalidConfig(format!(
                "{} data bits out of range (5..=8)",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(DecodeError::InvalidConfig(format!(
                "{} stop bits out of range (1..=2)",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(8, Parity::None, 1)
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    pub channel: u8,
    /// `None` detects the baud rate from the signal
    pub baud: Option<u32>,
    /// `None` detects the frame format from the signal
    pub format: Option<FrameFormat>,
}

impl UartConfig {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            baud: None,
            format: None,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        check_channels(&[self.channel])?;
        if let Some(baud) = self.baud {
            if !STANDARD_BAUD_RATES.contains(&baud) {
                return Err(DecodeError::InvalidConfig(format!(
                    "Baud rate {baud} is not a standard rate"
                )));
            }
        }
        if let Some(format) = self.format {
            format.validate()?;
        }
        Ok(())
    }
}

/// Result of a UART decode: the events plus the timing and framing used.
#[derive(Debug, Clone, PartialEq)]
pub struct UartDecode {
    pub events: Vec<DecodedEvent>,
    /// Measured timing when the baud rate was detected
    pub baud_estimate: Option<BaudEstimate>,
    pub baud: u32,
    pub samples_per_bit: f64,
    pub format: FrameFormat,
}

impl UartDecode {
    /// The decoded characters, in order.
    pub fn bytes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DecodedEvent::DataByte { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.bytes().into_iter().map(display_char).collect()
    }
}

/// How a received character should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Printable(char),
    /// Control character, shown as its Unicode control picture
    Control(char),
    NonAscii(u8),
}

pub fn classify_char(value: u8) -> CharClass {
    match value {
        // U+2400 block, with DEL at U+2421
        0..=0x20 => CharClass::Control(char::from_u32(0x2400 + u32::from(value)).unwrap_or('?')),
        0x7F => CharClass::Control('\u{2421}'),
        0x21..=0x7E => CharClass::Printable(char::from(value)),
        _ => CharClass::NonAscii(value),
    }
}

fn display_char(value: u8) -> char {
    match classify_char(value) {
        CharClass::Printable(c) | CharClass::Control(c) => c,
        CharClass::NonAscii(_) => '\u{FFFD}',
    }
}

/// Sample offsets of one character frame relative to its start edge.
pub(crate) struct FrameLayout {
    format: FrameFormat,
    samples_per_bit: f64,
    margin: usize,
}

impl FrameLayout {
    pub(crate) fn new(format: FrameFormat, samples_per_bit: f64) -> Self {
        Self {
            format,
            samples_per_bit,
            margin: ((samples_per_bit / 8.0).round() as usize).max(1),
        }
    }

    /// Offset of the boundary before bit `index`.
    pub(crate) fn boundary(&self, index: usize) -> usize {
        (index as f64 * self.samples_per_bit).round() as usize
    }

    pub(crate) fn midpoint(&self, index: usize) -> usize {
        ((index as f64 + 0.5) * self.samples_per_bit).round() as usize
    }

    /// Samples a whole frame spans.
    pub(crate) fn width(&self) -> usize {
        self.boundary(self.format.frame_bits())
    }

    pub(crate) fn margin(&self) -> usize {
        self.margin
    }

    /// Bit window `index` shrunk by the margin at both ends; the start bit
    /// keeps its leading edge.
    pub(crate) fn inner_window(&self, index: usize) -> std::ops::Range<usize> {
        let start = if index == 0 {
            0
        } else {
            self.boundary(index) + self.margin
        };
        let end = self.boundary(index + 1).saturating_sub(self.margin);
        start..end.max(start)
    }

    /// Data value sampled at the bit midpoints, LSB first.
    pub(crate) fn sample_data(&self, line: &[bool], at: usize) -> u8 {
        (0..usize::from(self.format.data_bits)).fold(0u8, |value, i| {
            let bit = line.get(at + self.midpoint(1 + i)).copied().unwrap_or(false);
            value | (u8::from(bit) << i)
        })
    }

    /// Check the start and stop windows of a character starting at `at`.
    fn framed_at(&self, line: &[bool], at: usize) -> bool {
        let low = |range: std::ops::Range<usize>| line[at + range.start..at + range.end].iter().all(|b| !b);
        let high = |range: std::ops::Range<usize>| line[at + range.start..at + range.end].iter().all(|b| *b);

        low(self.inner_window(0))
            && (self.format.first_stop_index()..self.format.frame_bits())
                .all(|index| high(self.inner_window(index)))
    }
}

/// Decode characters with fixed timing and framing.
///
/// The scan steps one sample at a time until a position with a clean start
/// bit and clean stop bits is found, then takes the whole character and
/// continues after its stop bits. A character cut off by the end of the
/// buffer is not reported. A bit time that rounds to an empty frame gives no
/// characters.
pub fn decode_characters(
    line: &[bool],
    samples_per_bit: f64,
    format: FrameFormat,
) -> Vec<DecodedEvent> {
    let layout = FrameLayout::new(format, samples_per_bit);
    let width = layout.width();
    let mut events = Vec::new();
    if !samples_per_bit.is_finite() || width == 0 {
        return events;
    }
    let mut position = 0;

    while line.len() - position >= width {
        if line[position] || !layout.framed_at(line, position) {
            position += 1;
            continue;
        }

        let value = layout.sample_data(line, position);
        events.push(DecodedEvent::DataByte {
            sample: position,
            role: ChannelRole::Rx,
            value,
            length_bits: format.data_bits,
        });

        if let Some(index) = format.parity_index() {
            let midpoint = position + layout.midpoint(index);
            let received = line.get(midpoint).copied().unwrap_or(false);
            if format.parity.bit(value, format.data_bits) != Some(received) {
                events.push(DecodedEvent::ParityError {
                    sample: midpoint,
                    value,
                });
            }
        }

        position += width.saturating_sub(layout.margin()).max(1);
    }

    events
}

/// Decode a UART line, detecting baud rate and frame format where the
/// configuration leaves them open.
pub fn decode_uart(buffer: &SampleBuffer, config: &UartConfig) -> Result<UartDecode, DecodeError> {
    crate::profile_scope!("decode_uart");
    config.validate()?;

    let (baud, samples_per_bit, baud_estimate) = match config.baud {
        Some(baud) => (baud, buffer.frequency() as f64 / f64::from(baud), None),
        None => {
            let estimate = auto_baud(buffer, config.channel)?;
            (estimate.standard, estimate.samples_per_bit, Some(estimate))
        }
    };
    if samples_per_bit < 2.0 {
        return Err(DecodeError::InvalidConfig(format!(
            "{} Hz sampling is too slow for {baud} baud",
            buffer.frequency()
        )));
    }

    let format = match config.format {
        Some(format) => format,
        None => auto_format(buffer, config.channel, samples_per_bit)?.format,
    };

    let line = buffer.channel(config.channel)?;
    let events = decode_characters(&line, samples_per_bit, format);

    debug!(
        baud,
        samples_per_bit,
        format = %format,
        characters = events.len(),
        "UART decode finished"
    );

    Ok(UartDecode {
        events,
        baud_estimate,
        baud,
        samples_per_bit,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::synth::uart_trace;

    const RX: u8 = 5;

    #[test]
    fn test_round_trip_9600_8n1() {
        let message = b"Hello, SUMP!\r\n\x00\xff";
        let format = FrameFormat::default();
        let trace = uart_trace(RX, message, format, 1_000_000.0 / 9600.0, 3, 1);
        let config = UartConfig::new(RX).with_baud(9600).with_format(format);

        let decoded = decode_uart(&trace.buffer(1_000_000), &config).unwrap();
        assert_eq!(decoded.bytes(), message.to_vec());
        assert_eq!(decoded.baud, 9600);
        assert!(decoded.baud_estimate.is_none());
        assert!(decoded
            .events
            .windows(2)
            .all(|w| w[0].sample() <= w[1].sample()));
    }

    #[test]
    fn test_back_to_back_characters() {
        let message = [0x00, 0x01, 0x80, 0xFF, 0x55];
        let format = FrameFormat::default();
        let trace = uart_trace(RX, &message, format, 1_000_000.0 / 115_200.0, 2, 0);
        let config = UartConfig::new(RX).with_baud(115_200).with_format(format);

        let decoded = decode_uart(&trace.buffer(1_000_000), &config).unwrap();
        assert_eq!(decoded.bytes(), message.to_vec());
    }

    #[test]
    fn test_parity_errors_are_reported() {
        let format = FrameFormat::new(7, Parity::Even, 1);
        let samples_per_bit = 1_000_000.0 / 9600.0;
        let good = uart_trace(RX, b"AB", format, samples_per_bit, 3, 2);
        let config = UartConfig::new(RX).with_baud(9600).with_format(format);

        let decoded = decode_uart(&good.buffer(1_000_000), &config).unwrap();
        assert_eq!(decoded.bytes(), b"AB".to_vec());
        assert!(!decoded
            .events
            .iter()
            .any(|e| matches!(e, DecodedEvent::ParityError { .. })));

        // the same line read as odd parity flags every character
        let config = config.with_format(FrameFormat::new(7, Parity::Odd, 1));
        let decoded = decode_uart(&good.buffer(1_000_000), &config).unwrap();
        let errors: Vec<&DecodedEvent> = decoded
            .events
            .iter()
            .filter(|e| matches!(e, DecodedEvent::ParityError { .. }))
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].value(), Some(b'A'));
    }

    #[test]
    fn test_trailing_fragment_is_dropped() {
        let format = FrameFormat::default();
        let samples_per_bit = 100.0;
        let trace = uart_trace(RX, b"OK", format, samples_per_bit, 2, 1);
        let buffer = trace.buffer(960_000);
        // cut the second character short
        let cut = SampleBuffer::new(
            buffer.frequency(),
            0,
            0,
            buffer.samples()[..buffer.len() - 700].to_vec(),
        )
        .unwrap();
        let decoded = decode_characters(&cut.channel(RX).unwrap(), samples_per_bit, format);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].value(), Some(b'O'));
    }

    #[test]
    fn test_degenerate_lines() {
        let format = FrameFormat::default();
        assert!(decode_characters(&[], 10.0, format).is_empty());
        assert!(decode_characters(&[true; 500], 10.0, format).is_empty());
        assert!(decode_characters(&[false; 500], 10.0, format).is_empty());
    }

    #[test]
    fn test_empty_frame_timing() {
        let format = FrameFormat::default();
        for samples_per_bit in [0.0, 0.01, -4.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(
                decode_characters(&[false; 64], samples_per_bit, format).is_empty(),
                "{samples_per_bit}"
            );
            assert!(decode_characters(&[true; 4], samples_per_bit, format).is_empty());
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(UartConfig::new(RX).with_baud(12_345).validate().is_err());
        assert!(UartConfig::new(32).validate().is_err());
        assert!(UartConfig::new(RX)
            .with_format(FrameFormat::new(9, Parity::None, 1))
            .validate()
            .is_err());
        assert!(UartConfig::new(RX)
            .with_baud(9600)
            .with_format(FrameFormat::new(5, Parity::Odd, 2))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_sampling_too_slow() {
        let buffer = SampleBuffer::new(10_000, 0, 0, vec![0; 100]).unwrap();
        let config = UartConfig::new(0)
            .with_baud(9600)
            .with_format(FrameFormat::default());
        assert!(matches!(
            decode_uart(&buffer, &config),
            Err(DecodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_character_classes() {
        assert_eq!(classify_char(b'A'), CharClass::Printable('A'));
        assert_eq!(classify_char(0x0D), CharClass::Control('\u{240D}'));
        assert_eq!(classify_char(b' '), CharClass::Control('\u{2420}'));
        assert_eq!(classify_char(0x7F), CharClass::Control('\u{2421}'));
        assert_eq!(classify_char(0xC3), CharClass::NonAscii(0xC3));
    }

    #[test]
    fn test_format_display() {
        assert_eq!(FrameFormat::default().to_string(), "8N1");
        assert_eq!(FrameFormat::new(7, Parity::Even, 2).to_string(), "7E2");
        assert_eq!(FrameFormat::new(7, Parity::Even, 2).frame_bits(), 11);
        assert_eq!(Parity::Odd.bit(0b0000_0011, 8), Some(true));
        assert_eq!(Parity::Even.bit(0b1000_0001, 7), Some(true));
    }
}
