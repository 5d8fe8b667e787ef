//! SPI decoding with an active-low chip select.
//!
//! The clock is normalised by its polarity so that the first edge of every
//! bit is the *leading* edge. Phase 0 samples MISO on the leading edge and
//! takes MOSI on the trailing (setup) edge; phase 1 swaps the two. With
//! [`LatchEdges::SamplingEdge`] both lines are taken on the sampling edge.

use crate::decoders::{check_channels, BitOrder, ChannelRole, DecodeError, DecodedEvent, Truncation};
use crate::sample_buffer::SampleBuffer;
use tracing::{debug, trace};

/// SPI clock polarity and phase modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: clock idles low, data sampled on the rising edge
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1: clock idles low, data sampled on the falling edge
    Mode1,
    /// CPOL=1, CPHA=0: clock idles high, data sampled on the falling edge
    Mode2,
    /// CPOL=1, CPHA=1: clock idles high, data sampled on the rising edge
    Mode3,
}

impl SpiMode {
    pub fn polarity(&self) -> bool {
        matches!(self, SpiMode::Mode2 | SpiMode::Mode3)
    }

    pub fn phase(&self) -> bool {
        matches!(self, SpiMode::Mode1 | SpiMode::Mode3)
    }
}

impl TryFrom<u8> for SpiMode {
    type Error = DecodeError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            0 => Ok(SpiMode::Mode0),
            1 => Ok(SpiMode::Mode1),
            2 => Ok(SpiMode::Mode2),
            3 => Ok(SpiMode::Mode3),
            other => Err(DecodeError::InvalidConfig(format!(
                "SPI mode {other} out of range (0..=3)"
            ))),
        }
    }
}

/// Which clock edges shift the two data lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatchEdges {
    /// MISO on the sampling edge, MOSI on the setup edge
    #[default]
    Split,
    /// MOSI and MISO both on the sampling edge
    SamplingEdge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiConfig {
    pub sck: u8,
    pub mosi: Option<u8>,
    pub miso: Option<u8>,
    /// Chip select, active low
    pub nss: u8,
    pub mode: SpiMode,
    pub bit_order: BitOrder,
    pub latch_edges: LatchEdges,
}

impl SpiConfig {
    pub fn new(sck: u8, nss: u8) -> Self {
        Self {
            sck,
            mosi: None,
            miso: None,
            nss,
            mode: SpiMode::Mode0,
            bit_order: BitOrder::MsbFirst,
            latch_edges: LatchEdges::Split,
        }
    }

    pub fn with_mosi(mut self, channel: u8) -> Self {
        self.mosi = Some(channel);
        self
    }

    pub fn with_miso(mut self, channel: u8) -> Self {
        self.miso = Some(channel);
        self
    }

    pub fn with_mode(mut self, mode: SpiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn lsb_first(mut self) -> Self {
        self.bit_order = BitOrder::LsbFirst;
        self
    }

    pub fn latch_both_on_sampling_edge(mut self) -> Self {
        self.latch_edges = LatchEdges::SamplingEdge;
        self
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        check_channels(&[self.sck, self.nss])?;
        check_channels(&self.mosi.into_iter().chain(self.miso).collect::<Vec<_>>())?;
        if self.mosi.is_none() && self.miso.is_none() {
            return Err(DecodeError::InvalidConfig(
                "SPI decoding needs a MOSI or a MISO channel".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self::new(0, 3).with_mosi(1).with_miso(2)
    }
}

/// Bits shifted in from one data line.
struct ShiftRegister {
    channel: u8,
    role: ChannelRole,
    value: u8,
    bits: u8,
}

impl ShiftRegister {
    fn new(channel: u8, role: ChannelRole) -> Self {
        Self {
            channel,
            role,
            value: 0,
            bits: 0,
        }
    }

    fn clear(&mut self) {
        self.value = 0;
        self.bits = 0;
    }

    /// Shift in the line level from `word`; returns the byte once eight bits
    /// have arrived.
    fn shift(&mut self, word: u32) -> Option<u8> {
        let bit = u8::from((word >> self.channel) & 1 == 1);
        self.value = (self.value << 1) | bit;
        self.bits += 1;
        if self.bits < 8 {
            return None;
        }
        let value = self.value;
        self.clear();
        Some(value)
    }

    fn flush(
        &mut self,
        sample: usize,
        cause: Truncation,
        order: BitOrder,
    ) -> Option<DecodedEvent> {
        if self.bits == 0 {
            return None;
        }
        let event = DecodedEvent::PartialByte {
            sample,
            bitcount: self.bits,
            value: self.value,
            role: self.role,
            cause,
            order,
        };
        self.clear();
        Some(event)
    }
}

pub fn decode_spi(
    buffer: &SampleBuffer,
    config: &SpiConfig,
) -> Result<Vec<DecodedEvent>, DecodeError> {
    crate::profile_scope!("decode_spi");
    config.validate()?;

    let polarity = config.mode.polarity();
    let phase = config.mode.phase();
    let level = |word: u32, channel: u8| (word >> channel) & 1 == 1;

    let mut registers: Vec<ShiftRegister> = config
        .mosi
        .map(|channel| ShiftRegister::new(channel, ChannelRole::Mosi))
        .into_iter()
        .chain(
            config
                .miso
                .map(|channel| ShiftRegister::new(channel, ChannelRole::Miso)),
        )
        .collect();

    let mut events = Vec::new();
    let mut frames = 0usize;
    let samples = buffer.samples();

    for (index, pair) in samples.windows(2).enumerate() {
        let sample = index + 1;
        let (old, new) = (pair[0], pair[1]);
        let old_nss = level(old, config.nss);
        let nss = level(new, config.nss);

        if old_nss && !nss {
            trace!(sample, "SPI chip select asserted");
            events.push(DecodedEvent::FrameStart { sample });
            registers.iter_mut().for_each(ShiftRegister::clear);
            frames += 1;
        } else if !old_nss && nss {
            trace!(sample, "SPI chip select released");
            events.extend(
                registers
                    .iter_mut()
                    .filter_map(|register| {
                        register.flush(sample, Truncation::FrameEnd, config.bit_order)
                    }),
            );
            events.push(DecodedEvent::FrameEnd { sample });
        }

        if nss {
            continue;
        }

        let old_clock = level(old, config.sck) ^ polarity;
        let clock = level(new, config.sck) ^ polarity;
        let sampling_edge = match (old_clock, clock) {
            (false, true) => !phase,
            (true, false) => phase,
            _ => continue,
        };

        for register in &mut registers {
            let takes_edge = match (register.role, config.latch_edges) {
                (ChannelRole::Mosi, LatchEdges::Split) => !sampling_edge,
                _ => sampling_edge,
            };
            if !takes_edge {
                continue;
            }
            if let Some(value) = register.shift(new) {
                let value = match config.bit_order {
                    BitOrder::MsbFirst => value,
                    BitOrder::LsbFirst => value.reverse_bits(),
                };
                events.push(DecodedEvent::DataByte {
                    sample,
                    role: register.role,
                    value,
                    length_bits: 8,
                });
            }
        }
    }

    let last = samples.len().saturating_sub(1);
    events.extend(
        registers
            .iter_mut()
            .filter_map(|register| register.flush(last, Truncation::End, config.bit_order)),
    );

    debug!(frames, events = events.len(), "SPI decode finished");
    Ok(events)
}
