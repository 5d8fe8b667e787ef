use crate::decoders::{
    check_channels, BitOrder, ChannelRole, DecodeError, DecodedEvent, Direction, Truncation,
};
use crate::sample_buffer::SampleBuffer;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cConfig {
    pub sda: u8,
    pub scl: u8,
}

impl I2cConfig {
    pub fn new(sda: u8, scl: u8) -> Self {
        Self { sda, scl }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        check_channels(&[self.sda, self.scl])?;
        if self.sda == self.scl {
            return Err(DecodeError::InvalidConfig(
                "SDA and SCL must be different channels".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between bytes, waiting for the first data bit
    Idle,
    Byte { bits: u8, value: u8 },
    /// Eight bits received, the ninth clock carries ACK/NAK
    AwaitingAck { value: u8 },
}

struct I2cDecoder {
    state: State,
    /// Bytes completed since the last START
    byte_count: usize,
    /// SCL rose and shifted a bit, and has not fallen since
    clock_high: bool,
    events: Vec<DecodedEvent>,
}

impl I2cDecoder {
    fn new() -> Self {
        Self {
            state: State::Idle,
            byte_count: 0,
            clock_high: false,
            events: Vec::new(),
        }
    }

    fn start(&mut self, sample: usize) {
        trace!(sample, "I2C START");
        self.events.push(DecodedEvent::FrameStart { sample });
        self.state = State::Idle;
        self.byte_count = 0;
    }

    fn stop(&mut self, sample: usize) {
        trace!(sample, "I2C STOP");
        // the clock pulse that sets up a STOP shifts a bit belonging to no byte
        if self.clock_high {
            match self.state {
                State::Byte { bits, value } => {
                    self.state = if bits > 1 {
                        State::Byte {
                            bits: bits - 1,
                            value: value >> 1,
                        }
                    } else {
                        State::Idle
                    };
                }
                // that bit completed a byte: take the byte back as seven bits
                State::AwaitingAck { value } => {
                    if matches!(self.events.last(), Some(DecodedEvent::DataByte { .. })) {
                        self.events.pop();
                        self.byte_count = self.byte_count.saturating_sub(1);
                    }
                    self.state = State::Byte {
                        bits: 7,
                        value: value >> 1,
                    };
                }
                State::Idle => {}
            }
        }
        self.flush(sample, Truncation::FrameEnd);
        self.events.push(DecodedEvent::FrameEnd { sample });
        self.state = State::Idle;
        self.byte_count = 0;
    }

    /// Report an unfinished byte.
    fn flush(&mut self, sample: usize, cause: Truncation) {
        if let State::Byte { bits, value } = self.state {
            self.events.push(DecodedEvent::PartialByte {
                sample,
                bitcount: bits,
                value,
                role: ChannelRole::Data,
                cause,
                order: BitOrder::MsbFirst,
            });
        }
    }

    fn clock_bit(&mut self, sample: usize, sda: bool) {
        self.clock_high = true;
        let bit = u8::from(sda);
        self.state = match self.state {
            State::Idle => State::Byte {
                bits: 1,
                value: bit,
            },
            State::Byte { bits: 7, value } => {
                let byte = (value << 1) | bit;
                self.complete_byte(sample, byte);
                State::AwaitingAck { value: byte }
            }
            State::Byte { bits, value } => State::Byte {
                bits: bits + 1,
                value: (value << 1) | bit,
            },
            State::AwaitingAck { .. } => {
                self.events.push(if sda {
                    DecodedEvent::Nak { sample }
                } else {
                    DecodedEvent::Ack { sample }
                });
                State::Idle
            }
        };
    }

    fn complete_byte(&mut self, sample: usize, value: u8) {
        let event = if self.byte_count == 0 {
            let direction = if value & 1 == 1 {
                Direction::Read
            } else {
                Direction::Write
            };
            DecodedEvent::DataByte {
                sample,
                role: ChannelRole::Address(direction),
                value: value >> 1,
                length_bits: 7,
            }
        } else {
            DecodedEvent::DataByte {
                sample,
                role: ChannelRole::Data,
                value,
                length_bits: 8,
            }
        };
        self.events.push(event);
        self.byte_count += 1;
    }
}

/// Decode I2C traffic on `config.sda` / `config.scl`.
///
/// START and STOP are recognised in any state. A simultaneous change of both
/// lines that is neither is reported as a glitch.
pub fn decode_i2c(
    buffer: &SampleBuffer,
    config: &I2cConfig,
) -> Result<Vec<DecodedEvent>, DecodeError> {
    crate::profile_scope!("decode_i2c");
    config.validate()?;

    let level = |word: u32, channel: u8| (word >> channel) & 1 == 1;
    let mut decoder = I2cDecoder::new();
    let mut glitches = 0usize;
    let samples = buffer.samples();

    for (index, pair) in samples.windows(2).enumerate() {
        let sample = index + 1;
        let (old_scl, scl) = (level(pair[0], config.scl), level(pair[1], config.scl));
        let (old_sda, sda) = (level(pair[0], config.sda), level(pair[1], config.sda));

        if old_scl == scl && old_sda == sda {
            continue;
        }

        match (old_scl, scl, old_sda, sda) {
            (true, true, true, false) => decoder.start(sample),
            (true, true, false, true) => decoder.stop(sample),
            // SDA may change freely while the clock is low
            (false, false, _, _) => {}
            (false, true, _, _) if old_sda == sda => decoder.clock_bit(sample, sda),
            (true, false, _, _) if old_sda == sda => decoder.clock_high = false,
            _ => {
                trace!(sample, "I2C glitch");
                decoder.events.push(DecodedEvent::Glitch { sample });
                glitches += 1;
            }
        }
    }

    decoder.flush(samples.len().saturating_sub(1), Truncation::End);

    debug!(
        events = decoder.events.len(),
        glitches, "I2C decode finished"
    );
    Ok(decoder.events)
}
