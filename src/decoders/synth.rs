//! Synthetic traces for decoder tests.

use crate::decoders::uart::FrameFormat;
use crate::sample_buffer::SampleBuffer;

/// Builds a sample array one level change at a time.
pub(crate) struct Trace {
    samples: Vec<u32>,
    word: u32,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self {
            samples: Vec::new(),
            word: 0,
        }
    }

    /// Start with `channels` high and everything else low.
    pub(crate) fn idle_high(channels: &[u8]) -> Self {
        let mut trace = Self::new();
        for &channel in channels {
            trace.set(channel, true);
        }
        trace
    }

    pub(crate) fn set(&mut self, channel: u8, high: bool) -> &mut Self {
        if high {
            self.word |= 1 << channel;
        } else {
            self.word &= !(1 << channel);
        }
        self
    }

    /// Append `count` samples at the current levels.
    pub(crate) fn hold(&mut self, count: usize) -> &mut Self {
        self.samples
            .extend(std::iter::repeat(self.word).take(count));
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn buffer(&self, frequency: u64) -> SampleBuffer {
        let delay = self.samples.len() as u32 / 2;
        SampleBuffer::new(frequency, delay, 0, self.samples.clone()).unwrap()
    }
}

/// Line levels of one UART character, start bit first.
pub(crate) fn uart_bits(value: u8, format: FrameFormat) -> Vec<bool> {
    let mut bits = vec![false];
    bits.extend((0..format.data_bits).map(|i| (value >> i) & 1 == 1));
    if let Some(parity) = format.parity.bit(value, format.data_bits) {
        bits.push(parity);
    }
    bits.extend(std::iter::repeat(true).take(usize::from(format.stop_bits)));
    bits
}

/// A UART line on `channel` carrying `bytes`.
///
/// Bit boundaries sit on a free-running fractional clock, the way a real
/// transmitter's timing lands on the sampling grid. `gap_bits` of idle line
/// separate characters; the line idles high for `idle_bits` at either end.
pub(crate) fn uart_trace(
    channel: u8,
    bytes: &[u8],
    format: FrameFormat,
    samples_per_bit: f64,
    idle_bits: usize,
    gap_bits: usize,
) -> Trace {
    let mut levels = vec![true; idle_bits];
    for &byte in bytes {
        levels.extend(uart_bits(byte, format));
        levels.extend(std::iter::repeat(true).take(gap_bits));
    }
    levels.extend(std::iter::repeat(true).take(idle_bits));

    let mut trace = Trace::new();
    for (index, level) in levels.into_iter().enumerate() {
        let end = ((index + 1) as f64 * samples_per_bit).round() as usize;
        trace.set(channel, level);
        trace.hold(end - trace.len());
    }
    trace
}
