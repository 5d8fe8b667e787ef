/// Number of channels carried by one sample word.
pub const CHANNEL_COUNT: u8 = 32;

/// Channels per channel group. Each bit of a channel mask disables one group.
pub const GROUP_WIDTH: u8 = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SampleBufferError {
    #[error("Delay count {delay_count} exceeds read count {read_count}")]
    DelayExceedsReadCount { delay_count: u32, read_count: u32 },

    #[error("Channel {0} out of range (0..=31)")]
    ChannelOutOfRange(u8),

    #[error("Channel mask 0x{0:x} out of range (4 bits)")]
    ChannelMaskOutOfRange(u8),
}

/// A complete, immutable capture.
///
/// Bit `n` of `samples[i]` is the level of channel `n` at sample tick `i`.
/// Index 0 is the oldest sample; the trigger fired `delay_count` samples
/// before the end of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    frequency: u64,
    delay_count: u32,
    channel_mask: u8,
    samples: Vec<u32>,
}

impl SampleBuffer {
    pub fn new(
        frequency: u64,
        delay_count: u32,
        channel_mask: u8,
        samples: Vec<u32>,
    ) -> Result<Self, SampleBufferError> {
        let read_count = samples.len() as u32;
        if delay_count > read_count {
            return Err(SampleBufferError::DelayExceedsReadCount {
                delay_count,
                read_count,
            });
        }
        if channel_mask > 0x0F {
            return Err(SampleBufferError::ChannelMaskOutOfRange(channel_mask));
        }

        Ok(Self {
            frequency,
            delay_count,
            channel_mask,
            samples,
        })
    }

    /// Sample frequency in Hz
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn read_count(&self) -> u32 {
        self.samples.len() as u32
    }

    /// Samples captured after the trigger fired
    pub fn delay_count(&self) -> u32 {
        self.delay_count
    }

    pub fn channel_mask(&self) -> u8 {
        self.channel_mask
    }

    pub fn samples(&self) -> &[u32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Project one channel into a boolean sequence of `read_count` levels.
    pub fn channel(&self, channel: u8) -> Result<Vec<bool>, SampleBufferError> {
        check_channel(channel)?;
        Ok(self
            .samples
            .iter()
            .map(|word| (word >> channel) & 1 == 1)
            .collect())
    }

    /// Level of `channel` at sample `index`. Out-of-range indices read low.
    pub fn level(&self, index: usize, channel: u8) -> bool {
        self.samples
            .get(index)
            .is_some_and(|word| (word >> (channel & 31)) & 1 == 1)
    }

    /// Channels not disabled by the channel mask, in ascending order.
    pub fn channel_set(&self) -> impl Iterator<Item = u8> + '_ {
        (0..CHANNEL_COUNT).filter(move |channel| self.channel_mask & (1 << (channel / GROUP_WIDTH)) == 0)
    }

    /// Time of `sample` relative to the trigger, in seconds.
    pub fn sample_time(&self, sample: usize) -> f64 {
        let offset = sample as f64 - f64::from(self.read_count()) + f64::from(self.delay_count);
        if self.frequency == 0 {
            return 0.0;
        }
        offset / self.frequency as f64
    }
}

pub(crate) fn check_channel(channel: u8) -> Result<(), SampleBufferError> {
    if channel >= CHANNEL_COUNT {
        return Err(SampleBufferError::ChannelOutOfRange(channel));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_projection() {
        let buffer = SampleBuffer::new(1_000, 0, 0, vec![0b01, 0b10, 0b11, 0]).unwrap();
        assert_eq!(buffer.channel(0).unwrap(), vec![true, false, true, false]);
        assert_eq!(buffer.channel(1).unwrap(), vec![false, true, true, false]);
        assert_eq!(
            buffer.channel(32),
            Err(SampleBufferError::ChannelOutOfRange(32))
        );
    }

    #[test]
    fn test_delay_must_not_exceed_read_count() {
        assert_eq!(
            SampleBuffer::new(1_000, 5, 0, vec![0; 4]),
            Err(SampleBufferError::DelayExceedsReadCount {
                delay_count: 5,
                read_count: 4
            })
        );
    }

    #[test]
    fn test_channel_set_skips_disabled_groups() {
        let buffer = SampleBuffer::new(1_000, 0, 0b1010, vec![]).unwrap();
        let channels: Vec<u8> = buffer.channel_set().collect();
        assert_eq!(channels.len(), 16);
        assert_eq!(channels[..8], [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(channels[8..], [16, 17, 18, 19, 20, 21, 22, 23]);
    }

    #[test]
    fn test_sample_time_is_relative_to_trigger() {
        let buffer = SampleBuffer::new(1_000_000, 2, 0, vec![0; 10]).unwrap();
        // trigger sits at index 8
        assert!((buffer.sample_time(8)).abs() < 1e-12);
        assert!((buffer.sample_time(9) - 1e-6).abs() < 1e-12);
        assert!((buffer.sample_time(0) + 8e-6).abs() < 1e-12);
    }

    #[test]
    fn test_level_out_of_range_reads_low() {
        let buffer = SampleBuffer::new(1_000, 0, 0, vec![u32::MAX]).unwrap();
        assert!(buffer.level(0, 31));
        assert!(!buffer.level(1, 0));
    }
}
