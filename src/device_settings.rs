use std::fmt;
use std::str::FromStr;

/// Undivided sampling clock of the SUMP hardware, in Hz.
pub const BASE_CLOCK_HZ: u32 = 100_000_000;

/// Number of trigger stages.
pub const STAGE_COUNT: usize = 4;

/// Largest trigger delay the 16-bit delay field can carry.
pub const MAX_TRIGGER_DELAY: u32 = 65_535;

/// Largest divider the 24-bit divider field can carry (`divider - 1` is sent).
pub const MAX_DIVIDER: u32 = 1 << 24;

/// Largest read count the 16-bit, four-sample read field can carry.
pub const MAX_READ_COUNT: u32 = 65_535 * 4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("Divider {0} out of range (1..=16777216)")]
    DividerOutOfRange(u32),

    #[error("Read count {0} out of range (4..=262140)")]
    ReadCountOutOfRange(u32),

    #[error("Delay count {delay_count} exceeds read count {read_count}")]
    DelayCountExceedsReadCount { delay_count: u32, read_count: u32 },

    #[error("Channel groups 0x{0:x} out of range (4 bits)")]
    ChannelGroupsOutOfRange(u8),

    #[error("Trigger stage {0} out of range (0..=3)")]
    StageOutOfRange(usize),

    #[error("Trigger channel {channel} of stage {stage} out of range (0..=31)")]
    TriggerChannelOutOfRange { stage: usize, channel: u8 },

    #[error("Arm level {level} of stage {stage} out of range (0..=3)")]
    ArmLevelOutOfRange { stage: usize, level: u8 },

    #[error("Trigger delay of stage {stage} is {samples} samples; at this sample rate it can't exceed {max_seconds:e} s")]
    TriggerDelayTooLarge {
        stage: usize,
        samples: u32,
        max_seconds: f64,
    },

    #[error("Complex trigger has no active stage armed at level 0")]
    NoEntryStage,

    #[error("Complex trigger has {0} active stages armed at level 0, expected exactly one")]
    AmbiguousEntryStage(usize),

    #[error("Invalid trigger mode {0}")]
    InvalidTriggerMode(u8),

    #[error("Unknown trigger mode '{0}' (expected None, Simple or Complex)")]
    UnknownTriggerMode(String),
}

/// How the trigger stages are programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerEnable {
    /// Capture starts immediately
    #[default]
    None,
    /// Capture starts on a single match of stage 0
    Simple,
    /// All four stages are programmed as configured
    Complex,
}

impl TriggerEnable {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEnable::None => "None",
            TriggerEnable::Simple => "Simple",
            TriggerEnable::Complex => "Complex",
        }
    }
}

impl TryFrom<u8> for TriggerEnable {
    type Error = SettingsError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(TriggerEnable::None),
            1 => Ok(TriggerEnable::Simple),
            2 => Ok(TriggerEnable::Complex),
            other => Err(SettingsError::InvalidTriggerMode(other)),
        }
    }
}

impl FromStr for TriggerEnable {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(TriggerEnable::None),
            "Simple" => Ok(TriggerEnable::Simple),
            "Complex" => Ok(TriggerEnable::Complex),
            other => Err(SettingsError::UnknownTriggerMode(other.to_string())),
        }
    }
}

impl fmt::Display for TriggerEnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit in which a trigger delay is shown to the user. The device always
/// receives samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayUnit {
    #[default]
    Samples,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl DelayUnit {
    /// Units per second, `None` for samples.
    pub fn per_second(&self) -> Option<f64> {
        match self {
            DelayUnit::Samples => None,
            DelayUnit::Seconds => Some(1.0),
            DelayUnit::Milliseconds => Some(1e3),
            DelayUnit::Microseconds => Some(1e6),
            DelayUnit::Nanoseconds => Some(1e9),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Samples => "samples",
            DelayUnit::Seconds => "s",
            DelayUnit::Milliseconds => "ms",
            DelayUnit::Microseconds => "µs",
            DelayUnit::Nanoseconds => "ns",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitState {
    High,
    Low,
    DontCare,
}

/// Parallel stages compare all masked channels at once; serial stages shift
/// one channel through the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    #[default]
    Parallel,
    Serial,
}

/// What a stage does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerAction {
    Capture,
    #[default]
    NextLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerStage {
    pub mask: u32,
    pub values: u32,
    /// Delay between firing and the action, in samples
    pub delay: u32,
    pub delay_unit: DelayUnit,
    pub arm_level: u8,
    pub channel: u8,
    pub mode: TriggerMode,
    pub action: TriggerAction,
}

impl TriggerStage {
    pub fn new() -> Self {
        Self {
            mask: 0,
            values: 0,
            delay: 0,
            delay_unit: DelayUnit::Samples,
            arm_level: 0,
            channel: 0,
            mode: TriggerMode::Parallel,
            action: TriggerAction::NextLevel,
        }
    }

    /// Match `channel` against `state`; `DontCare` removes it from the mask.
    pub fn set_channel(mut self, channel: u8, state: BitState) -> Self {
        let bit = 1u32 << (channel & 31);
        match state {
            BitState::High => {
                self.mask |= bit;
                self.values |= bit;
            }
            BitState::Low => {
                self.mask |= bit;
                self.values &= !bit;
            }
            BitState::DontCare => {
                self.mask &= !bit;
                self.values &= !bit;
            }
        }
        self
    }

    pub fn armed_at(mut self, level: u8) -> Self {
        self.arm_level = level;
        self
    }

    pub fn serial_on(mut self, channel: u8) -> Self {
        self.mode = TriggerMode::Serial;
        self.channel = channel;
        self
    }

    pub fn delayed_by(mut self, samples: u32) -> Self {
        self.delay = samples;
        self.delay_unit = DelayUnit::Samples;
        self
    }

    pub fn then_capture(mut self) -> Self {
        self.action = TriggerAction::Capture;
        self
    }

    pub fn then_next_level(mut self) -> Self {
        self.action = TriggerAction::NextLevel;
        self
    }

    /// Set the delay from a value expressed in `unit` at `sample_rate` Hz.
    pub fn set_delay_in(&mut self, value: f64, unit: DelayUnit, sample_rate: u32) {
        let samples = match unit.per_second() {
            None => value,
            Some(per_second) => value * f64::from(sample_rate) / per_second,
        };
        self.delay = samples.max(0.0) as u32;
        self.delay_unit = unit;
    }

    /// The delay expressed in `unit` at `sample_rate` Hz.
    pub fn delay_in(&self, unit: DelayUnit, sample_rate: u32) -> f64 {
        match unit.per_second() {
            None => f64::from(self.delay),
            Some(per_second) => f64::from(self.delay) * per_second / f64::from(sample_rate),
        }
    }

    fn validate(&self, stage: usize, sample_rate: u32) -> Result<(), SettingsError> {
        if self.channel > 31 {
            return Err(SettingsError::TriggerChannelOutOfRange {
                stage,
                channel: self.channel,
            });
        }
        if self.arm_level > 3 {
            return Err(SettingsError::ArmLevelOutOfRange {
                stage,
                level: self.arm_level,
            });
        }
        if self.delay > MAX_TRIGGER_DELAY {
            return Err(SettingsError::TriggerDelayTooLarge {
                stage,
                samples: self.delay,
                max_seconds: f64::from(MAX_TRIGGER_DELAY) / f64::from(sample_rate.max(1)),
            });
        }
        Ok(())
    }
}

impl Default for TriggerStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampling and trigger parameters for one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub divider: u32,
    pub read_count: u32,
    pub delay_count: u32,
    pub external_clock: bool,
    pub clock_inverted: bool,
    pub noise_filter: bool,
    pub demux: bool,
    /// Each set bit disables one group of eight channels
    pub channel_groups: u8,
    pub trigger_enable: TriggerEnable,
    pub stages: [TriggerStage; STAGE_COUNT],
}

impl DeviceSettings {
    pub fn new() -> Self {
        let mut stages: [TriggerStage; STAGE_COUNT] = Default::default();
        stages[0].action = TriggerAction::Capture;
        Self {
            divider: 2,
            read_count: 4096,
            delay_count: 2048,
            external_clock: false,
            clock_inverted: false,
            noise_filter: false,
            demux: false,
            channel_groups: 0,
            trigger_enable: TriggerEnable::None,
            stages,
        }
    }

    /// Sample rate in Hz produced by these settings.
    pub fn sample_rate(&self) -> u32 {
        let rate = BASE_CLOCK_HZ / self.divider.max(1);
        if self.demux {
            rate * 2
        } else {
            rate
        }
    }

    /// Set the divider for the closest rate at or below `hz`.
    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.divider = BASE_CLOCK_HZ.div_ceil(hz.max(1)).clamp(1, MAX_DIVIDER);
        self
    }

    pub fn with_read_count(mut self, read_count: u32) -> Self {
        self.read_count = read_count;
        self.delay_count = self.delay_count.min(read_count);
        self
    }

    /// Fraction of the recording taken after the trigger fires.
    pub fn with_delay_ratio(mut self, ratio: f64) -> Self {
        self.set_delay_ratio(ratio);
        self
    }

    pub fn set_delay_ratio(&mut self, ratio: f64) {
        self.delay_count = (f64::from(self.read_count) * ratio.clamp(0.0, 1.0)) as u32;
    }

    pub fn with_channel_groups(mut self, channel_groups: u8) -> Self {
        self.channel_groups = channel_groups;
        self
    }

    /// Program stage 0 alone for a simple trigger.
    pub fn with_simple_trigger(mut self, stage: TriggerStage) -> Self {
        self.trigger_enable = TriggerEnable::Simple;
        self.stages[0] = stage;
        self
    }

    pub fn with_complex_trigger(mut self, stages: [TriggerStage; STAGE_COUNT]) -> Self {
        self.trigger_enable = TriggerEnable::Complex;
        self.stages = stages;
        self
    }

    /// Enabled channel groups, `4 - popcount(channel_groups)`.
    pub fn enabled_groups(&self) -> usize {
        (0..4).filter(|group| self.channel_groups & (1 << group) == 0).count()
    }

    /// Check every field against what the wire protocol can carry.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.divider == 0 || self.divider > MAX_DIVIDER {
            return Err(SettingsError::DividerOutOfRange(self.divider));
        }
        if !(4..=MAX_READ_COUNT).contains(&self.read_count) {
            return Err(SettingsError::ReadCountOutOfRange(self.read_count));
        }
        if self.delay_count > self.read_count {
            return Err(SettingsError::DelayCountExceedsReadCount {
                delay_count: self.delay_count,
                read_count: self.read_count,
            });
        }
        if self.channel_groups > 0x0F {
            return Err(SettingsError::ChannelGroupsOutOfRange(self.channel_groups));
        }

        let sample_rate = self.sample_rate();
        match self.trigger_enable {
            TriggerEnable::None => Ok(()),
            TriggerEnable::Simple => self.stages[0].validate(0, sample_rate),
            TriggerEnable::Complex => {
                for (index, stage) in self.stages.iter().enumerate() {
                    stage.validate(index, sample_rate)?;
                }
                self.validate_entry_stage()
            }
        }
    }

    /// A complex trigger enters through exactly one active stage at level 0.
    /// With every mask cleared the trigger fires at once and no entry is needed.
    fn validate_entry_stage(&self) -> Result<(), SettingsError> {
        if self.stages.iter().all(|stage| stage.mask == 0) {
            return Ok(());
        }
        let entries = self
            .stages
            .iter()
            .filter(|stage| stage.mask != 0 && stage.arm_level == 0)
            .count();
        match entries {
            0 => Err(SettingsError::NoEntryStage),
            1 => Ok(()),
            n => Err(SettingsError::AmbiguousEntryStage(n)),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DeviceSettings::default();
        assert_eq!(settings.sample_rate(), 50_000_000);
        assert_eq!(settings.stages[0].action, TriggerAction::Capture);
        assert_eq!(settings.stages[1].action, TriggerAction::NextLevel);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_demux_doubles_rate() {
        let mut settings = DeviceSettings::new().with_sample_rate(1_000_000);
        assert_eq!(settings.divider, 100);
        settings.demux = true;
        assert_eq!(settings.sample_rate(), 2_000_000);
    }

    #[test]
    fn test_trigger_enable_tags() {
        assert_eq!(TriggerEnable::try_from(2), Ok(TriggerEnable::Complex));
        assert_eq!(
            TriggerEnable::try_from(3),
            Err(SettingsError::InvalidTriggerMode(3))
        );
        assert_eq!("Simple".parse::<TriggerEnable>(), Ok(TriggerEnable::Simple));
        assert_eq!(
            "Sometimes".parse::<TriggerEnable>(),
            Err(SettingsError::UnknownTriggerMode("Sometimes".to_string()))
        );
    }

    #[test]
    fn test_channel_builder() {
        let stage = TriggerStage::new()
            .set_channel(0, BitState::High)
            .set_channel(3, BitState::Low)
            .set_channel(5, BitState::High)
            .set_channel(5, BitState::DontCare);
        assert_eq!(stage.mask, 0b1001);
        assert_eq!(stage.values, 0b0001);
    }

    #[test]
    fn test_delay_units() {
        let mut stage = TriggerStage::new();
        stage.set_delay_in(10.0, DelayUnit::Microseconds, 1_000_000);
        assert_eq!(stage.delay, 10);
        assert_eq!(stage.delay_unit, DelayUnit::Microseconds);
        assert!((stage.delay_in(DelayUnit::Milliseconds, 1_000_000) - 0.01).abs() < 1e-12);
        assert!((stage.delay_in(DelayUnit::Samples, 1_000_000) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_trigger_delay_limit() {
        let mut stage = TriggerStage::new().then_capture();
        stage.set_delay_in(1.0, DelayUnit::Seconds, 100_000);
        let settings = DeviceSettings::new()
            .with_sample_rate(100_000)
            .with_simple_trigger(stage);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::TriggerDelayTooLarge {
                stage: 0,
                samples: 100_000,
                ..
            })
        ));
    }

    #[test]
    fn test_read_and_delay_counts() {
        let settings = DeviceSettings::new().with_read_count(1024).with_delay_ratio(0.25);
        assert_eq!(settings.delay_count, 256);
        assert!(settings.validate().is_ok());

        let mut settings = DeviceSettings::new();
        settings.delay_count = settings.read_count + 1;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::DelayCountExceedsReadCount { .. })
        ));

        let settings = DeviceSettings::new().with_read_count(MAX_READ_COUNT + 4);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::ReadCountOutOfRange(_))
        ));
    }

    #[test]
    fn test_complex_entry_stage() {
        let armed = TriggerStage::new().set_channel(1, BitState::High);
        let stages = [
            armed.clone(),
            armed.clone().armed_at(1).then_capture(),
            TriggerStage::new(),
            TriggerStage::new(),
        ];
        assert!(DeviceSettings::new()
            .with_complex_trigger(stages.clone())
            .validate()
            .is_ok());

        let mut ambiguous = stages.clone();
        ambiguous[1].arm_level = 0;
        assert_eq!(
            DeviceSettings::new()
                .with_complex_trigger(ambiguous)
                .validate(),
            Err(SettingsError::AmbiguousEntryStage(2))
        );

        let mut unreachable = stages;
        unreachable[0].arm_level = 2;
        assert_eq!(
            DeviceSettings::new()
                .with_complex_trigger(unreachable)
                .validate(),
            Err(SettingsError::NoEntryStage)
        );
    }

    #[test]
    fn test_enabled_groups() {
        assert_eq!(DeviceSettings::new().enabled_groups(), 4);
        assert_eq!(DeviceSettings::new().with_channel_groups(0b0101).enabled_groups(), 2);
    }
}
