//! Baud rate and frame format detection for UART lines.
//!
//! Baud detection looks at how long the line stays at one level: most runs
//! in ordinary traffic are one bit long, so the most common run length is
//! the bit time. The estimate is then refined over every run of a dozen bits
//! or fewer.
//!
//! Format detection lays a template of each candidate framing over every
//! plausible start edge and keeps the framing that matches best on average.

use crate::decoders::uart::{FrameFormat, FrameLayout, Parity};
use crate::decoders::{check_channels, DecodeError};
use crate::sample_buffer::SampleBuffer;
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub const STANDARD_BAUD_RATES: [u32; 17] = [
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 31250, 33600, 38400, 56000, 57600,
    115_200, 230_400,
];

/// Longest run, in bits, that takes part in refining the bit time.
const MAX_REFINE_BITS: usize = 12;

/// Shortest bit time that can still be framed reliably.
const MIN_SAMPLES_PER_BIT: f64 = 3.0;

/// Match score at which a candidate counts as a character.
const HIT_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaudEstimate {
    pub samples_per_bit: f64,
    /// `frequency / samples_per_bit`
    pub measured: f64,
    /// Nearest entry of [`STANDARD_BAUD_RATES`]
    pub standard: u32,
    /// Signed distance of `measured` from `standard`, in percent
    pub deviation_percent: f64,
}

/// Lengths of the runs of equal level along `line`, in order.
pub fn run_lengths(line: &[bool]) -> Vec<(bool, usize)> {
    let mut runs: Vec<(bool, usize)> = Vec::new();
    for &level in line {
        match runs.last_mut() {
            Some((current, length)) if *current == level => *length += 1,
            _ => runs.push((level, 1)),
        }
    }
    runs
}

/// How often each run length occurs, low runs and high runs separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHistogram {
    pub zeros: BTreeMap<usize, usize>,
    pub ones: BTreeMap<usize, usize>,
}

impl RunHistogram {
    pub fn from_runs(runs: &[(bool, usize)]) -> Self {
        let mut histogram = Self::default();
        for &(level, length) in runs {
            let counts = if level {
                &mut histogram.ones
            } else {
                &mut histogram.zeros
            };
            *counts.entry(length).or_default() += 1;
        }
        histogram
    }

    /// The most frequent run length over both levels; the shorter wins ties.
    pub fn mode(&self) -> Option<usize> {
        let mut combined: BTreeMap<usize, usize> = self.zeros.clone();
        for (&length, &count) in &self.ones {
            *combined.entry(length).or_default() += count;
        }
        combined
            .into_iter()
            .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
            .map(|(length, _)| length)
    }
}

pub fn nearest_standard_baud(measured: f64) -> u32 {
    let distance = |rate: u32| (measured - f64::from(rate)).abs() / f64::from(rate);
    STANDARD_BAUD_RATES
        .iter()
        .copied()
        .min_by(|a, b| distance(*a).total_cmp(&distance(*b)))
        .unwrap_or(9600)
}

/// Estimate the bit time of the UART line on `channel`.
///
/// The first and last runs are cut by the capture window and are left out.
pub fn auto_baud(buffer: &SampleBuffer, channel: u8) -> Result<BaudEstimate, DecodeError> {
    crate::profile_scope!("auto_baud");
    check_channels(&[channel])?;
    let line = buffer.channel(channel)?;
    let runs = run_lengths(&line);
    if runs.len() < 3 {
        return Err(DecodeError::AmbiguousAutoDetect("no signal"));
    }
    let interior = &runs[1..runs.len() - 1];

    let histogram = RunHistogram::from_runs(interior);
    let mode = histogram
        .mode()
        .ok_or(DecodeError::AmbiguousAutoDetect("no signal"))?;
    trace!(mode, ?histogram, "UART run histogram");

    let (samples, bits) = interior
        .iter()
        .map(|&(_, length)| (length, (length as f64 / mode as f64).round() as usize))
        .filter(|&(_, bits)| (1..=MAX_REFINE_BITS).contains(&bits))
        .fold((0usize, 0usize), |(samples, bits), (length, n)| {
            (samples + length, bits + n)
        });
    let samples_per_bit = if bits == 0 {
        mode as f64
    } else {
        samples as f64 / bits as f64
    };
    if samples_per_bit < MIN_SAMPLES_PER_BIT {
        return Err(DecodeError::AmbiguousAutoDetect(
            "bit time too short for the sample rate",
        ));
    }

    let measured = buffer.frequency() as f64 / samples_per_bit;
    let standard = nearest_standard_baud(measured);
    let deviation_percent = (measured - f64::from(standard)) / f64::from(standard) * 100.0;

    debug!(
        samples_per_bit,
        measured, standard, deviation_percent, "UART baud detected"
    );
    Ok(BaudEstimate {
        samples_per_bit,
        measured,
        standard,
        deviation_percent,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitClass {
    Start,
    Data,
    Parity,
    Stop,
}

/// Run-length form of a character frame: `(bit count, class)` pairs.
pub fn character_template(format: FrameFormat) -> Vec<(usize, BitClass)> {
    let mut template = vec![(1, BitClass::Start), (usize::from(format.data_bits), BitClass::Data)];
    if format.parity != Parity::None {
        template.push((1, BitClass::Parity));
    }
    template.push((usize::from(format.stop_bits), BitClass::Stop));
    template
}

/// A character template expanded to sample resolution.
struct ExpandedTemplate {
    layout: FrameLayout,
    format: FrameFormat,
    /// Expected level per sample, `None` where any level is accepted
    expected: Vec<Option<bool>>,
    parity_samples: std::ops::Range<usize>,
}

impl ExpandedTemplate {
    fn new(format: FrameFormat, samples_per_bit: f64) -> Self {
        let layout = FrameLayout::new(format, samples_per_bit);
        let mut expected = vec![None; layout.width()];
        let mut parity_samples = 0..0;

        let mut bit = 0;
        for (count, class) in character_template(format) {
            for _ in 0..count {
                let window = layout.inner_window(bit);
                let level = match class {
                    BitClass::Start => Some(false),
                    BitClass::Data => None,
                    // placeholder, resolved per character
                    BitClass::Parity => Some(false),
                    BitClass::Stop => Some(true),
                };
                if class == BitClass::Parity {
                    parity_samples = window.clone();
                }
                for slot in &mut expected[window] {
                    *slot = level;
                }
                bit += 1;
            }
        }

        Self {
            layout,
            format,
            expected,
            parity_samples,
        }
    }

    fn width(&self) -> usize {
        self.expected.len()
    }

    /// Mean of +1 per matching and -1 per mismatching significant sample.
    fn score(&self, line: &[bool], at: usize) -> f64 {
        let parity = self
            .format
            .parity
            .bit(self.layout.sample_data(line, at), self.format.data_bits)
            .unwrap_or(false);

        let (sum, count) = self
            .expected
            .iter()
            .enumerate()
            .filter_map(|(offset, level)| {
                let expected = if self.parity_samples.contains(&offset) {
                    parity
                } else {
                    (*level)?
                };
                Some(if line[at + offset] == expected { 1i64 } else { -1 })
            })
            .fold((0i64, 0usize), |(sum, count), score| (sum + score, count + 1));

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    /// Average score over the falling edges a receiver with this framing
    /// would take as start bits, and how many there were.
    fn average_score(&self, line: &[bool], edges: &[usize]) -> Option<(f64, usize)> {
        let width = self.width();
        let resync = width.saturating_sub((self.layout.boundary(1) / 2).max(1)).max(1);
        let mut total = 0.0;
        let mut characters = 0;
        let mut next = 0;

        while let Some(&at) = edges.get(next) {
            if at + width > line.len() {
                break;
            }
            let score = self.score(line, at);
            total += score;
            characters += 1;

            let from = if score > HIT_SCORE { at + resync } else { at + 1 };
            next = edges.partition_point(|&edge| edge < from);
        }

        (characters > 0).then(|| (total / characters as f64, characters))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatEstimate {
    pub format: FrameFormat,
    /// Average match score of the winning template, at most 1.0
    pub score: f64,
    /// Candidate characters the score was averaged over
    pub characters: usize,
}

/// Every framing that detection considers, in preference order.
pub fn candidate_formats() -> impl Iterator<Item = FrameFormat> {
    [Parity::None, Parity::Even, Parity::Odd]
        .into_iter()
        .flat_map(|parity| {
            (5..=8u8)
                .rev()
                .flat_map(move |data_bits| {
                    [1u8, 2].map(|stop_bits| FrameFormat::new(data_bits, parity, stop_bits))
                })
        })
}

fn falling_edges(line: &[bool]) -> Vec<usize> {
    line.windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] && !pair[1])
        .map(|(index, _)| index + 1)
        .collect()
}

/// Pick the framing that best explains the line on `channel`.
///
/// Equal scores prefer the shorter frame, then the one that checks more
/// bits.
pub fn auto_format(
    buffer: &SampleBuffer,
    channel: u8,
    samples_per_bit: f64,
) -> Result<FormatEstimate, DecodeError> {
    crate::profile_scope!("auto_format");
    check_channels(&[channel])?;
    if samples_per_bit < MIN_SAMPLES_PER_BIT {
        return Err(DecodeError::AmbiguousAutoDetect(
            "bit time too short for the sample rate",
        ));
    }
    let line = buffer.channel(channel)?;
    let edges = falling_edges(&line);
    if edges.is_empty() {
        return Err(DecodeError::AmbiguousAutoDetect("no signal"));
    }

    let checked_bits = |format: &FrameFormat| format.frame_bits() - usize::from(format.data_bits);
    let mut best: Option<FormatEstimate> = None;

    for format in candidate_formats() {
        let template = ExpandedTemplate::new(format, samples_per_bit);
        let Some((score, characters)) = template.average_score(&line, &edges) else {
            continue;
        };
        trace!(format = %format, score, characters, "UART template score");

        let better = match &best {
            None => true,
            Some(current) if (score - current.score).abs() > f64::EPSILON => score > current.score,
            Some(current) => {
                let (frame, current_frame) = (format.frame_bits(), current.format.frame_bits());
                frame < current_frame
                    || (frame == current_frame
                        && checked_bits(&format) > checked_bits(&current.format))
            }
        };
        if better {
            best = Some(FormatEstimate {
                format,
                score,
                characters,
            });
        }
    }

    let best = best.ok_or(DecodeError::AmbiguousAutoDetect(
        "no complete character in the capture",
    ))?;
    debug!(format = %best.format, score = best.score, "UART format detected");
    Ok(best)
}
