//! Tabular views of captures and decoded events, with CSV output.

use crate::decoders::DecodedEvent;
use crate::sample_buffer::{SampleBuffer, SampleBufferError};
use polars::prelude::*;
use std::io::Write;

pub const SAMPLE_COLUMN_NAME: &str = "sample";
pub const TIME_COLUMN_NAME: &str = "time";
pub const RAW_COLUMN_NAME: &str = "raw";
pub const KIND_COLUMN_NAME: &str = "kind";
pub const ROLE_COLUMN_NAME: &str = "role";
pub const VALUE_COLUMN_NAME: &str = "value";
pub const TEXT_COLUMN_NAME: &str = "text";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Sample buffer error: {0}")]
    Buffer(#[from] SampleBufferError),
}

fn channel_column_name(channel: u8) -> String {
    format!("bit_{channel}")
}

/// One row per sample: index, time relative to the trigger, the raw word and
/// a `bit_n` column for every channel the capture's mask enables.
pub fn samples_frame(buffer: &SampleBuffer) -> Result<DataFrame, ExportError> {
    crate::profile_scope!("samples_frame");

    let period = if buffer.frequency() == 0 {
        0.0
    } else {
        1.0 / buffer.frequency() as f64
    };
    let trigger = f64::from(buffer.read_count()) - f64::from(buffer.delay_count());

    let raw: Column = Series::new(RAW_COLUMN_NAME.into(), buffer.samples().to_vec()).into();
    let mut df = DataFrame::new(vec![raw])?
        .lazy()
        .with_row_index(SAMPLE_COLUMN_NAME, Some(0))
        .with_columns([
            ((col(SAMPLE_COLUMN_NAME).cast(DataType::Float64) - lit(trigger)) * lit(period))
                .alias(TIME_COLUMN_NAME),
        ])
        .select([
            col(SAMPLE_COLUMN_NAME),
            col(TIME_COLUMN_NAME),
            col(RAW_COLUMN_NAME),
        ])
        .collect()?;

    for channel in buffer.channel_set() {
        let column: Column =
            Series::new(channel_column_name(channel).into(), buffer.channel(channel)?).into();
        df.with_column(column)?;
    }

    Ok(df)
}

/// One row per decoded event.
///
/// `role` and `value` are null for events that carry none.
pub fn events_frame(events: &[DecodedEvent], buffer: &SampleBuffer) -> Result<DataFrame, ExportError> {
    let samples: Vec<u64> = events.iter().map(|event| event.sample() as u64).collect();
    let times: Vec<f64> = events
        .iter()
        .map(|event| buffer.sample_time(event.sample()))
        .collect();
    let kinds: Vec<&str> = events.iter().map(DecodedEvent::kind).collect();
    let roles: Vec<Option<String>> = events
        .iter()
        .map(|event| event.role().map(|role| role.to_string()))
        .collect();
    let values: Vec<Option<u32>> = events
        .iter()
        .map(|event| event.value().map(u32::from))
        .collect();
    let texts: Vec<String> = events.iter().map(ToString::to_string).collect();

    let df = DataFrame::new(vec![
        Series::new(SAMPLE_COLUMN_NAME.into(), samples).into(),
        Series::new(TIME_COLUMN_NAME.into(), times).into(),
        Series::new(KIND_COLUMN_NAME.into(), kinds).into(),
        Series::new(ROLE_COLUMN_NAME.into(), roles).into(),
        Series::new(VALUE_COLUMN_NAME.into(), values).into(),
        Series::new(TEXT_COLUMN_NAME.into(), texts).into(),
    ])?;
    Ok(df)
}

/// Only the data bytes of an event frame.
pub fn data_bytes(events: DataFrame) -> LazyFrame {
    events
        .lazy()
        .filter(col(KIND_COLUMN_NAME).eq(lit("DataByte")))
        .select([
            col(SAMPLE_COLUMN_NAME),
            col(ROLE_COLUMN_NAME),
            col(VALUE_COLUMN_NAME),
        ])
}

pub fn write_csv<W: Write>(df: &mut DataFrame, writer: W) -> Result<(), ExportError> {
    CsvWriter::new(writer).include_header(true).finish(df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::{ChannelRole, Direction};

    fn buffer() -> SampleBuffer {
        // upper three groups disabled
        SampleBuffer::new(1_000_000, 2, 0b1110, vec![0x00, 0x01, 0x03, 0x82]).unwrap()
    }

    #[test]
    fn test_samples_frame_columns() {
        let df = samples_frame(&buffer()).unwrap();
        let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names[..3], ["sample", "time", "raw"]);
        assert_eq!(names.len(), 3 + 8);
        assert_eq!(names[3], "bit_0");
        assert_eq!(names[10], "bit_7");
        assert_eq!(df.height(), 4);

        let bit_1 = df.column("bit_1").unwrap().bool().unwrap();
        assert_eq!(bit_1.get(2), Some(true));
        assert_eq!(bit_1.get(3), Some(true));
        assert_eq!(bit_1.get(1), Some(false));

        // trigger fired two samples before the end
        let time = df.column(TIME_COLUMN_NAME).unwrap().f64().unwrap();
        assert!(time.get(2).unwrap().abs() < 1e-12);
        assert!((time.get(0).unwrap() + 2e-6).abs() < 1e-12);
    }

    #[test]
    fn test_events_frame() {
        let buffer = buffer();
        let events = vec![
            DecodedEvent::FrameStart { sample: 0 },
            DecodedEvent::DataByte {
                sample: 1,
                role: ChannelRole::Address(Direction::Write),
                value: 0x50,
                length_bits: 7,
            },
            DecodedEvent::Ack { sample: 2 },
            DecodedEvent::DataByte {
                sample: 3,
                role: ChannelRole::Data,
                value: 0x10,
                length_bits: 8,
            },
        ];
        let df = events_frame(&events, &buffer).unwrap();
        assert_eq!(df.height(), 4);
        let values = df.column(VALUE_COLUMN_NAME).unwrap().u32().unwrap();
        assert_eq!(values.get(0), None);
        assert_eq!(values.get(1), Some(0x50));

        let bytes = data_bytes(df).collect().unwrap();
        assert_eq!(bytes.height(), 2);
        let roles = bytes.column(ROLE_COLUMN_NAME).unwrap().str().unwrap();
        assert_eq!(roles.get(0), Some("Address (write)"));
        assert_eq!(roles.get(1), Some("Data"));
    }

    #[test]
    fn test_csv_round_trip() {
        let mut df = samples_frame(&buffer()).unwrap();
        let mut out = Vec::new();
        write_csv(&mut df, &mut out).unwrap();

        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("sample,time,raw,bit_0,"));
        assert_eq!(text.lines().count(), 5);

        let back = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(std::io::Cursor::new(out))
            .finish()
            .unwrap();
        assert_eq!(back.shape(), df.shape());
    }

    #[test]
    fn test_empty_capture() {
        let buffer = SampleBuffer::new(1_000, 0, 0, vec![]).unwrap();
        let df = samples_frame(&buffer).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 3 + 32);
        assert_eq!(events_frame(&[], &buffer).unwrap().height(), 0);
    }
}
