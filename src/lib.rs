//! # logicsniffer-rs
//!
//! A Rust library for driving SUMP-compatible logic analyzers (the Open Bench
//! Logic Sniffer and its relatives) and decoding what they capture.
//!
//! The crate has two halves. The device side encodes settings into SUMP
//! commands, talks to the analyzer over a serial port and reassembles the
//! returned samples into a [`SampleBuffer`]. The decoder side turns a
//! buffer into SPI, I2C or UART events, with baud rate and frame format
//! detection for UART.
//!
//! ## Features
//!
//! - **SUMP codec**: pure encoding of every setting, capture and metadata parsing
//! - **Device driver**: reset, identify, metadata query and abortable capture over `serialport`
//! - **Trigger configuration**: parallel and serial trigger stages with builder methods
//! - **Protocol decoders**: SPI (all four modes), I2C and UART
//! - **UART auto-detection**: baud rate from run lengths, framing from template matching
//! - **DataFrame output**: captures and decoded events as `polars` frames, CSV export
//!
//! ## Examples
//!
//! ### Capture from a device
//!
//! ```rust,no_run
//! use logicsniffer_rs::{DeviceSettings, SumpInterface, DEFAULT_BAUD};
//!
//! let mut analyzer = SumpInterface::open("/dev/ttyACM0", DEFAULT_BAUD)?;
//! analyzer.verify_id()?;
//!
//! let settings = DeviceSettings::new()
//!     .with_sample_rate(1_000_000)
//!     .with_read_count(8192)
//!     .with_delay_ratio(0.5);
//! let buffer = analyzer.capture(&settings)?;
//! println!("Captured {} samples at {} Hz", buffer.len(), buffer.frequency());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Trigger on a pattern
//!
//! ```rust
//! use logicsniffer_rs::{BitState, DeviceSettings, TriggerStage};
//! use logicsniffer_rs::sump_codec::encode_settings;
//!
//! let stage = TriggerStage::new()
//!     .set_channel(0, BitState::High)
//!     .set_channel(3, BitState::Low)
//!     .then_capture();
//! let settings = DeviceSettings::new().with_simple_trigger(stage);
//!
//! for command in encode_settings(&settings).unwrap() {
//!     println!("{command}");
//! }
//! ```
//!
//! ### Decode a capture
//!
//! ```rust
//! use logicsniffer_rs::decoders::i2c::{decode_i2c, I2cConfig};
//! use logicsniffer_rs::SampleBuffer;
//!
//! // SDA on channel 1, SCL on channel 0, bus idle
//! let buffer = SampleBuffer::new(100_000, 0, 0, vec![0b11; 16]).unwrap();
//! let events = decode_i2c(&buffer, &I2cConfig::new(1, 0)).unwrap();
//! assert!(events.is_empty());
//! ```
//!
//! ### UART with detection
//!
//! ```rust,no_run
//! use logicsniffer_rs::decoders::uart::{decode_uart, UartConfig};
//! # fn capture() -> logicsniffer_rs::SampleBuffer { unimplemented!() }
//!
//! let buffer = capture();
//! // neither baud nor format given: both are detected
//! let decoded = decode_uart(&buffer, &UartConfig::new(2))?;
//! println!("{} baud {}: {}", decoded.baud, decoded.format, decoded.text());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Profiling span for the enclosing scope, active with the `cpu-profiling`
/// feature.
#[cfg(feature = "cpu-profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!($name), 0));
    };
}

#[cfg(not(feature = "cpu-profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

pub(crate) use profile_scope;

pub mod decoders;
pub mod device_settings;
pub mod export;
pub mod metadata;
pub mod sample_buffer;
pub mod sump_codec;
pub mod sump_interface;
pub mod units;

// Re-export the main types for convenience
pub use sample_buffer::{SampleBuffer, SampleBufferError};

pub use device_settings::{
    BitState, DelayUnit, DeviceSettings, SettingsError, TriggerAction, TriggerEnable, TriggerMode,
    TriggerStage,
};

pub use sump_codec::{CodecError, SumpCommand};

pub use metadata::{DeviceInfo, MetadataEntry, MetadataValue};

pub use sump_interface::{SumpError, SumpInterface, DEFAULT_BAUD};

pub use decoders::{ChannelRole, DecodeError, DecodedEvent, Truncation};
