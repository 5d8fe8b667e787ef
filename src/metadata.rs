//! Device metadata returned by the `0x04` command.
//!
//! The answer is a stream of `(token, value)` pairs ending with a zero token.
//! The token number selects how the value is encoded:
//!
//! | token        | value                         |
//! |--------------|-------------------------------|
//! | `0x01..=0x1F`| NUL-terminated string         |
//! | `0x20..=0x3F`| 32-bit big-endian integer     |
//! | `0x40..=0x5F`| single byte                   |
//! | `0x60..`     | no value                      |

use crate::sump_codec::CodecError;
use std::fmt;
use std::io::{ErrorKind, Read};

pub const TOKEN_END: u8 = 0x00;
pub const TOKEN_DEVICE_NAME: u8 = 0x01;
pub const TOKEN_FIRMWARE_VERSION: u8 = 0x02;
pub const TOKEN_PIC_VERSION: u8 = 0x03;
pub const TOKEN_PROBES: u8 = 0x20;
pub const TOKEN_SAMPLE_MEMORY: u8 = 0x21;
pub const TOKEN_DYNAMIC_MEMORY: u8 = 0x22;
pub const TOKEN_MAX_SAMPLE_RATE: u8 = 0x23;
pub const TOKEN_PROTOCOL_VERSION: u8 = 0x24;
pub const TOKEN_PROBES_SHORT: u8 = 0x40;
pub const TOKEN_PROTOCOL_VERSION_SHORT: u8 = 0x41;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Number(u32),
    Byte(u8),
    None,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Text(text) => f.write_str(text),
            MetadataValue::Number(number) => write!(f, "{number}"),
            MetadataValue::Byte(byte) => write!(f, "{byte}"),
            MetadataValue::None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub token: u8,
    pub value: MetadataValue,
}

impl MetadataEntry {
    /// Human-readable name of the token, if it is one the protocol defines.
    pub fn heading(&self) -> Option<&'static str> {
        heading(self.token)
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.heading() {
            Some(heading) => write!(f, "{heading}: {}", self.value),
            None => write!(f, "0x{:02x}: {}", self.token, self.value),
        }
    }
}

pub fn heading(token: u8) -> Option<&'static str> {
    match token {
        TOKEN_DEVICE_NAME => Some("Device name"),
        TOKEN_FIRMWARE_VERSION => Some("Firmware version"),
        TOKEN_PIC_VERSION => Some("PIC version"),
        TOKEN_PROBES | TOKEN_PROBES_SHORT => Some("Probes"),
        TOKEN_SAMPLE_MEMORY => Some("Sample memory size"),
        TOKEN_DYNAMIC_MEMORY => Some("Dynamic memory size"),
        TOKEN_MAX_SAMPLE_RATE => Some("Maximum rate"),
        TOKEN_PROTOCOL_VERSION | TOKEN_PROTOCOL_VERSION_SHORT => Some("Protocol version"),
        _ => None,
    }
}

/// Next byte of the stream, `None` once the device has nothing more to say.
fn next_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, std::io::Error> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

fn field_byte<R: Read>(reader: &mut R, token: u8) -> Result<u8, CodecError> {
    next_byte(reader)?.ok_or(CodecError::TruncatedMetadata { token })
}

/// Read metadata entries until the end token.
///
/// A stream that runs dry between entries ends the list like an end token
/// would; one that runs dry inside a value is truncated.
pub fn read_metadata<R: Read>(reader: &mut R) -> Result<Vec<MetadataEntry>, CodecError> {
    let mut entries = Vec::new();

    while let Some(token) = next_byte(reader)? {
        let value = match token {
            TOKEN_END => break,
            0x01..=0x1F => {
                let mut text = Vec::new();
                loop {
                    match field_byte(reader, token)? {
                        0 => break,
                        byte => text.push(byte),
                    }
                }
                MetadataValue::Text(String::from_utf8_lossy(&text).into_owned())
            }
            0x20..=0x3F => {
                let mut bytes = [0u8; 4];
                for byte in &mut bytes {
                    *byte = field_byte(reader, token)?;
                }
                MetadataValue::Number(u32::from_be_bytes(bytes))
            }
            0x40..=0x5F => MetadataValue::Byte(field_byte(reader, token)?),
            _ => MetadataValue::None,
        };
        entries.push(MetadataEntry { token, value });
    }

    Ok(entries)
}

pub fn parse_metadata(mut bytes: &[u8]) -> Result<Vec<MetadataEntry>, CodecError> {
    read_metadata(&mut bytes)
}

/// The metadata fields most callers care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub firmware_version: Option<String>,
    pub pic_version: Option<String>,
    pub probes: Option<u32>,
    pub sample_memory: Option<u32>,
    pub dynamic_memory: Option<u32>,
    pub max_sample_rate: Option<u32>,
    pub protocol_version: Option<u32>,
}

impl DeviceInfo {
    pub fn from_entries(entries: &[MetadataEntry]) -> Self {
        let mut info = Self::default();
        for entry in entries {
            match (&entry.value, entry.token) {
                (MetadataValue::Text(text), TOKEN_DEVICE_NAME) => {
                    info.device_name = Some(text.clone());
                }
                (MetadataValue::Text(text), TOKEN_FIRMWARE_VERSION) => {
                    info.firmware_version = Some(text.clone());
                }
                (MetadataValue::Text(text), TOKEN_PIC_VERSION) => {
                    info.pic_version = Some(text.clone());
                }
                (MetadataValue::Number(n), TOKEN_PROBES) => info.probes = Some(*n),
                (MetadataValue::Byte(n), TOKEN_PROBES_SHORT) => info.probes = Some(u32::from(*n)),
                (MetadataValue::Number(n), TOKEN_SAMPLE_MEMORY) => info.sample_memory = Some(*n),
                (MetadataValue::Number(n), TOKEN_DYNAMIC_MEMORY) => info.dynamic_memory = Some(*n),
                (MetadataValue::Number(n), TOKEN_MAX_SAMPLE_RATE) => {
                    info.max_sample_rate = Some(*n);
                }
                (MetadataValue::Number(n), TOKEN_PROTOCOL_VERSION) => {
                    info.protocol_version = Some(*n);
                }
                (MetadataValue::Byte(n), TOKEN_PROTOCOL_VERSION_SHORT) => {
                    info.protocol_version = Some(u32::from(*n));
                }
                _ => log::debug!("Ignoring metadata entry {entry}"),
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        let mut bytes = vec![TOKEN_DEVICE_NAME];
        bytes.extend_from_slice(b"BPv3\0");
        bytes.push(TOKEN_FIRMWARE_VERSION);
        bytes.extend_from_slice(b"3.07\0");
        bytes.push(TOKEN_SAMPLE_MEMORY);
        bytes.extend_from_slice(&24_576u32.to_be_bytes());
        bytes.push(TOKEN_MAX_SAMPLE_RATE);
        bytes.extend_from_slice(&100_000_000u32.to_be_bytes());
        bytes.extend_from_slice(&[TOKEN_PROBES_SHORT, 32]);
        bytes.extend_from_slice(&[TOKEN_PROTOCOL_VERSION_SHORT, 2]);
        bytes.push(0x70);
        bytes.push(TOKEN_END);
        bytes
    }

    #[test]
    fn test_parse_token_ranges() {
        let entries = parse_metadata(&sample_stream()).unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[0].value,
            MetadataValue::Text("BPv3".to_string())
        );
        assert_eq!(entries[2].value, MetadataValue::Number(24_576));
        assert_eq!(entries[3].value, MetadataValue::Number(100_000_000));
        assert_eq!(entries[4].value, MetadataValue::Byte(32));
        assert_eq!(
            entries[6],
            MetadataEntry {
                token: 0x70,
                value: MetadataValue::None
            }
        );
    }

    #[test]
    fn test_stops_at_end_token() {
        let entries = parse_metadata(&[0x40, 8, 0x00, 0x40, 16]).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_end_token_is_accepted() {
        let entries = parse_metadata(&[0x40, 8]).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(parse_metadata(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_fields() {
        assert!(matches!(
            parse_metadata(&[0x21, 0x00, 0x01]),
            Err(CodecError::TruncatedMetadata { token: 0x21 })
        ));
        assert!(matches!(
            parse_metadata(b"\x01unterminated"),
            Err(CodecError::TruncatedMetadata { token: 0x01 })
        ));
        assert!(matches!(
            parse_metadata(&[0x41]),
            Err(CodecError::TruncatedMetadata { token: 0x41 })
        ));
    }

    #[test]
    fn test_device_info_summary() {
        let entries = parse_metadata(&sample_stream()).unwrap();
        let info = DeviceInfo::from_entries(&entries);
        assert_eq!(info.device_name.as_deref(), Some("BPv3"));
        assert_eq!(info.firmware_version.as_deref(), Some("3.07"));
        assert_eq!(info.probes, Some(32));
        assert_eq!(info.sample_memory, Some(24_576));
        assert_eq!(info.max_sample_rate, Some(100_000_000));
        assert_eq!(info.protocol_version, Some(2));
        assert_eq!(info.dynamic_memory, None);
    }

    #[test]
    fn test_entry_display() {
        let entry = MetadataEntry {
            token: TOKEN_MAX_SAMPLE_RATE,
            value: MetadataValue::Number(200_000_000),
        };
        assert_eq!(entry.to_string(), "Maximum rate: 200000000");
        let unknown = MetadataEntry {
            token: 0x1E,
            value: MetadataValue::Text("x".to_string()),
        };
        assert_eq!(unknown.to_string(), "0x1e: x");
    }
}
