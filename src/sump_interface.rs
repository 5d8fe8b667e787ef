use crate::device_settings::{DeviceSettings, SettingsError};
use crate::metadata::{read_metadata, DeviceInfo, MetadataEntry};
use crate::sample_buffer::{SampleBuffer, SampleBufferError};
use crate::sump_codec::{
    bytes_per_sample, encode_reset, encode_settings, parse_capture_response, parse_id_string,
    CodecError, SumpCommand, SUMP_ID,
};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Serial speed the Open Bench Logic Sniffer firmware expects by default.
pub const DEFAULT_BAUD: u32 = 115_200;

/// How long one blocking read waits before the abort flag is checked again.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum SumpError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Invalid capture: {0}")]
    Buffer(#[from] SampleBufferError),

    #[error("Device answered ID '{actual}', expected '{expected}'")]
    IdMismatch { expected: String, actual: String },

    #[error("Capture aborted")]
    Aborted,
}

/// Driver for a SUMP compatible logic analyzer.
///
/// Every call is a blocking request/response exchange over `T`. The driver
/// owns its transport exclusively.
#[derive(Debug)]
pub struct SumpInterface<T: Read + Write> {
    transport: T,
}

impl SumpInterface<Box<dyn SerialPort>> {
    /// Open the serial device at `path` and reset the analyzer.
    pub fn open(path: &str, baud: u32) -> Result<Self, SumpError> {
        log::debug!("Opening SUMP device at {path} ({baud} baud)");
        let serial = serialport::new(path, baud).timeout(POLL_INTERVAL).open()?;
        serial.clear(serialport::ClearBuffer::All)?;
        Self::new(serial)
    }
}

impl<T: Read + Write> SumpInterface<T> {
    pub fn new(transport: T) -> Result<Self, SumpError> {
        let mut interface = Self { transport };
        interface.reset()?;
        Ok(interface)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send(&mut self, command: SumpCommand) -> Result<(), SumpError> {
        log::trace!("{command}");
        self.transport.write_all(&command.to_bytes())?;
        Ok(())
    }

    /// Five zero bytes, enough to flush any long command in progress.
    pub fn reset(&mut self) -> Result<(), SumpError> {
        log::trace!("Reset \t0000000000");
        self.transport.write_all(&encode_reset())?;
        self.transport.flush()?;
        Ok(())
    }

    pub fn xon(&mut self) -> Result<(), SumpError> {
        self.send(SumpCommand::XOn)
    }

    pub fn xoff(&mut self) -> Result<(), SumpError> {
        self.send(SumpCommand::XOff)
    }

    /// The device ID in canonical byte order, `b"SLA1"` for SUMP devices.
    pub fn id_string(&mut self) -> Result<[u8; 4], SumpError> {
        self.send(SumpCommand::Id)?;
        let mut raw = [0u8; 4];
        self.transport.read_exact(&mut raw)?;
        let id = parse_id_string(raw);
        log::debug!("Device ID: {}", String::from_utf8_lossy(&id));
        Ok(id)
    }

    pub fn verify_id(&mut self) -> Result<(), SumpError> {
        let id = self.id_string()?;
        if &id != SUMP_ID {
            return Err(SumpError::IdMismatch {
                expected: String::from_utf8_lossy(SUMP_ID).into_owned(),
                actual: String::from_utf8_lossy(&id).into_owned(),
            });
        }
        Ok(())
    }

    pub fn query_metadata(&mut self) -> Result<Vec<MetadataEntry>, SumpError> {
        self.reset()?;
        self.send(SumpCommand::Metadata)?;
        let entries = read_metadata(&mut self.transport)?;
        log::debug!("Received {} metadata entries", entries.len());
        Ok(entries)
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo, SumpError> {
        Ok(DeviceInfo::from_entries(&self.query_metadata()?))
    }

    /// Program divider, counts, flags and all four trigger stages.
    ///
    /// Settings are validated before the first byte goes out.
    pub fn send_settings(&mut self, settings: &DeviceSettings) -> Result<(), SumpError> {
        let commands = encode_settings(settings)?;
        log::debug!(
            "Sending settings: {} Hz, {} samples, trigger {}",
            settings.sample_rate(),
            settings.read_count,
            settings.trigger_enable
        );
        for command in commands {
            self.send(command)?;
        }
        self.transport.flush()?;
        Ok(())
    }

    /// Start a capture and block until every sample has arrived.
    pub fn capture(&mut self, settings: &DeviceSettings) -> Result<SampleBuffer, SumpError> {
        self.capture_with_abort(settings, &AtomicBool::new(false))
    }

    /// Like [`capture`](Self::capture), but gives up once `abort` is set.
    ///
    /// The flag is polled whenever the transport times out waiting for data.
    /// An aborted capture resets the device and returns [`SumpError::Aborted`].
    pub fn capture_with_abort(
        &mut self,
        settings: &DeviceSettings,
        abort: &AtomicBool,
    ) -> Result<SampleBuffer, SumpError> {
        settings.validate()?;
        let read_count = settings.read_count as usize;
        let mut bytes = vec![0u8; read_count * bytes_per_sample(settings.channel_groups)];

        log::debug!("Capturing {read_count} samples ({} bytes)", bytes.len());
        self.send(SumpCommand::Run)?;
        self.transport.flush()?;

        let received = match self.read_capture(&mut bytes, abort) {
            Ok(received) => received,
            Err(SumpError::Aborted) => {
                log::debug!("Capture aborted, resetting device");
                self.reset()?;
                return Err(SumpError::Aborted);
            }
            Err(e) => return Err(e),
        };
        bytes.truncate(received);
        self.reset()?;

        let samples = parse_capture_response(read_count, settings.channel_groups, &bytes)?;
        Ok(SampleBuffer::new(
            u64::from(settings.sample_rate()),
            settings.delay_count,
            settings.channel_groups,
            samples,
        )?)
    }

    /// Fill `bytes` from the transport; returns how many arrived before the
    /// stream ended.
    fn read_capture(&mut self, bytes: &mut [u8], abort: &AtomicBool) -> Result<usize, SumpError> {
        let mut received = 0;
        while received < bytes.len() {
            if abort.load(Ordering::Relaxed) {
                return Err(SumpError::Aborted);
            }
            match self.transport.read(&mut bytes[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    log::trace!("Waiting for capture data ({received}/{} bytes)", bytes.len());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_settings::{BitState, TriggerStage};
    use std::collections::VecDeque;
    use std::io;

    /// In-memory device: records what was written, replays canned answers.
    #[derive(Default)]
    struct MockDevice {
        written: Vec<u8>,
        response: VecDeque<u8>,
        timeouts: usize,
        fail_reads: bool,
    }

    impl MockDevice {
        fn answering(response: &[u8]) -> Self {
            Self {
                response: response.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn commands(&self) -> Vec<SumpCommand> {
            let mut commands = Vec::new();
            let mut rest = self.written.as_slice();
            while let Some((command, used)) = SumpCommand::parse(rest) {
                commands.push(command);
                rest = &rest[used..];
            }
            commands
        }
    }

    impl Read for MockDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged"));
            }
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Err(io::Error::new(ErrorKind::TimedOut, "no data yet"));
            }
            let n = buf.len().min(self.response.len()).min(3);
            for slot in buf.iter_mut().take(n) {
                *slot = self.response.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for MockDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_sends_reset() {
        let interface = SumpInterface::new(MockDevice::default()).unwrap();
        assert_eq!(interface.into_inner().written, vec![0; 5]);
    }

    #[test]
    fn test_id_is_verified() {
        let mut interface = SumpInterface::new(MockDevice::answering(b"1ALS")).unwrap();
        assert!(interface.verify_id().is_ok());
        assert_eq!(interface.into_inner().written[5..], [0x02]);

        let mut interface = SumpInterface::new(MockDevice::answering(b"0ALS")).unwrap();
        assert!(matches!(
            interface.verify_id(),
            Err(SumpError::IdMismatch { actual, .. }) if actual == "SLA0"
        ));
    }

    #[test]
    fn test_settings_are_written_in_order() {
        let settings = DeviceSettings::new()
            .with_sample_rate(1_000_000)
            .with_simple_trigger(TriggerStage::new().set_channel(0, BitState::High));
        let mut interface = SumpInterface::new(MockDevice::default()).unwrap();
        interface.send_settings(&settings).unwrap();

        let commands = interface.into_inner().commands();
        // leading reset parses as five Reset commands
        assert_eq!(commands[5], SumpCommand::SetDivider(100));
        assert!(matches!(commands[6], SumpCommand::SetReadDelay { .. }));
        assert!(matches!(commands[7], SumpCommand::SetFlags(0)));
        assert_eq!(commands.len(), 5 + 3 + 12);
    }

    #[test]
    fn test_invalid_settings_send_nothing() {
        let mut settings = DeviceSettings::new();
        settings.read_count = 2;
        let mut interface = SumpInterface::new(MockDevice::default()).unwrap();
        assert!(matches!(
            interface.send_settings(&settings),
            Err(SumpError::Settings(SettingsError::ReadCountOutOfRange(2)))
        ));
        assert_eq!(interface.into_inner().written.len(), 5);
    }

    #[test]
    fn test_capture_survives_timeouts() {
        let settings = DeviceSettings::new()
            .with_read_count(4)
            .with_delay_ratio(0.5)
            .with_channel_groups(0b1110);
        let mut device = MockDevice::answering(&[4, 3, 2, 1]);
        device.timeouts = 3;
        let mut interface = SumpInterface::new(device).unwrap();

        let buffer = interface.capture(&settings).unwrap();
        assert_eq!(buffer.samples(), &[1, 2, 3, 4]);
        assert_eq!(buffer.frequency(), 50_000_000);
        assert_eq!(buffer.delay_count(), 2);
        assert_eq!(buffer.channel_mask(), 0b1110);

        let written = interface.into_inner().written;
        assert_eq!(written[5], 0x01);
        assert_eq!(written[6..], [0; 5]);
    }

    #[test]
    fn test_short_capture_is_reported() {
        let settings = DeviceSettings::new().with_read_count(4).with_channel_groups(0b1110);
        let mut interface = SumpInterface::new(MockDevice::answering(&[1, 2])).unwrap();
        assert!(matches!(
            interface.capture(&settings),
            Err(SumpError::Codec(CodecError::TruncatedCapture {
                expected: 4,
                received: 2
            }))
        ));
    }

    #[test]
    fn test_abort_resets_device() {
        let settings = DeviceSettings::new().with_read_count(8);
        let mut device = MockDevice::default();
        device.timeouts = usize::MAX;
        let mut interface = SumpInterface::new(device).unwrap();

        let abort = AtomicBool::new(true);
        assert!(matches!(
            interface.capture_with_abort(&settings, &abort),
            Err(SumpError::Aborted)
        ));
        let written = interface.into_inner().written;
        assert_eq!(written[written.len() - 5..], [0; 5]);
    }

    #[test]
    fn test_io_errors_are_not_retried() {
        let settings = DeviceSettings::new().with_read_count(8);
        let mut device = MockDevice::default();
        device.fail_reads = true;
        let mut interface = SumpInterface::new(device).unwrap();
        assert!(matches!(
            interface.capture(&settings),
            Err(SumpError::Io(e)) if e.kind() == ErrorKind::BrokenPipe
        ));
    }

    #[test]
    fn test_metadata_query() {
        let mut answer = vec![0x01];
        answer.extend_from_slice(b"Logic Sniffer\0");
        answer.extend_from_slice(&[0x40, 32, 0x00]);
        let mut interface = SumpInterface::new(MockDevice::answering(&answer)).unwrap();

        let info = interface.device_info().unwrap();
        assert_eq!(info.device_name.as_deref(), Some("Logic Sniffer"));
        assert_eq!(info.probes, Some(32));

        let written = interface.into_inner().written;
        assert_eq!(written[5..], [0, 0, 0, 0, 0, 0x04]);
    }

    #[test]
    fn test_flow_control() {
        let mut interface = SumpInterface::new(MockDevice::default()).unwrap();
        interface.xoff().unwrap();
        interface.xon().unwrap();
        assert_eq!(interface.into_inner().written[5..], [0x13, 0x11]);
    }
}
