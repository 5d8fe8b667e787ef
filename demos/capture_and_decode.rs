// Capture and decode example
//
// This example captures from a SUMP analyzer, optionally waiting for a
// trigger, decodes one protocol from the capture and can save both the
// samples and the decoded events as CSV.

use clap::{Parser, Subcommand};
use logicsniffer_rs::decoders::baudot::decode_baudot_events;
use logicsniffer_rs::decoders::i2c::{decode_i2c, I2cConfig};
use logicsniffer_rs::decoders::spi::{decode_spi, SpiConfig, SpiMode};
use logicsniffer_rs::decoders::uart::{decode_uart, FrameFormat, Parity, UartConfig};
use logicsniffer_rs::export::{events_frame, samples_frame, write_csv};
use logicsniffer_rs::units::{frequency_with_units, time_with_units};
use logicsniffer_rs::{
    BitState, DecodedEvent, DeviceSettings, SampleBuffer, SumpInterface, TriggerStage, DEFAULT_BAUD,
};
use std::fs::File;

#[derive(Parser)]
#[command(name = "capture_and_decode")]
#[command(version = "1.0")]
#[command(about = "Capture from a SUMP logic analyzer and decode SPI, I2C or UART")]
struct Args {
    /// Serial port the analyzer is attached to
    port: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD, help = "Serial baud rate")]
    baud: u32,

    #[arg(short, long, default_value_t = 1_000_000, help = "Sample rate in Hz")]
    rate: u32,

    #[arg(short = 'n', long, default_value_t = 8192, help = "Number of samples to capture")]
    samples: u32,

    #[arg(long, default_value_t = 0.5, help = "Share of samples taken after the trigger")]
    after_trigger: f64,

    #[arg(long, help = "Start capturing when this channel goes low")]
    trigger_low: Option<u8>,

    #[arg(long, help = "Write the raw samples to this CSV file")]
    samples_csv: Option<String>,

    #[arg(long, help = "Write the decoded events to this CSV file")]
    events_csv: Option<String>,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,

    #[command(subcommand)]
    protocol: Protocol,
}

#[derive(Subcommand)]
enum Protocol {
    /// Decode SPI
    Spi {
        #[arg(long, default_value_t = 0)]
        sck: u8,
        #[arg(long, default_value_t = 1)]
        mosi: u8,
        #[arg(long, default_value_t = 2)]
        miso: u8,
        #[arg(long, default_value_t = 3)]
        nss: u8,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        mode: u8,
        #[arg(long, help = "Bytes are sent least significant bit first")]
        lsb_first: bool,
    },
    /// Decode I2C
    I2c {
        #[arg(long, default_value_t = 1)]
        sda: u8,
        #[arg(long, default_value_t = 0)]
        scl: u8,
    },
    /// Decode UART, detecting baud and framing unless given
    Uart {
        #[arg(long, default_value_t = 0)]
        rx: u8,
        #[arg(long, help = "Baud rate; detected when omitted")]
        uart_baud: Option<u32>,
        #[arg(long, help = "Frame format such as 8N1; detected when omitted")]
        format: Option<String>,
        #[arg(long, help = "Show the characters as Baudot")]
        baudot: bool,
    },
}

fn parse_format(text: &str) -> Option<FrameFormat> {
    let bytes = text.as_bytes();
    if bytes.len() != 3 {
        return None;
    }
    let data_bits = char::from(bytes[0]).to_digit(10)? as u8;
    let parity = match bytes[1].to_ascii_uppercase() {
        b'N' => Parity::None,
        b'E' => Parity::Even,
        b'O' => Parity::Odd,
        _ => return None,
    };
    let stop_bits = char::from(bytes[2]).to_digit(10)? as u8;
    Some(FrameFormat::new(data_bits, parity, stop_bits))
}

fn print_events(buffer: &SampleBuffer, events: &[DecodedEvent]) {
    for event in events {
        println!(
            "{:>8} {:>10}  {event}",
            event.sample(),
            time_with_units(buffer.sample_time(event.sample()))
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut settings = DeviceSettings::new()
        .with_sample_rate(args.rate)
        .with_read_count(args.samples)
        .with_delay_ratio(args.after_trigger);
    if let Some(channel) = args.trigger_low {
        settings = settings.with_simple_trigger(
            TriggerStage::new()
                .set_channel(channel, BitState::Low)
                .then_capture(),
        );
    }
    settings.validate()?;

    let mut analyzer = SumpInterface::open(&args.port, args.baud)?;
    analyzer.verify_id()?;

    println!(
        "Capturing {} samples at {}",
        settings.read_count,
        frequency_with_units(f64::from(settings.sample_rate()))
    );
    let buffer = analyzer.capture(&settings)?;
    println!("✓ Captured {} samples\n", buffer.len());

    if let Some(path) = &args.samples_csv {
        write_csv(&mut samples_frame(&buffer)?, File::create(path)?)?;
        println!("Samples written to {path}");
    }

    let events = match args.protocol {
        Protocol::Spi {
            sck,
            mosi,
            miso,
            nss,
            mode,
            lsb_first,
        } => {
            let mut config = SpiConfig::new(sck, nss)
                .with_mosi(mosi)
                .with_miso(miso)
                .with_mode(SpiMode::try_from(mode)?);
            if lsb_first {
                config = config.lsb_first();
            }
            decode_spi(&buffer, &config)?
        }
        Protocol::I2c { sda, scl } => decode_i2c(&buffer, &I2cConfig::new(sda, scl))?,
        Protocol::Uart {
            rx,
            uart_baud,
            format,
            baudot,
        } => {
            let mut config = UartConfig::new(rx);
            if let Some(baud) = uart_baud {
                config = config.with_baud(baud);
            }
            if let Some(text) = format {
                let format = parse_format(&text).ok_or(format!("Invalid frame format: {text}"))?;
                config = config.with_format(format);
            }

            let decoded = decode_uart(&buffer, &config)?;
            if let Some(estimate) = &decoded.baud_estimate {
                println!(
                    "Detected {:.0} baud, nearest standard {} ({:+.1}%)",
                    estimate.measured, estimate.standard, estimate.deviation_percent
                );
            }
            println!("Framing: {}", decoded.format);
            if baudot {
                println!("Text: {}\n", decode_baudot_events(&decoded.events));
            } else {
                println!("Text: {}\n", decoded.text());
            }
            decoded.events
        }
    };

    print_events(&buffer, &events);

    if let Some(path) = &args.events_csv {
        write_csv(&mut events_frame(&events, &buffer)?, File::create(path)?)?;
        println!("\nEvents written to {path}");
    }

    Ok(())
}
