// Device identification example
//
// This example opens a SUMP analyzer, checks its ID string and prints the
// metadata it reports.

use clap::Parser;
use logicsniffer_rs::units::frequency_with_units;
use logicsniffer_rs::{SumpInterface, DEFAULT_BAUD};

#[derive(Parser)]
#[command(name = "device_info")]
#[command(version = "1.0")]
#[command(about = "Identify a SUMP logic analyzer and list its metadata")]
struct Args {
    /// Serial port the analyzer is attached to
    port: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD, help = "Serial baud rate")]
    baud: u32,

    #[arg(short, long, help = "Show debug information and the raw command stream")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Trace)
            .init();
    } else {
        env_logger::init();
    }

    let mut analyzer = SumpInterface::open(&args.port, args.baud)?;

    let id = analyzer.id_string()?;
    println!("ID: {}", String::from_utf8_lossy(&id));
    analyzer.verify_id()?;

    let entries = analyzer.query_metadata()?;
    if entries.is_empty() {
        println!("The device reported no metadata");
        return Ok(());
    }
    println!("\nMetadata:");
    for entry in &entries {
        println!("  {entry}");
    }

    let info = logicsniffer_rs::DeviceInfo::from_entries(&entries);
    if let Some(rate) = info.max_sample_rate {
        println!("\nMaximum sample rate: {}", frequency_with_units(f64::from(rate)));
    }
    if let Some(memory) = info.sample_memory {
        println!("Sample memory: {memory} bytes");
    }

    Ok(())
}
