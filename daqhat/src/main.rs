//! # daqhat binary
//!
//! Lists the boards on a (simulated) stack and runs hardware-paced scans,
//! printing rows as they arrive.
//!
//! # Usage
//!
//! ```bash
//! # Boards on the backplane described by a config file
//! daqhat --config daqhat.toml list
//!
//! # 1000 rows from channels 0 and 1 of board 0 at 1 kS/s
//! daqhat scan --address 0 --channels 0,1 --rate 1000 --samples 1000
//!
//! # Continuous scan until Ctrl-C, JSON output
//! daqhat --json scan -a 0 -c 0 -r 100 --continuous
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand, ValueEnum};
use daqhat::drivers::simulation::SimulatedSystem;
use daqhat::{Hat, ReadRequest, ScanRead, Wait};
use daqhat_common::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Board-support tool for stacked DAQ HATs
#[derive(Parser, Debug)]
#[command(name = "daqhat")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "List boards and run hardware-paced scans on a DAQ HAT stack")]
#[command(long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and data in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List detected boards
    List,
    /// Run a scan and print the rows
    Scan(ScanArgs),
    /// Read one value from one channel
    Read {
        /// Board address
        #[arg(short, long, default_value_t = 0)]
        address: u8,
        /// Channel number
        #[arg(short = 'n', long, default_value_t = 0)]
        channel: u8,
        /// Return ADC codes instead of volts
        #[arg(long)]
        no_scale: bool,
        /// Skip calibration
        #[arg(long)]
        no_calibrate: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Board address
    #[arg(short, long, default_value_t = 0)]
    address: u8,

    /// Channels to scan, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    channels: Vec<u8>,

    /// Requested per-channel rate in samples/s
    #[arg(short, long, default_value_t = 1000.0)]
    rate: f64,

    /// Rows per channel (buffer size hint with --continuous)
    #[arg(short, long, default_value_t = 1000)]
    samples: u32,

    /// Run until Ctrl-C
    #[arg(long)]
    continuous: bool,

    /// Hold off until the trigger input fires
    #[arg(long)]
    ext_trigger: bool,

    /// Trigger condition used with --ext-trigger
    #[arg(long, value_enum, default_value_t = TriggerArg::Rising)]
    trigger_mode: TriggerArg,

    /// Return ADC codes instead of volts
    #[arg(long)]
    no_scale: bool,

    /// Skip calibration
    #[arg(long)]
    no_calibrate: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TriggerArg {
    Rising,
    Falling,
    High,
    Low,
}

impl From<TriggerArg> for TriggerMode {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Rising => Self::RisingEdge,
            TriggerArg::Falling => Self::FallingEdge,
            TriggerArg::High => Self::ActiveHigh,
            TriggerArg::Low => Self::ActiveLow,
        }
    }
}

#[derive(Serialize)]
struct BoardLine {
    address: u8,
    model: BoardModel,
    product_id: u16,
    channels: u8,
}

#[derive(Serialize)]
struct RowLine<'a> {
    row: u64,
    values: &'a [f64],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("daqhat failed: {}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = DaqConfig::load_or_default(args.config.as_deref())?;

    setup_tracing(&args, &config);
    debug!("daqhat v{} starting", env!("CARGO_PKG_VERSION"));

    if config.simulation.boards.is_empty() {
        info!("No boards configured, seating a demo MCC 118 at address 0");
        config.simulation.boards.push(demo_board());
    }
    let system = SimulatedSystem::from_config(&config)?;

    match args.command {
        Command::List => list_boards(&system, args.json)?,
        Command::Scan(scan) => {
            let running = Arc::new(AtomicBool::new(true));
            let handler_flag = running.clone();
            ctrlc::set_handler(move || {
                info!("Received shutdown signal");
                handler_flag.store(false, Ordering::SeqCst);
            })?;

            let hat = system.registry.open(scan.address)?;
            let result = run_scan(&hat, &scan, args.json, &running);
            drop(hat);
            system.registry.close(scan.address)?;
            result?;
        }
        Command::Read {
            address,
            channel,
            no_scale,
            no_calibrate,
        } => {
            let hat = system.registry.open(address)?;
            let value = hat.read_single_value(channel, options_from(no_scale, no_calibrate));
            drop(hat);
            system.registry.close(address)?;
            let value = value?;
            if args.json {
                println!("{}", serde_json::json!({ "address": address, "channel": channel, "value": value }));
            } else {
                println!("{value:.6}");
            }
        }
    }
    Ok(())
}

fn demo_board() -> SimBoardConfig {
    SimBoardConfig {
        address: 0,
        model: BoardModel::Mcc118,
        waveforms: (0..MAX_CHANNELS)
            .map(|ch| Waveform::Sine {
                amplitude: 1.0 + ch as f64,
                frequency: 5.0,
                offset: 0.0,
            })
            .collect(),
        calibration: Vec::new(),
    }
}

fn options_from(no_scale: bool, no_calibrate: bool) -> ScanOptions {
    let mut options = ScanOptions::empty();
    options.set(ScanOptions::NO_SCALE, no_scale);
    options.set(ScanOptions::NO_CALIBRATE, no_calibrate);
    options
}

fn list_boards(system: &SimulatedSystem, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let boards: Vec<BoardLine> = system
        .registry
        .discover()
        .into_iter()
        .map(|(address, model)| BoardLine {
            address,
            model,
            product_id: model.product_id(),
            channels: model.info().channel_count,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&boards)?);
    } else if boards.is_empty() {
        println!("No boards found");
    } else {
        for board in &boards {
            println!(
                "{}: {} (0x{:04X}), {} channels",
                board.address, board.model, board.product_id, board.channels
            );
        }
    }
    Ok(())
}

fn run_scan(
    hat: &Hat,
    scan: &ScanArgs,
    json: bool,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mask = scan.channels.iter().try_fold(0u8, |mask, &ch| {
        if usize::from(ch) >= MAX_CHANNELS {
            Err(DaqError::bad_parameter(format!("channel {ch} out of range")))
        } else {
            Ok(mask | (1 << ch))
        }
    })?;

    let mut options = options_from(scan.no_scale, scan.no_calibrate);
    options.set(ScanOptions::CONTINUOUS, scan.continuous);
    if scan.ext_trigger {
        options |= ScanOptions::EXT_TRIGGER;
        hat.configure_trigger(SourceRole::Local, scan.trigger_mode.into())?;
    }

    let rate = hat.start_scan(mask, scan.samples, scan.rate, options)?;
    info!(address = hat.address(), requested = scan.rate, rate, "Scanning");

    // About 100 ms of data per read.
    let chunk = ((rate / 10.0) as usize).clamp(1, 10_000);
    let mut next_row = 0u64;
    let mut overrun_reported = false;
    loop {
        if !running.load(Ordering::SeqCst) && hat.status()?.status.running() {
            hat.stop()?;
        }

        let read = hat.read(ReadRequest::Rows(chunk), Wait::For(Duration::from_millis(100)))?;
        print_rows(&read, &mut next_row, json)?;

        if let Some(fault) = read.fault {
            hat.cleanup()?;
            return Err(fault.into());
        }
        if read.status.overrun() && !overrun_reported {
            warn!(status = ?read.status, "Scan overrun, data was lost");
            overrun_reported = true;
        }
        if !read.status.running() && read.rows < chunk {
            break;
        }
    }

    hat.cleanup()?;
    info!(rows = next_row, "Scan finished");
    Ok(())
}

fn print_rows(read: &ScanRead, next_row: &mut u64, json: bool) -> Result<(), serde_json::Error> {
    if read.rows == 0 {
        return Ok(());
    }
    let channels = read.samples.len() / read.rows;
    for values in read.samples.chunks_exact(channels) {
        if json {
            let line = RowLine {
                row: *next_row,
                values,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            let cells: Vec<String> = values.iter().map(|v| format!("{v:12.6}")).collect();
            println!("{:8} {}", next_row, cells.join(" "));
        }
        *next_row += 1;
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and `[shared]` config.
fn setup_tracing(args: &Args, config: &DaqConfig) {
    let level = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_filter()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout carries only data.
    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
