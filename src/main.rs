use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use accelmon::config::{DEFAULT_BAUD_RATE, DEFAULT_PORT};
use accelmon::sink::close_sinks;
use accelmon::{
    BoardLink, ChannelLayout, Controller, CsvSampleSink, DeviceLink, SamplingSession,
    SessionConfig, Sink, StopReason,
};

/// Stream samples from an accelmon board into a CSV file
#[derive(Parser, Debug)]
#[command(name = "accelmon-csv")]
struct Args {
    /// Maximum number of samples to record (0 = no maximum)
    #[arg(short, long, default_value_t = 0)]
    max_count: u64,

    /// Collection time in seconds (0 = no timeout)
    #[arg(short, long, default_value_t = 0)]
    timeout: u64,

    /// Serial port name
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,

    /// Serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Do not write a header row
    #[arg(long)]
    no_header: bool,

    /// Write values with this many decimals instead of the shortest exact form
    #[arg(long)]
    precision: Option<usize>,

    /// CSV file for data output
    filename: PathBuf,
}

fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .context("failed to initialise logger")?;

    let args = Args::parse();

    log::info!("starting capture");
    log::debug!("{:?}", args);

    let mut link = BoardLink::open_serial(&args.port, args.baud)?;

    let identity = link.board_id().context("board identity query failed")?;
    log::info!(
        "board ID: {}, accelerometer: {:?}",
        identity.board_id(),
        identity.accelerometer_type()
    );

    let layout = ChannelLayout::for_board(&identity, &mut link)?;

    log::info!("creating sink {:?}", args.filename);
    let mut csv = CsvSampleSink::new(&args.filename, layout.width);
    if args.no_header {
        csv = csv.without_header();
    }
    if let Some(decimals) = args.precision {
        csv = csv.with_precision(decimals);
    }
    csv.open()
        .with_context(|| format!("failed to open {:?}", args.filename))?;

    let config = SessionConfig::new(args.port.as_str())
        .with_max_sample_count(args.max_count)
        .with_timeout(Duration::from_secs(args.timeout));

    let controller = Controller::builder(link, config)
        .layout(layout)
        .sink(Box::new(csv) as Box<dyn Sink>)
        .build()?;

    let session = SamplingSession::start(controller)?;

    let stop_handle = session.handle().clone();
    ctrlc::set_handler(move || {
        log::info!("interrupted, stopping");
        stop_handle.stop_collection();
    })
    .context("failed to install Ctrl-C handler")?;

    let mut heartbeat = 0;
    while !session.is_finished() {
        heartbeat += 1;
        let counters = session.counters();
        log::info!(
            "..{} ({} samples, {} dropped)",
            heartbeat,
            counters.collected,
            counters.dropped
        );
        thread::sleep(Duration::from_secs(1));
    }

    let (report, controller) = session.join()?;

    log::info!("closing sink");
    let mut sinks = controller.into_sinks();
    let close_failures = close_sinks(&mut sinks);

    for failure in &report.sink_failures {
        log::error!(
            "sink {} failed {} writes, first error: {}",
            failure.sink,
            failure.failed_writes,
            failure.first_error
        );
    }

    println!("{}", report.summary());

    if let StopReason::LinkLost(cause) = &report.reason {
        anyhow::bail!("sampling ended early, board link lost: {}", cause);
    }
    if !report.sink_failures.is_empty() || !close_failures.is_empty() {
        anyhow::bail!("some samples could not be written to {:?}", args.filename);
    }

    Ok(())
}
