//! CLI surface: `-t`/`--test`, `-c`/`--check`, `-p <pit>`, device selection
//! flags, positional tar paths (`-` = stdin). Exit code 0 on success,
//! non-zero on any error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use thor_flash::orchestrator::{self, Image};
use thor_flash::pit;
use thor_flash::session::SessionController;
use thor_flash::source::file::{FileSink, FileSource};
use thor_flash::source::tar::TarSource;
use thor_flash::transport::discover::{self, DeviceFilter};
use thor_flash::transport::Flavor;
use thor_flash::util::logging::{init_logger, LogVerbosity};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    Thor,
    Odin,
}

/// Host-side Thor/Odin flashing tool.
#[derive(Debug, Parser)]
#[command(name = "thor-flash", version, about = "Pipelined USB flashing for Tizen (Thor) and legacy Samsung (Odin) download mode")]
struct Cli {
    /// Don't flash, just check if the given tar files are well-formed.
    #[arg(short = 't', long)]
    test: bool,

    /// Don't flash, just check if the device speaks the selected protocol.
    #[arg(short = 'c', long)]
    check: bool,

    /// Flash a new partition table (Odin only). With tar arguments, sent
    /// before them.
    #[arg(short = 'p', long = "pitfile", value_name = "PITFILE")]
    pit: Option<PathBuf>,

    /// Dump the device's PIT to this path instead of flashing (Odin only).
    #[arg(long, value_name = "OUT", conflicts_with_all = ["test", "check"])]
    dump_pit: Option<PathBuf>,

    /// Which protocol to speak.
    #[arg(long, value_enum, default_value_t = Protocol::Thor)]
    protocol: Protocol,

    /// Flash the device with the given busid (e.g. "1-4").
    #[arg(short = 'b', long)]
    busid: Option<String>,

    /// Flash the device with the given USB vendor id (hex or decimal).
    #[arg(long, value_parser = parse_u16)]
    vendor_id: Option<u16>,

    /// Flash the device with the given USB product id (hex or decimal).
    #[arg(long, value_parser = parse_u16)]
    product_id: Option<u16>,

    /// Flash the device with the given USB serial number.
    #[arg(long)]
    serial: Option<String>,

    /// Be more verbose. Repeat for debug-level logging.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Tar archives to flash, in order. Use "-" for stdin.
    tars: Vec<PathBuf>,
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let s = s.trim();
    let parsed =
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) { u16::from_str_radix(hex, 16) } else { s.parse() };
    parsed.map_err(|e| format!("invalid numeric id '{}': {}", s, e))
}

fn main() {
    let cli = Cli::parse();
    init_logger(match cli.verbose {
        0 => LogVerbosity::Normal,
        1 => LogVerbosity::Verbose,
        _ => LogVerbosity::Debug,
    });

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.test {
        return test_tars(&cli.tars);
    }

    let flavor = match cli.protocol {
        Protocol::Thor => Flavor::Thor,
        Protocol::Odin => Flavor::Odin,
    };
    let filter = DeviceFilter { vendor_id: cli.vendor_id, product_id: cli.product_id, busid: cli.busid.clone(), serial: cli.serial.clone() };

    if cli.check {
        let device = discover::open(&filter, flavor, Duration::from_millis(4000)).context("opening device")?;
        let mut session = SessionController::new(device);
        session.handshake().context("handshake")?;
        println!("device is {:?}-capable", flavor);
        return Ok(());
    }

    if let Some(out) = &cli.dump_pit {
        let device = discover::open(&filter, flavor, Duration::from_millis(4000)).context("opening device")?;
        let mut session = SessionController::new(device);
        session.handshake().context("handshake")?;
        session.start_session(0).context("start_session")?;
        let mut sink = FileSink::create(out).with_context(|| format!("creating {}", out.display()))?;
        let pb = pit_progress_bar();
        pit::dump_pit(session.device(), &mut sink, |received, _left| pb.set_position(received)).context("dumping PIT")?;
        pb.finish_with_message("done");
        session.end_session().context("end_session")?;
        println!("PIT written to {}", out.display());
        return Ok(());
    }

    if cli.pit.is_none() && cli.tars.is_empty() {
        bail!("nothing to do: pass -p <pitfile> and/or one or more tar archives (or -t/-c)");
    }

    let mut images = Vec::new();
    if let Some(pit_path) = &cli.pit {
        let source = FileSource::open(pit_path).with_context(|| format!("opening {}", pit_path.display()))?;
        images.push(Image::pit(Box::new(source)));
    }
    for tar_path in &cli.tars {
        let source = TarSource::open(tar_path).with_context(|| format!("opening tar archive {}", tar_path.display()))?;
        images.push(Image::normal(Box::new(source)));
    }

    let device = discover::open(&filter, flavor, Duration::from_millis(4000)).context("opening device")?;
    let mut session = SessionController::new(device);

    let pb = ProgressBar::new(images.iter().map(|i| i.source.total_size()).sum());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    orchestrator::run(&mut session, images, |progress| {
        pb.set_position(progress.overall_sent);
        pb.set_message(format!("{} ({:.1} MB/s avg)", progress.file_name, progress.average_mbps));
    })
    .context("flashing failed")?;

    pb.finish_with_message("complete");
    println!("done");
    Ok(())
}

fn test_tars(tars: &[PathBuf]) -> Result<()> {
    if tars.is_empty() {
        bail!("-t/--test requires at least one tar archive");
    }
    for path in tars {
        let mut source = TarSource::open(path).with_context(|| format!("opening tar archive {}", path.display()))?;
        let mut count = 0;
        while source.next_entry().context("reading tar entry")? {
            count += 1;
        }
        println!("{}: {} entries, {} bytes total", path.display(), count, source.total_size());
    }
    Ok(())
}

fn pit_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {bytes} received").unwrap());
    pb
}
