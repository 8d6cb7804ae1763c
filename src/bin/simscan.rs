use anyhow::Result;
use clap::Parser as _;
use owo_colors::OwoColorize;
use pad::PadStr;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::trace;

use simscan::file::FileRecord;
use simscan::filesystem;
use simscan::scan::{self, ScanOptions};
use simscan::transport::PcscChannel;
use simscan::verify::VerifyConfig;

#[derive(clap::Parser, Debug)]
#[command(name = "simscan", about = "UICC/SIM file system scanner")]
struct Args {
    /// Increase log level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// List detected readers and exit.
    #[arg(long)]
    readers: bool,

    /// Reader index to use (see --readers).
    #[arg(long, default_value_t = 0)]
    reader: usize,

    /// Issuer security code 1; enables the full verification script.
    #[arg(long)]
    adm1: Option<String>,

    /// Issuer security code 2.
    #[arg(long)]
    adm2: Option<String>,

    /// Issuer security code 3.
    #[arg(long)]
    adm3: Option<String>,

    /// Issuer security code 4.
    #[arg(long)]
    adm4: Option<String>,

    /// PIN 1 (CHV1 / global PIN); presence enables its verification.
    #[arg(long)]
    chv1: Option<String>,

    /// PIN 2 (CHV2 / local PIN).
    #[arg(long)]
    chv2: Option<String>,

    /// Read EF contents during the 3G pass instead of the 2G pass.
    #[arg(long)]
    content3g: bool,

    /// File system XML for cards without READ HEADER discovery.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Replay script output file.
    #[arg(short, long, default_value = "script.pcom")]
    output: PathBuf,
}

fn options(args: &Args) -> Result<ScanOptions> {
    let mut verify = VerifyConfig::default();
    let mut full_script = false;

    if let Some(adm1) = &args.adm1 {
        full_script = true;
        verify.adm1 = adm1.clone();
    }
    if let Some(adm2) = &args.adm2 {
        verify.use_adm2 = true;
        verify.adm2 = adm2.clone();
    }
    if let Some(adm3) = &args.adm3 {
        verify.use_adm3 = true;
        verify.adm3 = adm3.clone();
    }
    if let Some(adm4) = &args.adm4 {
        verify.use_adm4 = true;
        verify.adm4 = adm4.clone();
    }
    if let Some(chv1) = &args.chv1 {
        verify.chv1_disabled = false;
        verify.chv1 = chv1.clone();
    }
    if let Some(chv2) = &args.chv2 {
        verify.chv2 = chv2.clone();
    }

    let file_system = args.input.as_deref().map(filesystem::load).transpose()?;

    Ok(ScanOptions {
        full_script,
        read_content_3g: args.content3g,
        verify,
        file_system,
    })
}

fn summarize(records: &[FileRecord]) {
    for rec in records {
        let kind = rec
            .file_type
            .map_or_else(|| "??".to_string(), |t| t.to_string());
        let mut line = format!("{} {}", rec.path.to_string().pad_to_width(24), kind);
        if let Some(structure) = rec.structure {
            line.push_str(&format!("  {}", structure.to_string().pad_to_width(12)));
        }
        if let Some(size) = rec.size {
            line.push_str(&format!(" {:>5} bytes", size));
        }
        if let (Some(count), Some(record_size)) = (rec.record_count, rec.record_size) {
            line.push_str(&format!(" ({} x {})", count, record_size));
        }
        if rec.status.is_some() {
            println!("{} {}", line, "invalidated".red());
        } else {
            println!("{}", line);
        }
    }
}

fn init_logging(args: &Args) {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(match (2 + args.verbose).saturating_sub(args.quiet) {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            4.. => tracing::Level::TRACE,
        })
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    trace!(?args, "Starting up");

    if args.readers {
        let readers = PcscChannel::list_readers()?;
        if readers.is_empty() {
            tracing::error!("No smartcard reader(s) detected.");
        }
        for (index, name) in readers.iter().enumerate() {
            println!("{}: {}", index, name);
        }
        return Ok(());
    }

    let opts = options(&args)?;
    let channel = PcscChannel::open(args.reader)?;
    let sink = io::BufWriter::new(File::create(&args.output)?);
    let records = scan::run(channel, sink, &opts)?;

    summarize(&records);
    println!(
        "\n{} files scanned; replay script written to {}",
        records.len().bold(),
        args.output.display()
    );
    Ok(())
}
