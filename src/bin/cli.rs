use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mpegts_demux::packet::PacketFormat;
use mpegts_demux::{
    AnalysisMode, PacketMeta, PacketProcessor, ProcessorConfig, Reporter, StreamSnapshot,
};

/// Enough for three 204-byte units, so every framing can show two syncs.
const DETECT_LEN: usize = 612;

#[derive(Parser)]
#[command(about = "Demultiplex an MPEG-2 transport stream and report TR 101 290 errors")]
struct Opt {
    /// Transport stream file, or "-" for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Analysis preset
    #[arg(long, value_enum, default_value_t = AnalysisMode::Tr101)]
    mode: AnalysisMode,

    /// JSON processor configuration (overrides the preset)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Program model saved earlier with --snapshot
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Write the program model here at the end of the stream
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Also print a report every N packets
    #[arg(long)]
    report_every: Option<u64>,

    /// Pretty-print the JSON reports
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn load_config(opt: &Opt) -> anyhow::Result<ProcessorConfig> {
    match &opt.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(ProcessorConfig::for_mode(opt.mode)),
    }
}

fn open_input(input: &str) -> anyhow::Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(input).with_context(|| format!("opening {input}"))?;
    Ok(Box::new(io::BufReader::new(file)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::parse();
    let config = load_config(&opt)?;
    let mut processor = PacketProcessor::new(config).context("creating processor")?;

    if let Some(path) = &opt.restore {
        let file =
            File::open(path).with_context(|| format!("opening snapshot {}", path.display()))?;
        let snapshot: StreamSnapshot = serde_json::from_reader(file)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        processor.restore(&snapshot);
    }

    let mut reader = open_input(&opt.input)?;
    let mut head = Vec::with_capacity(DETECT_LEN);
    reader
        .by_ref()
        .take(DETECT_LEN as u64)
        .read_to_end(&mut head)
        .context("reading stream head")?;
    let Some(format) = PacketFormat::detect(&head) else {
        bail!("no transport stream sync found in the first {} bytes", head.len());
    };
    info!(?format, "detected packet framing");

    let mut stream = Cursor::new(head).chain(reader);
    let mut unit = vec![0u8; format.size()];
    let meta = PacketMeta::default();
    loop {
        match stream.read_exact(&mut unit) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err).context("reading stream"),
        }
        processor.ingest(&unit, &meta)?;

        if let Some(every) = opt.report_every {
            if every > 0 && processor.packets() % every == 0 {
                println!(
                    "{}",
                    Reporter::generate_json_report(&processor, opt.mode, opt.pretty)
                );
            }
        }
    }

    if processor.packets() == 0 {
        warn!("stream ended before a single packet");
    }
    println!(
        "{}",
        Reporter::generate_json_report(&processor, opt.mode, opt.pretty)
    );

    if let Some(path) = &opt.snapshot {
        let file =
            File::create(path).with_context(|| format!("creating snapshot {}", path.display()))?;
        serde_json::to_writer_pretty(file, &Reporter::snapshot(&processor))
            .context("writing snapshot")?;
        info!(path = %path.display(), "program model saved");
    }
    Ok(())
}
