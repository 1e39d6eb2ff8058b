use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::error;

use crisprtally::aligner::{BoundaryMode, Rules};
use crisprtally::config::RunConfig;
use crisprtally::dispatch::{READ_CHUNK, READ_CHUNK_LONG};
use crisprtally::library::Library;
use crisprtally::logging::{self, LogLevel};
use crisprtally::merge::Checksum;
use crisprtally::{merge, pairing, single, TallyError};

#[derive(Parser)]
#[command(name = "crisprtally")]
#[command(author, version, about = "Count sequencing reads supporting each guide of a CRISPR library", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Logging level
    #[arg(short = 'l', long, global = true, value_enum, ignore_case = true, default_value = "INFO")]
    loglevel: LogLevel,
}

#[derive(Subcommand)]
enum Commands {
    /// Count reads for a single-guide library
    SingleGuide {
        #[command(flatten)]
        common: CountArgs,
    },

    /// Count read pairs for a dual-guide library (interleaved FASTQ)
    DualGuide {
        #[command(flatten)]
        common: CountArgs,

        /// Trim reads to this length before mapping, 0 disables
        #[arg(short = 't', long, value_name = "INT", default_value = "0")]
        trimseq: usize,
    },

    /// Count long reads that contain a guide sequence
    LongRead {
        #[command(flatten)]
        common: CountArgs,

        /// Only generate the unique sequence counts file, --guidelib can be omitted
        #[arg(long)]
        unique: bool,
    },

    /// Merge count files from several single-guide runs of the same sample
    Merge {
        /// Output file prefix
        #[arg(short = 'o', long, value_name = "PREFIX")]
        output: PathBuf,

        /// Report guides with fewer than this many reads
        #[arg(long, value_name = "INT")]
        low_count: Option<u64>,

        /// Checksum used for provenance header lines
        #[arg(long, value_enum, default_value = "sha1")]
        checksum: Checksum,

        /// Count files (*.counts.tsv[.gz]) with stats.json beside them
        #[arg(value_name = "COUNTS", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Write the distinct guide sequences as FASTA
    GuidesToFa {
        /// Guide library file
        #[arg(short = 'g', long, value_name = "TSV")]
        guidelib: PathBuf,

        /// Output FASTA file
        #[arg(short = 'f', long, value_name = "FASTA")]
        fasta: PathBuf,
    },
}

#[derive(Args)]
struct CountArgs {
    /// Guide library file
    #[arg(short = 'g', long, value_name = "TSV")]
    guidelib: Option<PathBuf>,

    /// Reads as FASTQ, optionally gzip compressed
    #[arg(short = 'q', long, value_name = "FASTQ")]
    queries: PathBuf,

    /// Sample name, required for FASTQ input
    #[arg(short = 's', long)]
    sample: Option<String>,

    /// Output file prefix
    #[arg(short = 'o', long, value_name = "PREFIX")]
    output: PathBuf,

    /// Scratch folder for intermediate files (temporary folder when omitted)
    #[arg(short = 'w', long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Allowed edits for a hit, e.g. M, MM, MDI; repeat for several rules
    #[arg(long = "rules", value_name = "RULE")]
    rules: Vec<String>,

    /// Report guides with fewer than this many reads
    #[arg(long, value_name = "INT")]
    low_count: Option<u64>,

    /// CPUs to use, 0 to detect
    #[arg(short = 'c', long, value_name = "INT", default_value = "1")]
    cpus: usize,

    /// Minimum alignment score
    #[arg(short = 'm', long, value_name = "INT", default_value = "15")]
    minscore: u32,

    /// Drop reads flagged as QC fail
    #[arg(short = 'e', long = "excludeqcf")]
    excludeqcf: bool,

    /// all, exact, TinQ (target in query) or QinT (query in target)
    #[arg(short = 'b', long, value_name = "MODE", default_value = "all")]
    boundary_mode: BoundaryMode,

    /// Unique reads per worker chunk
    #[arg(long, value_name = "INT")]
    chunks: Option<usize>,
}

impl CountArgs {
    fn into_config(self, command: String, default_chunks: usize, trimseq: usize) -> Result<RunConfig> {
        Ok(RunConfig {
            guidelib: self.guidelib,
            queries: self.queries,
            sample: self.sample,
            output: self.output,
            workspace: self.workspace,
            rules: Rules::parse(&self.rules)?,
            low_count: self.low_count,
            cpus: self.cpus,
            minscore: self.minscore,
            exclude_qcfail: self.excludeqcf,
            boundary_mode: self.boundary_mode,
            chunks: self.chunks.unwrap_or(default_chunks),
            trimseq,
            command,
        })
    }
}

/// Command line as recorded in output headers: program basename followed by the arguments.
fn command_line() -> String {
    let mut args = std::env::args();
    let program = args
        .next()
        .map(|p| {
            Path::new(&p)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or(p)
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    std::iter::once(program).chain(args).collect::<Vec<_>>().join(" ")
}

fn run(command: Commands) -> Result<()> {
    let cmd_line = command_line();
    match command {
        Commands::SingleGuide { common } => {
            let cfg = common.into_config(cmd_line, READ_CHUNK, 0)?;
            single::run(&cfg)
        }
        Commands::DualGuide { common, trimseq } => {
            let cfg = common.into_config(cmd_line, READ_CHUNK, trimseq)?;
            pairing::run(&cfg)
        }
        Commands::LongRead { common, unique } => {
            let cfg = common.into_config(cmd_line, READ_CHUNK_LONG, 0)?;
            single::run_long_read(&cfg, unique)
        }
        Commands::Merge {
            output,
            low_count,
            checksum,
            inputs,
        } => {
            merge::merge(&inputs, &output, low_count, checksum, &cmd_line)?;
            Ok(())
        }
        Commands::GuidesToFa { guidelib, fasta } => {
            let library = Library::load(&guidelib)?;
            library.write_fasta(&fasta)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_logger(cli.loglevel.into());

    if let Err(e) = run(cli.command) {
        error!("{:#}", e);
        let code = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<TallyError>())
            .map(|t| t.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
