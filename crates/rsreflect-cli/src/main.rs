use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use rsreflect::{config::Config, driver, Emit, Overrides};

#[derive(Parser)]
#[command(name = "rsreflect")]
#[command(about = "Export analysis and reflection for RenderScript translation units", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile translation units and write descriptors or plans
    Compile {
        /// Unit files (JSON) or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Config file (defaults to ./rsreflect.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target API level
        #[arg(short, long)]
        api: Option<u32>,

        /// Compile in the strict (Filterscript) dialect
        #[arg(long)]
        strict: bool,

        /// Pointer width in bits (32 or 64)
        #[arg(long)]
        pointer_width: Option<u32>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// What to write per file
        #[arg(short, long, value_enum)]
        emit: Option<Emit>,
    },

    /// Only check the units, writing nothing
    Check {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        api: Option<u32>,

        #[arg(long)]
        strict: bool,
    },

    /// Print a binary descriptor file as JSON
    Inspect {
        /// Descriptor file (.rstd)
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::TRACE
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(cli.debug)
        .init();

    match cli.command {
        Commands::Compile {
            inputs,
            config,
            api,
            strict,
            pointer_width,
            output,
            emit,
        } => {
            let mut settings = Config::discover(config.as_deref(), &std::env::current_dir()?)?;
            settings.apply(Overrides {
                target_api: api,
                strict_dialect: strict,
                pointer_width,
                output_dir: output,
                emit,
            });
            let outcome = driver::run(&settings, &inputs)?;
            for path in &outcome.written {
                info!("Generated {}", path.display());
            }
            finish(&outcome.summary)
        }
        Commands::Check {
            inputs,
            config,
            api,
            strict,
        } => {
            let mut settings = Config::discover(config.as_deref(), &std::env::current_dir()?)?;
            settings.apply(Overrides {
                target_api: api,
                strict_dialect: strict,
                ..Overrides::default()
            });
            let outcome = driver::check(&settings, &inputs)?;
            for report in &outcome.reports {
                if !report.diagnostics.is_empty() {
                    println!("{}:\n{}", report.file, report.diagnostics);
                }
            }
            finish(&outcome.summary)
        }
        Commands::Inspect { file } => {
            println!("{}", driver::inspect(&file)?);
            Ok(())
        }
    }
}

fn finish(summary: &rsreflect_core::BatchSummary) -> Result<()> {
    if summary.is_success() {
        Ok(())
    } else {
        bail!(
            "{} of {} file(s) failed: {}",
            summary.failed.len(),
            summary.files,
            summary.failed.join(", ")
        )
    }
}
