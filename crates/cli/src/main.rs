use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use thinstack_cli::config::CliConfig;
use thinstack_cli::logging::{self, LogFormat};
use thinstack_cli::runner;

#[derive(Parser)]
#[command(name = "thinstack", about = "Batched thin-stack shift-reduce encoder")]
struct Cli {
    /// Log level when RUST_LOG is unset (e.g. "debug", "warn")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a JSONL file of parsed examples
    Run {
        /// Model spec (TOML or JSON)
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Safetensors weights (can be repeated)
        #[arg(long)]
        weights: Vec<PathBuf>,

        /// Input examples, one JSON object per line
        #[arg(long)]
        input: PathBuf,

        /// Write encodings here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Run on CUDA device 0
        #[arg(long, conflicts_with = "cpu")]
        cuda: bool,

        /// Run on the CPU, overriding a stored `cuda = true`
        #[arg(long)]
        cpu: bool,

        /// Store --spec, --weights, the device choice and --log-level as defaults
        #[arg(long)]
        save_config: bool,
    },
    /// Check examples against a spec without loading weights
    Validate {
        /// Model spec (TOML or JSON)
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Input examples, one JSON object per line
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load();

    match cli.command {
        Command::Run {
            spec,
            weights,
            input,
            output,
            cuda,
            cpu,
            save_config,
        } => {
            config.merge(&CliConfig::from_run_flags(
                spec,
                &weights,
                cuda,
                cpu,
                cli.log_level,
            ));
            logging::init(config.log_level.as_deref(), LogFormat::from_env())?;
            if save_config {
                let path = config.save()?;
                tracing::info!(path = %path.display(), "Saved config");
            }

            let spec_path = config.spec.clone().context("no --spec given and none in config")?;
            let weights = config
                .weights
                .clone()
                .context("no --weights given and none in config")?;

            let spec = runner::load_spec(&spec_path)?;
            let examples = runner::read_examples(&input)?;
            let device = runner::select_device(config.cuda.unwrap_or(false))?;
            tracing::info!(
                examples = examples.len(),
                batch_size = spec.batch_size,
                ?device,
                "Running thin stack"
            );

            let encodings = runner::run(&spec, &weights, &examples, &device)?;
            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            serde_json::to_writer_pretty(&mut out, &encodings)?;
            writeln!(out)?;
            out.flush()?;
        }
        Command::Validate { spec, input } => {
            config.merge(&CliConfig {
                spec,
                log_level: cli.log_level,
                ..Default::default()
            });
            logging::init(config.log_level.as_deref(), LogFormat::from_env())?;

            let spec_path = config.spec.clone().context("no --spec given and none in config")?;
            let spec = runner::load_spec(&spec_path)?;
            let examples = runner::read_examples(&input)?;
            let report = runner::validate(&spec, &examples);

            for (index, reason) in &report.errors {
                tracing::error!(example = index, %reason, "Invalid example");
            }
            println!("{}/{} examples valid", report.valid, report.total);
            if !report.is_ok() {
                anyhow::bail!("{} invalid examples", report.errors.len());
            }
        }
    }
    Ok(())
}
