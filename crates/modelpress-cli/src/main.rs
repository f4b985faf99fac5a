//! Modelpress CLI - convert a trained model into a quantized on-device file.
//!
//! Running `modelpress` with no arguments converts the bundled classifier at its
//! default location, so existing build scripts keep working unchanged.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelpress_core::{
    format_megabytes, identify_file, FileFormat, GgufReader, IoResultExt, ModelConverter,
    OptimizationMode, PathsConfig, PressError,
};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "modelpress", version)]
#[command(about = "Convert SafeTensors checkpoints into quantized GGUF models")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a model (the default when no command is given)
    Convert(ConvertArgs),
    /// Print the header, metadata and tensors of a GGUF file
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Trained model to read
    #[arg(short, long, default_value = PathsConfig::DEFAULT_SOURCE_PATH)]
    source: PathBuf,

    /// Where to write the converted model
    #[arg(short, long, default_value = PathsConfig::DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Weight encoding: default (8-bit), float16 or none
    #[arg(short, long, default_value = "default")]
    mode: OptimizationMode,

    /// Parse the converted model back before writing it
    #[arg(long)]
    verify: bool,

    /// Also write <output>.meta.json with conversion provenance
    #[arg(long)]
    sidecar: bool,

    /// Print the conversion report as JSON
    #[arg(long)]
    json: bool,
}

impl Default for ConvertArgs {
    fn default() -> Self {
        Self {
            source: PathBuf::from(PathsConfig::DEFAULT_SOURCE_PATH),
            output: PathBuf::from(PathsConfig::DEFAULT_OUTPUT_PATH),
            mode: OptimizationMode::Default,
            verify: false,
            sidecar: false,
            json: false,
        }
    }
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// GGUF file to read
    path: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging; stdout is reserved for the report
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let (result, hint) =
        match args.command.unwrap_or_else(|| Command::Convert(ConvertArgs::default())) {
            Command::Convert(convert) => (
                run_convert(convert),
                "Please place the trained model at that path or pass --source <PATH>.",
            ),
            Command::Inspect(inspect) => (
                run_inspect(inspect),
                "Check the path given to inspect; it should name a converted GGUF file.",
            ),
        };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err, hint),
    }
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    debug!("Convert arguments: {:?}", args);

    let converter = ModelConverter::builder()
        .mode(args.mode)
        .verify(args.verify)
        .with_sidecar(args.sidecar)
        .build();
    let report = converter.convert(&args.source, &args.output)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Model converted and saved to {}", report.dest_path.display());
        println!("Original model size: {}", format_megabytes(report.source_bytes));
        println!("Converted model size: {}", format_megabytes(report.dest_bytes));
        println!("Conversion completed successfully.");
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let path = args.path.as_path();
    if !path.exists() {
        return Err(PressError::NotFound(path.to_path_buf()).into());
    }
    let format = identify_file(path)?;
    if format != FileFormat::Gguf {
        return Err(PressError::invalid_format(
            "gguf",
            path,
            format!("{} is a {} file, not GGUF", path.display(), format),
        )
        .into());
    }
    let bytes = std::fs::read(path).with_path(path)?;
    let reader = GgufReader::new(&bytes)
        .map_err(|e| with_file(e, path))
        .with_context(|| format!("Failed to inspect {}", path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(reader.header())?);
        return Ok(());
    }

    let header = reader.header();
    println!("{}", path.display());
    println!("  GGUF version: {}", header.version);
    println!("  Alignment:    {}", header.alignment);
    println!("  File size:    {}", format_megabytes(bytes.len() as u64));
    println!();
    println!("Metadata ({} keys):", header.metadata.len());
    for (key, value) in &header.metadata {
        println!("  {key} = {value}");
    }
    println!();
    println!("Tensors ({}):", header.tensors.len());
    let width = header.tensors.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for tensor in &header.tensors {
        println!(
            "  {:<width$}  {:<5}  {:>10} bytes  {:?}",
            tensor.name,
            tensor.dtype.as_str(),
            tensor.size,
            tensor.shape,
        );
    }
    Ok(())
}

/// Attach the file path to a parse error.
fn with_file(err: PressError, path: &Path) -> PressError {
    match err {
        PressError::InvalidFormat { format, message, .. } => PressError::InvalidFormat {
            format,
            message,
            path: Some(path.to_path_buf()),
        },
        other => other,
    }
}

/// Print `err` to stderr and map it to an exit code.
///
/// `hint` is the follow-up line printed for a missing file, worded for the
/// subcommand that failed.
fn report_error(err: &anyhow::Error, hint: &str) -> ExitCode {
    let Some(press) = err.downcast_ref::<PressError>() else {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    };

    match press {
        PressError::NotFound(path) => {
            eprintln!("Error: Model file {} not found.", path.display());
            eprintln!("{hint}");
        }
        _ => eprintln!("Error: {err:#}"),
    }
    ExitCode::from(press.exit_code() as u8)
}
