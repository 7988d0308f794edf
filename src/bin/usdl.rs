//! USDL CLI
//!
//! Command-line interface for converting, inspecting and linting Avro,
//! Protobuf and JSON Schema definitions.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use usdl::{
    assign_field_numbers, lint, load_schema_auto, render, FileStatus, Format, LintResult,
    RenderOptions, SchemaError, Severity,
};

#[derive(Parser)]
#[command(name = "usdl")]
#[command(about = "Convert schemas between Avro, Protobuf and JSON Schema")]
#[command(version)]
struct Cli {
    /// Log codec decisions to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a schema into another format
    Convert {
        /// Schema source: file path or URL (http:// or https://)
        source: String,

        /// Target format: avro, protobuf or json-schema
        #[arg(long, value_parser = parse_format)]
        to: Format,

        /// Source format (default: from the file extension)
        #[arg(long, value_parser = parse_format)]
        from: Option<Format>,

        /// Output file (stdout if not specified)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Compact JSON output instead of pretty-printed
        #[arg(long)]
        compact: bool,

        /// Fill in missing Protobuf field numbers before rendering
        #[arg(long)]
        number_fields: bool,
    },

    /// Print the USDL directive tree of a schema
    Inspect {
        /// Schema source: file path or URL (http:// or https://)
        source: String,

        /// Source format (default: from the file extension)
        #[arg(long, value_parser = parse_format)]
        from: Option<Format>,
    },

    /// Lint schema files for errors and conversion hazards
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn parse_format(s: &str) -> Result<Format, String> {
    Format::parse(s).ok_or_else(|| format!("unknown format `{s}` (expected avro, protobuf or json-schema)"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Convert {
            source,
            to,
            from,
            output,
            compact,
            number_fields,
        } => run_convert(&source, from, to, output, compact, number_fields),

        Commands::Inspect { source, from } => run_inspect(&source, from),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "usdl=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print an error and its hint, returning the exit code.
fn report(err: &SchemaError) -> u8 {
    eprintln!("Error: {}", err);
    if let Some(hint) = err.hint() {
        eprintln!("  hint: {}", hint);
    }
    err.exit_code() as u8
}

fn run_convert(
    source: &str,
    from: Option<Format>,
    to: Format,
    output: Option<PathBuf>,
    compact: bool,
    number_fields: bool,
) -> Result<(), u8> {
    let loaded = load_schema_auto(source, from).map_err(|e| report(&e))?;
    let mut schema = loaded.parse().map_err(|e| report(&e))?;
    if number_fields {
        schema = assign_field_numbers(&schema);
    }

    let options = RenderOptions::new().pretty(!compact);
    let rendered = render(&schema, to, &options).map_err(|e| report(&e))?;

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", rendered.trim_end());
        }
    }

    Ok(())
}

fn run_inspect(source: &str, from: Option<Format>) -> Result<(), u8> {
    let loaded = load_schema_auto(source, from).map_err(|e| report(&e))?;
    let schema = loaded.parse().map_err(|e| report(&e))?;

    let tree = serde_json::to_string_pretty(&schema).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", tree);
    Ok(())
}

/// Terminal colour for one piece of lint output.
#[derive(Clone, Copy)]
enum Tone {
    Pass,
    Warn,
    Fail,
}

impl Tone {
    fn paint(self, text: &str) -> String {
        let code = match self {
            Tone::Pass => 32,
            Tone::Warn => 33,
            Tone::Fail => 31,
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn print_lint_report(path: &Path, result: &LintResult, quiet: bool, passed: bool) {
    if !quiet {
        println!("Linting schemas in {} ...\n", path.display());
    }

    for file_result in &result.results {
        if !quiet || file_result.status != FileStatus::Ok {
            let mark = match file_result.status {
                FileStatus::Ok => Tone::Pass.paint("✓"),
                FileStatus::Warning => Tone::Warn.paint("⚠"),
                FileStatus::Error => Tone::Fail.paint("✗"),
            };
            println!("  {} {} ({})", mark, file_result.file.display(), file_result.format);
        }

        for diag in &file_result.diagnostics {
            if quiet && diag.severity != Severity::Error {
                continue;
            }
            let label = match diag.severity {
                Severity::Error => Tone::Fail.paint(&format!("error[{}]", diag.code)),
                Severity::Warning => Tone::Warn.paint(&format!("warning[{}]", diag.code)),
            };
            println!("    {}: {} - {}", label, diag.path, diag.message);
            if let Some(hint) = &diag.hint {
                println!("      hint: {}", hint);
            }
        }
    }

    println!();
    let summary = if passed {
        Tone::Pass.paint(&format!("{} files checked, every schema is valid", result.files_checked))
    } else {
        Tone::Fail.paint(&format!(
            "{} files checked, {} with problems ({} errors, {} warnings)",
            result.files_checked, result.failed, result.errors, result.warnings
        ))
    };
    println!("{summary}");
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(3);
    }

    let result = lint(path, strict);
    let passed = result.is_ok() && (!strict || result.warnings == 0);

    if format == "json" {
        let json = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", json);
    } else {
        print_lint_report(path, &result, quiet, passed);
    }

    if passed {
        Ok(())
    } else {
        Err(1)
    }
}
