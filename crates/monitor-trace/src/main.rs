//! CLI entry point for the offline call-trace replayer.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use log::error;
use monitor_core::MonitorConfig;
use monitor_trace::{write_trace, DEFAULT_REPORT_PATH};
#[cfg(test)]
use tempfile as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: monitor-trace <image> <events> [options]

Arguments:
  <image>   ELF32 executable whose function symbols drive the trace
  <events>  Event log, one `call|ret <pc> <target>` per line (hex)

Options:
  -o, --output <file>  Report path (default: ftrace.log)
  -v, --verbose        Log dropped and accepted events
  -h, --help           Show this help message

Examples:
  monitor-trace build/kernel.elf run.events
  monitor-trace build/kernel.elf run.events -o kernel-ftrace.log
";

#[derive(Debug, PartialEq, Eq)]
struct TraceArgs {
    image: PathBuf,
    events: PathBuf,
    output: PathBuf,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Trace(TraceArgs),
    Help,
}

#[allow(clippy::while_let_on_iterator)]
fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut positional: Vec<PathBuf> = Vec::new();
    let mut output: Option<PathBuf> = None;
    let mut verbose = false;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "--verbose" || arg == "-v" {
            verbose = true;
            continue;
        }

        if arg == "-o" || arg == "--output" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for -o".to_string())?;
            output = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if positional.len() == 2 {
            return Err("too many input paths provided".to_string());
        }
        positional.push(PathBuf::from(arg));
    }

    let mut positional = positional.into_iter();
    let image = positional
        .next()
        .ok_or_else(|| "missing image path".to_string())?;
    let events = positional
        .next()
        .ok_or_else(|| "missing events path".to_string())?;

    Ok(ParseResult::Trace(TraceArgs {
        image,
        events,
        output: output.unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH)),
        verbose,
    }))
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run_trace(args: &TraceArgs) -> Result<(), i32> {
    let stats = write_trace(
        &args.image,
        &args.events,
        &args.output,
        MonitorConfig::default(),
    )
    .map_err(|e| {
        error!("{e}");
        eprintln!("error: {e}");
        1
    })?;

    println!(
        "Traced {} events ({} dropped, {} malformed lines) -> {}",
        stats.accepted,
        stats.dropped,
        stats.rejected,
        args.output.display()
    );
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Trace(args)) => {
            init_logging(args.verbose);
            match run_trace(&args) {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
