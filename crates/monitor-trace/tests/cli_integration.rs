//! Integration tests for the monitor-trace CLI.

use env_logger as _;
use log as _;
use monitor_core::elf::fixture::{image, GLOBAL_FUNCTION};
use monitor_trace as _;
use thiserror as _;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_monitor-trace"))
}

fn write_inputs(dir: &Path, events: &str) -> (PathBuf, PathBuf) {
    let image_path = dir.join("prog.elf");
    fs::write(
        &image_path,
        image(&[
            ("main", 0x8000_0100, GLOBAL_FUNCTION),
            ("puts", 0x8000_0200, GLOBAL_FUNCTION),
        ]),
    )
    .unwrap();
    let log = dir.join("run.events");
    fs::write(&log, events).unwrap();
    (image_path, log)
}

const EVENTS: &str = "\
# _start calls main, main calls puts
call 0x80000010 0x80000100
call 0x80000120 0x80000200
ret  0x80000210 0x80000124
ret  0x80000130 0x80000014
call 0x80000140 0xdeadbeef
";

#[test]
fn writes_report_to_explicit_output() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (image, events) = write_inputs(temp_dir.path(), EVENTS);
    let output = temp_dir.path().join("trace.log");

    let run = Command::new(binary_path())
        .args([
            image.to_str().unwrap(),
            events.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .output()
        .expect("failed to run monitor-trace");

    assert!(run.status.success());
    let stdout = String::from_utf8_lossy(&run.stdout);
    assert!(stdout.contains("Traced 4 events (1 dropped, 0 malformed lines)"));

    let report = fs::read_to_string(&output).unwrap();
    assert_eq!(
        report,
        "\n [Function info:] \n\
         Function main at 0x80000100\n\
         Function puts at 0x80000200\n\
         \n [Call & Ret info:] \n\
         0x80000010:  [Call]  main@0x80000100\n\
         0x80000120:   [Call]  puts@0x80000200\n\
         0x80000210:   [Return] main@0x80000124\n\
         0x80000130:  [Return] _start@0x80000014\n\
         \n [Ret info:] \n\
         Return _start at 0x80000014\n\
         Return main at 0x80000124\n"
    );
}

#[test]
fn defaults_to_ftrace_log_in_working_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (image, events) = write_inputs(temp_dir.path(), "call 0 80000100\nnonsense\n");

    let status = Command::new(binary_path())
        .args([image.to_str().unwrap(), events.to_str().unwrap()])
        .current_dir(temp_dir.path())
        .status()
        .expect("failed to run monitor-trace");

    assert!(status.success());
    let report = fs::read_to_string(temp_dir.path().join("ftrace.log")).unwrap();
    assert!(report.contains("0x0:  [Call]  main@0x80000100\n"));
}

#[test]
fn invalid_image_exits_with_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = temp_dir.path().join("bad.elf");
    fs::write(&image, b"definitely not an executable image, padded to a header").unwrap();
    let events = temp_dir.path().join("run.events");
    fs::write(&events, "").unwrap();

    let run = Command::new(binary_path())
        .args([image.to_str().unwrap(), events.to_str().unwrap()])
        .current_dir(temp_dir.path())
        .output()
        .expect("failed to run monitor-trace");

    assert_eq!(run.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&run.stderr).contains("not an ELF image"));
    assert!(!temp_dir.path().join("ftrace.log").exists());
}

#[test]
fn missing_arguments_print_usage() {
    let run = Command::new(binary_path())
        .output()
        .expect("failed to run monitor-trace");

    assert_eq!(run.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&run.stderr);
    assert!(stderr.contains("missing image path"));
    assert!(stderr.contains("Usage: monitor-trace"));
}
