//! Offline replay of recorded control-transfer events.
//!
//! An event log holds one transfer per line:
//!
//! ```text
//! # kind  pc          target
//! call    0x80000010  0x80000100
//! ret     80000104    80000014
//! ```
//!
//! Addresses are hexadecimal with an optional `0x` prefix. Lines that do
//! not parse are collected as rejections and skipped, the same way the
//! tracer skips transfers it cannot resolve.

use std::fs;
use std::path::{Path, PathBuf};

use env_logger as _;
use log::{debug, info, warn};
use monitor_core::{ImageLoadError, Monitor, MonitorConfig, TransferKind, Word};
use thiserror::Error;

#[cfg(test)]
use tempfile as _;

/// Default report path, relative to the working directory.
pub const DEFAULT_REPORT_PATH: &str = "ftrace.log";

/// A control transfer read from an event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayEvent {
    /// Call or return.
    pub kind: TransferKind,
    /// Address of the transfer instruction.
    pub pc: Word,
    /// Destination address.
    pub target: Word,
}

/// A line of an event log that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventLogError {
    /// The first field is neither `call` nor `ret`.
    #[error("line {line}: unknown event kind {kind:?}")]
    UnknownKind {
        /// 1-based line number.
        line: usize,
        /// The offending field.
        kind: String,
    },
    /// Fewer than three fields.
    #[error("line {line}: missing {field}")]
    MissingField {
        /// 1-based line number.
        line: usize,
        /// Name of the absent field.
        field: &'static str,
    },
    /// An address field is not a 32-bit hexadecimal number.
    #[error("line {line}: invalid address {text:?}")]
    BadAddress {
        /// 1-based line number.
        line: usize,
        /// The offending field.
        text: String,
    },
    /// More than three fields.
    #[error("line {line}: unexpected trailing input")]
    TrailingInput {
        /// 1-based line number.
        line: usize,
    },
}

/// Parsed event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    /// Well-formed events in file order.
    pub events: Vec<ReplayEvent>,
    /// Lines that were skipped.
    pub rejected: Vec<EventLogError>,
}

/// Failures that stop a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The image could not be loaded, so tracing cannot be enabled.
    #[error("cannot trace {}: {source}", path.display())]
    Image {
        /// Image path.
        path: PathBuf,
        /// Loader failure.
        source: ImageLoadError,
    },
    /// The event log could not be read.
    #[error("cannot read events from {}: {source}", path.display())]
    Events {
        /// Event log path.
        path: PathBuf,
        /// Read failure.
        source: std::io::Error,
    },
    /// The report could not be written.
    #[error("cannot write report to {}: {source}", path.display())]
    Report {
        /// Report path.
        path: PathBuf,
        /// Write failure.
        source: std::io::Error,
    },
}

/// Counters for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events the tracer accepted.
    pub accepted: usize,
    /// Events the tracer dropped as unresolvable.
    pub dropped: usize,
    /// Log lines that did not parse.
    pub rejected: usize,
}

/// Parses an address field: hexadecimal, optional `0x`/`0X` prefix.
#[must_use]
pub fn parse_address(text: &str) -> Option<Word> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    Word::from_str_radix(digits, 16).ok()
}

/// Parses one non-blank, non-comment line.
///
/// # Errors
///
/// Returns the [`EventLogError`] describing why the line was rejected.
pub fn parse_event_line(line: usize, text: &str) -> Result<ReplayEvent, EventLogError> {
    let mut fields = text.split_whitespace();
    let kind = match fields.next() {
        Some("call") => TransferKind::Call,
        Some("ret") => TransferKind::Return,
        Some(other) => {
            return Err(EventLogError::UnknownKind {
                line,
                kind: other.to_owned(),
            })
        }
        None => return Err(EventLogError::MissingField { line, field: "kind" }),
    };
    let mut address = |field: &'static str| -> Result<Word, EventLogError> {
        let text = fields
            .next()
            .ok_or(EventLogError::MissingField { line, field })?;
        parse_address(text).ok_or_else(|| EventLogError::BadAddress {
            line,
            text: text.to_owned(),
        })
    };
    let pc = address("pc")?;
    let target = address("target")?;
    if fields.next().is_some() {
        return Err(EventLogError::TrailingInput { line });
    }
    Ok(ReplayEvent { kind, pc, target })
}

/// Parses a whole event log. `#` starts a comment; blank lines are ignored.
#[must_use]
pub fn parse_event_log(text: &str) -> EventLog {
    let mut log = EventLog::default();
    for (index, raw) in text.lines().enumerate() {
        let content = raw.split_once('#').map_or(raw, |(before, _)| before).trim();
        if content.is_empty() {
            continue;
        }
        match parse_event_line(index + 1, content) {
            Ok(event) => log.events.push(event),
            Err(error) => {
                warn!("skipping event: {error}");
                log.rejected.push(error);
            }
        }
    }
    log
}

/// Feeds `events` to the monitor's tracer.
pub fn replay(monitor: &mut Monitor, events: &[ReplayEvent]) -> ReplayStats {
    let mut stats = ReplayStats::default();
    for event in events {
        if monitor.on_control_transfer(event.kind, event.pc, event.target) {
            stats.accepted += 1;
        } else {
            stats.dropped += 1;
        }
    }
    debug!(
        "replayed {} events, {} dropped",
        stats.accepted, stats.dropped
    );
    stats
}

/// Loads `image`, replays the log at `events` and returns the rendered
/// report together with replay counters.
///
/// # Errors
///
/// Returns [`ReplayError::Image`] or [`ReplayError::Events`] when either
/// input cannot be read.
pub fn trace_file(
    image: &Path,
    events: &Path,
    config: MonitorConfig,
) -> Result<(String, ReplayStats), ReplayError> {
    let mut monitor = Monitor::new(config);
    monitor
        .attach_image(image)
        .map_err(|source| ReplayError::Image {
            path: image.to_path_buf(),
            source,
        })?;
    let text = fs::read_to_string(events).map_err(|source| ReplayError::Events {
        path: events.to_path_buf(),
        source,
    })?;

    let log = parse_event_log(&text);
    let mut stats = replay(&mut monitor, &log.events);
    stats.rejected = log.rejected.len();
    let report = monitor.trace_report().unwrap_or_default();
    Ok((report, stats))
}

/// Runs [`trace_file`] and writes the report to `output`.
///
/// # Errors
///
/// Any [`ReplayError`], including [`ReplayError::Report`] when the report
/// cannot be written.
pub fn write_trace(
    image: &Path,
    events: &Path,
    output: &Path,
    config: MonitorConfig,
) -> Result<ReplayStats, ReplayError> {
    let (report, stats) = trace_file(image, events, config)?;
    fs::write(output, report).map_err(|source| ReplayError::Report {
        path: output.to_path_buf(),
        source,
    })?;
    info!("wrote call trace to {}", output.display());
    Ok(stats)
}
