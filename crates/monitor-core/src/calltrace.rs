//! Call/return trace reconstruction from raw control-transfer events.
//!
//! The tracer knows nothing about the instruction stream. It only sees
//! `(kind, pc, target)` triples and accepts a call when the target is a
//! known function entry, and a return when the target is a return site
//! recorded by an earlier accepted call.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::{debug, trace};

use crate::{
    load_function_symbols, FunctionSymbol, ImageLoadError, MonitorConfig, Word,
    DEFAULT_ENTRY_FUNCTION, DEFAULT_INSTRUCTION_WIDTH,
};

const UNKNOWN_CALL: &str = "Unknown Call";
const UNKNOWN_RETURN: &str = "Unknown Ret";

/// Direction of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TransferKind {
    /// Jump-and-link into a function.
    Call,
    /// Jump back to a return address.
    Return,
}

/// Address a call will come back to, tagged with the caller's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ReturnSite {
    /// Instruction after the call.
    pub address: Word,
    /// Function that was current when the call happened.
    pub caller_name: String,
}

/// An accepted control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TraceEvent {
    /// Address of the transfer instruction.
    pub pc: Word,
    /// Destination address.
    pub target: Word,
    /// Call or return.
    pub kind: TransferKind,
    /// Nesting depth when the event was accepted.
    pub depth: usize,
}

/// Stateful trace builder over a fixed function symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTracer {
    functions: Vec<FunctionSymbol>,
    function_index: HashMap<Word, usize>,
    return_sites: Vec<ReturnSite>,
    return_index: HashMap<Word, usize>,
    events: Vec<TraceEvent>,
    current_function: String,
    depth: usize,
    instruction_width: Word,
}

impl CallTracer {
    /// Creates a tracer with the default entry function and call width.
    #[must_use]
    pub fn new(functions: Vec<FunctionSymbol>) -> Self {
        Self::build(
            functions,
            DEFAULT_ENTRY_FUNCTION.to_owned(),
            DEFAULT_INSTRUCTION_WIDTH,
        )
    }

    /// Creates a tracer using the entry function and call width of `config`.
    #[must_use]
    pub fn with_config(functions: Vec<FunctionSymbol>, config: &MonitorConfig) -> Self {
        Self::build(
            functions,
            config.entry_function.clone(),
            config.instruction_width,
        )
    }

    /// Loads function symbols from the ELF32 image at `path`.
    ///
    /// # Errors
    ///
    /// Propagates any [`ImageLoadError`] from the image reader.
    pub fn from_image(path: impl AsRef<Path>, config: &MonitorConfig) -> Result<Self, ImageLoadError> {
        let functions = load_function_symbols(path)?;
        Ok(Self::with_config(functions, config))
    }

    fn build(functions: Vec<FunctionSymbol>, entry: String, instruction_width: Word) -> Self {
        let mut function_index = HashMap::with_capacity(functions.len());
        for (i, symbol) in functions.iter().enumerate() {
            function_index.entry(symbol.address).or_insert(i);
        }
        Self {
            functions,
            function_index,
            return_sites: Vec::new(),
            return_index: HashMap::new(),
            events: Vec::new(),
            current_function: entry,
            depth: 1,
            instruction_width,
        }
    }

    /// Feeds one control transfer. Returns `true` when the event was
    /// accepted into the trace.
    pub fn record(&mut self, kind: TransferKind, pc: Word, target: Word) -> bool {
        match kind {
            TransferKind::Call => {
                let Some(&index) = self.function_index.get(&target) else {
                    debug!("dropped call 0x{pc:x} -> 0x{target:x}: not a function entry");
                    return false;
                };
                let callee = self.functions[index].name.clone();
                let caller = std::mem::replace(&mut self.current_function, callee);
                self.add_return_site(pc.wrapping_add(self.instruction_width), caller);
            }
            TransferKind::Return => {
                if !self.return_index.contains_key(&target) {
                    debug!("dropped return 0x{pc:x} -> 0x{target:x}: not a return site");
                    return false;
                }
            }
        }

        if let Some(previous) = self.events.last() {
            match (previous.kind, kind) {
                (TransferKind::Call, TransferKind::Call) => self.depth += 1,
                (TransferKind::Return, TransferKind::Return) => {
                    self.depth = self.depth.saturating_sub(1);
                }
                _ => {}
            }
        }

        let event = TraceEvent {
            pc,
            target,
            kind,
            depth: self.depth,
        };
        trace!("{kind:?} 0x{pc:x} -> 0x{target:x} at depth {}", self.depth);
        self.events.push(event);
        true
    }

    fn add_return_site(&mut self, address: Word, caller_name: String) {
        self.return_index
            .entry(address)
            .or_insert(self.return_sites.len());
        self.return_sites.push(ReturnSite {
            address,
            caller_name,
        });
    }

    /// Loaded function symbols in image order.
    #[must_use]
    pub fn functions(&self) -> &[FunctionSymbol] {
        &self.functions
    }

    /// Return sites in the order they were recorded.
    #[must_use]
    pub fn return_sites(&self) -> &[ReturnSite] {
        &self.return_sites
    }

    /// Accepted events in arrival order.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Function the tracer considers current.
    #[must_use]
    pub fn current_function(&self) -> &str {
        &self.current_function
    }

    /// Depth that the next same-kind event builds on.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Name of the function starting at `address`, if any.
    #[must_use]
    pub fn function_name(&self, address: Word) -> Option<&str> {
        self.function_index
            .get(&address)
            .map(|&i| self.functions[i].name.as_str())
    }

    /// Caller recorded for the first return site at `address`, if any.
    #[must_use]
    pub fn return_site_name(&self, address: Word) -> Option<&str> {
        self.return_index
            .get(&address)
            .map(|&i| self.return_sites[i].caller_name.as_str())
    }

    /// Borrowing view that renders the three-section text report.
    #[must_use]
    pub const fn report(&self) -> TraceReport<'_> {
        TraceReport { tracer: self }
    }
}

/// Text rendering of a [`CallTracer`]: function table, call/return trace
/// and return-site table.
#[derive(Debug, Clone, Copy)]
pub struct TraceReport<'a> {
    tracer: &'a CallTracer,
}

impl fmt::Display for TraceReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracer = self.tracer;

        f.write_str("\n [Function info:] \n")?;
        for symbol in &tracer.functions {
            writeln!(f, "Function {} at 0x{:x}", symbol.name, symbol.address)?;
        }

        f.write_str("\n [Call & Ret info:] \n")?;
        for event in &tracer.events {
            write!(f, "0x{:x}: {:width$}", event.pc, "", width = event.depth)?;
            match event.kind {
                TransferKind::Call => writeln!(
                    f,
                    "[Call]  {}@0x{:x}",
                    tracer.function_name(event.target).unwrap_or(UNKNOWN_CALL),
                    event.target
                )?,
                TransferKind::Return => writeln!(
                    f,
                    "[Return] {}@0x{:x}",
                    tracer.return_site_name(event.target).unwrap_or(UNKNOWN_RETURN),
                    event.target
                )?,
            }
        }

        f.write_str("\n [Ret info:] \n")?;
        for site in &tracer.return_sites {
            writeln!(f, "Return {} at 0x{:x}", site.caller_name, site.address)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CallTracer, TransferKind};
    use crate::{FunctionSymbol, MonitorConfig};

    const F: u32 = 0x8000_0100;
    const G: u32 = 0x8000_0200;

    fn tracer() -> CallTracer {
        CallTracer::new(vec![
            FunctionSymbol {
                name: "f".into(),
                address: F,
            },
            FunctionSymbol {
                name: "g".into(),
                address: G,
            },
        ])
    }

    #[test]
    fn nested_call_depths_and_return_names() {
        let mut tracer = tracer();
        assert!(tracer.record(TransferKind::Call, 0x8000_0010, F));
        assert!(tracer.record(TransferKind::Call, 0x8000_0110, G));
        assert!(tracer.record(TransferKind::Return, 0x8000_0204, 0x8000_0114));
        assert!(tracer.record(TransferKind::Return, 0x8000_0120, 0x8000_0014));

        let depths: Vec<usize> = tracer.events().iter().map(|e| e.depth).collect();
        assert_eq!(depths, [1, 2, 2, 1]);
        assert_eq!(tracer.return_site_name(0x8000_0114), Some("f"));
        assert_eq!(tracer.return_site_name(0x8000_0014), Some("_start"));
    }

    #[test]
    fn returns_do_not_change_current_function() {
        let mut tracer = tracer();
        tracer.record(TransferKind::Call, 0x8000_0010, F);
        tracer.record(TransferKind::Call, 0x8000_0110, G);
        tracer.record(TransferKind::Return, 0x8000_0204, 0x8000_0114);
        assert_eq!(tracer.current_function(), "g");
    }

    #[test]
    fn unknown_targets_are_dropped() {
        let mut tracer = tracer();
        assert!(!tracer.record(TransferKind::Call, 0x8000_0010, 0x1234));
        assert!(!tracer.record(TransferKind::Return, 0x8000_0010, 0x8000_0014));
        assert!(tracer.events().is_empty());
        assert!(tracer.return_sites().is_empty());
        assert_eq!(tracer.current_function(), "_start");
    }

    #[test]
    fn depth_saturates_at_zero() {
        let mut tracer = tracer();
        tracer.record(TransferKind::Call, 0x10, F);
        tracer.record(TransferKind::Return, 0x100, 0x14);
        tracer.record(TransferKind::Return, 0x100, 0x14);
        tracer.record(TransferKind::Return, 0x100, 0x14);
        let depths: Vec<usize> = tracer.events().iter().map(|e| e.depth).collect();
        assert_eq!(depths, [1, 1, 0, 0]);
    }

    #[test]
    fn configured_entry_and_width_are_used() {
        let config = MonitorConfig {
            entry_function: "main".into(),
            instruction_width: 2,
            ..MonitorConfig::default()
        };
        let mut tracer = CallTracer::with_config(tracer().functions().to_vec(), &config);
        tracer.record(TransferKind::Call, 0x40, F);
        assert_eq!(tracer.return_sites()[0].address, 0x42);
        assert_eq!(tracer.return_sites()[0].caller_name, "main");
    }

    #[test]
    fn return_site_address_wraps() {
        let mut tracer = tracer();
        tracer.record(TransferKind::Call, u32::MAX - 1, F);
        assert_eq!(tracer.return_sites()[0].address, 2);
    }

    #[test]
    fn first_matching_return_site_names_the_return() {
        let mut tracer = tracer();
        tracer.record(TransferKind::Call, 0x10, F);
        tracer.record(TransferKind::Call, 0x10, G);
        assert_eq!(tracer.return_sites().len(), 2);
        assert_eq!(tracer.return_site_name(0x14), Some("_start"));
    }

    #[test]
    fn report_matches_ftrace_log_layout() {
        let mut tracer = tracer();
        tracer.record(TransferKind::Call, 0x8000_0010, F);
        tracer.record(TransferKind::Call, 0x8000_0110, G);
        tracer.record(TransferKind::Return, 0x8000_0204, 0x8000_0114);
        tracer.record(TransferKind::Return, 0x8000_0120, 0x8000_0014);

        let expected = "\n [Function info:] \n\
                        Function f at 0x80000100\n\
                        Function g at 0x80000200\n\
                        \n [Call & Ret info:] \n\
                        0x80000010:  [Call]  f@0x80000100\n\
                        0x80000110:   [Call]  g@0x80000200\n\
                        0x80000204:   [Return] f@0x80000114\n\
                        0x80000120:  [Return] _start@0x80000014\n\
                        \n [Ret info:] \n\
                        Return _start at 0x80000014\n\
                        Return f at 0x80000114\n";
        assert_eq!(tracer.report().to_string(), expected);
    }

    #[test]
    fn empty_report_still_has_all_sections() {
        let tracer = CallTracer::new(Vec::new());
        assert_eq!(
            tracer.report().to_string(),
            "\n [Function info:] \n\n [Call & Ret info:] \n\n [Ret info:] \n"
        );
    }

    #[test]
    fn loads_symbols_from_image_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&crate::elf::fixture::image(&[("main", 0x40, 0x12)]))
            .expect("write image");
        let mut tracer =
            CallTracer::from_image(file.path(), &MonitorConfig::default()).expect("valid image");
        assert_eq!(tracer.function_name(0x40), Some("main"));
        assert!(tracer.record(TransferKind::Call, 0x0, 0x40));
    }
}
