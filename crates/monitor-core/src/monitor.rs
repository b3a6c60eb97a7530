//! The owning context object the emulator step loop talks to.

use std::path::Path;

use log::warn;

use crate::{
    evaluate_expression, CallTracer, ExprError, FunctionSymbol, ImageLoadError, Lexer,
    MachineView, MonitorConfig, RefreshReport, TransferKind, Watchpoint, WatchpointError,
    WatchpointId, WatchpointPool, Word,
};

/// Bundles the configuration, lexer, watchpoint pool and optional tracer.
///
/// Tracing stays disabled until an image has been attached successfully;
/// while disabled, control-transfer events are ignored and no report is
/// produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    config: MonitorConfig,
    lexer: Lexer,
    watchpoints: WatchpointPool,
    tracer: Option<CallTracer>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl Monitor {
    /// Creates a monitor with tracing disabled.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            lexer: Lexer::new(config.max_tokens),
            watchpoints: WatchpointPool::with_config(&config),
            tracer: None,
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Loads function symbols from `path` and enables tracing.
    ///
    /// On failure the error is logged, tracing stays (or becomes) disabled,
    /// and the rest of the monitor keeps working.
    ///
    /// # Errors
    ///
    /// Returns the [`ImageLoadError`] that prevented loading.
    pub fn attach_image(&mut self, path: impl AsRef<Path>) -> Result<(), ImageLoadError> {
        let path = path.as_ref();
        match CallTracer::from_image(path, &self.config) {
            Ok(tracer) => {
                self.tracer = Some(tracer);
                Ok(())
            }
            Err(error) => {
                warn!("call tracing disabled, {} failed to load: {error}", path.display());
                self.tracer = None;
                Err(error)
            }
        }
    }

    /// Enables tracing over an already-loaded symbol table.
    pub fn attach_symbols(&mut self, functions: Vec<FunctionSymbol>) {
        self.tracer = Some(CallTracer::with_config(functions, &self.config));
    }

    /// Evaluates a one-off expression.
    ///
    /// # Errors
    ///
    /// See [`evaluate_expression`].
    pub fn evaluate<M: MachineView + ?Sized>(&self, expression: &str, machine: &M) -> Result<Word, ExprError> {
        evaluate_expression(&self.lexer, expression, machine)
    }

    /// Creates a watchpoint on `expression`.
    ///
    /// # Errors
    ///
    /// See [`WatchpointPool::create`].
    pub fn watch<M: MachineView + ?Sized>(
        &mut self,
        expression: &str,
        machine: &M,
    ) -> Result<WatchpointId, WatchpointError> {
        self.watchpoints.create(&self.lexer, expression, machine)
    }

    /// Deletes watchpoint `id`.
    ///
    /// # Errors
    ///
    /// See [`WatchpointPool::delete`].
    pub fn unwatch(&mut self, id: WatchpointId) -> Result<Watchpoint, WatchpointError> {
        self.watchpoints.delete(id)
    }

    /// Re-checks every active watchpoint after an executed instruction.
    pub fn refresh_watchpoints<M: MachineView + ?Sized>(&mut self, machine: &M) -> RefreshReport {
        self.watchpoints.refresh(&self.lexer, machine)
    }

    /// The watchpoint pool.
    #[must_use]
    pub const fn watchpoints(&self) -> &WatchpointPool {
        &self.watchpoints
    }

    /// Forwards a control transfer to the tracer. Returns `false` when
    /// tracing is disabled or the event was dropped.
    pub fn on_control_transfer(&mut self, kind: TransferKind, pc: Word, target: Word) -> bool {
        self.tracer
            .as_mut()
            .is_some_and(|tracer| tracer.record(kind, pc, target))
    }

    /// The tracer, when tracing is enabled.
    #[must_use]
    pub const fn tracer(&self) -> Option<&CallTracer> {
        self.tracer.as_ref()
    }

    /// Renders the trace report, or `None` when tracing is disabled.
    #[must_use]
    pub fn trace_report(&self) -> Option<String> {
        self.tracer.as_ref().map(|tracer| tracer.report().to_string())
    }
}
