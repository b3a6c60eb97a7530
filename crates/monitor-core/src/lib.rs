//! Introspection core for an instruction-set emulator monitor.
//!
//! Evaluates operator expressions over guest state, keeps a fixed pool of
//! value-change watchpoints, and rebuilds a call/return trace from raw
//! control-transfer events using the function symbols of an ELF32 image.

/// Guest-state capability trait and the reference guest machine.
pub mod machine;
pub use machine::{
    register_index, GuestMachine, MachineView, Word, DEFAULT_GUEST_MEMORY_BYTES,
    GUEST_MEMORY_BASE, REGISTER_COUNT, REGISTER_NAMES, WORD_BYTES,
};

/// Expression error taxonomy.
pub mod error;
pub use error::{EvalError, ExprError, LexError};

/// Monitor-wide configuration.
pub mod config;
pub use config::{
    MonitorConfig, RefreshPolicy, DEFAULT_ENTRY_FUNCTION, DEFAULT_INSTRUCTION_WIDTH,
    DEFAULT_WATCHPOINT_CAPACITY, MAX_EXPRESSION_LEN,
};

/// Expression lexer and evaluator.
pub mod expr;
pub use expr::{
    evaluate, evaluate_expression, tokenize, BinaryOp, Lexer, Token, TokenKind,
    DEFAULT_MAX_TOKENS, DEREF_PRECEDENCE, MAX_EVAL_DEPTH, MAX_LEXEME_LEN,
};

/// Fixed-capacity watchpoint pool.
pub mod watchpoint;
pub use watchpoint::{
    RefreshReport, Watchpoint, WatchpointChange, WatchpointError, WatchpointId, WatchpointPool,
};

/// ELF32 function-symbol loader.
pub mod elf;
pub use elf::{load_function_symbols, parse_function_symbols, FunctionSymbol, ImageLoadError};

/// Call/return trace reconstruction.
pub mod calltrace;
pub use calltrace::{CallTracer, ReturnSite, TraceEvent, TraceReport, TransferKind};

/// Owning context object tying the components together.
pub mod monitor;
pub use monitor::Monitor;

#[cfg(test)]
use proptest as _;
