//! Expression front end: tokenizer plus range evaluator.

/// Recursive token-range evaluator.
pub mod eval;
/// Ordered-rule tokenizer.
pub mod lexer;

pub use eval::{evaluate, MAX_EVAL_DEPTH};
pub use lexer::{
    tokenize, BinaryOp, Lexer, Token, TokenKind, DEFAULT_MAX_TOKENS, DEREF_PRECEDENCE,
    MAX_LEXEME_LEN,
};

use crate::{ExprError, MachineView, Word};

/// Tokenizes and evaluates `input` in one call.
///
/// # Errors
///
/// Returns [`ExprError`] for lex failures, token-bound overruns and
/// evaluation failures.
pub fn evaluate_expression<M: MachineView + ?Sized>(
    lexer: &Lexer,
    input: &str,
    machine: &M,
) -> Result<Word, ExprError> {
    let tokens = lexer.tokenize(input).inspect_err(|error| {
        log::debug!("rejected expression {input:?}: {error}");
    })?;
    evaluate(&tokens, machine).map_err(|error| {
        log::debug!("failed to evaluate {input:?}: {error}");
        ExprError::Eval(error)
    })
}
