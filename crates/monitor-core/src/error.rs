use thiserror::Error;

use crate::Word;

/// Tokenizer failures. Any lex failure rejects the whole expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum LexError {
    /// No token rule matches at the given byte offset.
    #[error("no token matches at position {position}")]
    NoMatch {
        /// Byte offset into the expression.
        position: usize,
    },
    /// A token is longer than the bounded lexeme buffer.
    #[error("token at position {position} is longer than {max} bytes")]
    LexemeTooLong {
        /// Byte offset of the token start.
        position: usize,
        /// Maximum accepted lexeme length.
        max: usize,
    },
}

impl LexError {
    /// Byte offset in the source expression where lexing failed.
    #[must_use]
    pub const fn position(&self) -> usize {
        match self {
            Self::NoMatch { position } | Self::LexemeTooLong { position, .. } => *position,
        }
    }

    /// Renders the expression with a caret under the failing byte.
    #[must_use]
    pub fn caret_diagnostic(&self, expression: &str) -> String {
        format!(
            "{self}\n{expression}\n{:>width$}",
            "^",
            width = self.position() + 1
        )
    }
}

/// Evaluation failures over a token range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum EvalError {
    /// The expression produced no tokens.
    #[error("empty expression")]
    Empty,
    /// The token range has no valid reduction.
    #[error("malformed expression between tokens {start} and {end}")]
    Malformed {
        /// First token index of the offending range.
        start: usize,
        /// Last token index of the offending range.
        end: usize,
    },
    /// Parentheses do not balance.
    #[error("unmatched parenthesis")]
    UnmatchedParen,
    /// Operands are nested deeper than the evaluator descends.
    #[error("expression nests deeper than {limit} levels")]
    NestingTooDeep {
        /// Nesting bound.
        limit: usize,
    },
    /// A literal token could not be interpreted in its radix.
    #[error("invalid literal: {lexeme}")]
    InvalidLiteral {
        /// The offending lexeme.
        lexeme: String,
    },
    /// Register lookup failed.
    #[error("unknown register: ${name}")]
    UnknownRegister {
        /// Register name without the `$` sigil.
        name: String,
    },
    /// Dereference of an address outside readable guest memory.
    #[error("address 0x{address:08x} is outside guest memory")]
    AddressOutOfRange {
        /// Address that failed range validation.
        address: Word,
    },
    /// Right-hand side of `/` evaluated to zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Any failure while turning expression text into a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ExprError {
    /// Tokenizer rejected the input.
    #[error(transparent)]
    Lex(#[from] LexError),
    /// The expression has more tokens than the configured bound.
    #[error("expression exceeds {limit} tokens")]
    TooManyTokens {
        /// Configured token bound.
        limit: usize,
    },
    /// Evaluator rejected the token sequence.
    #[error(transparent)]
    Eval(#[from] EvalError),
}
