//! Ordered-rule tokenizer for monitor expressions.
//!
//! Rules are tried strictly in table order at each position and the first
//! rule that matches wins, even when a later rule would match a longer
//! prefix. Hex literals therefore have to come before decimal literals.

use std::sync::LazyLock;

use regex::Regex;

use crate::{ExprError, LexError};

/// Longest lexeme a single token may carry, in bytes.
pub const MAX_LEXEME_LEN: usize = 63;

/// Default bound on tokens per expression.
pub const DEFAULT_MAX_TOKENS: usize = 65_536;

/// Precedence rank of unary dereference, the tightest-binding operator.
pub const DEREF_PRECEDENCE: u8 = 5;

/// Binary operators, ranked from loosest (`&&`) to tightest (`*`, `/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `&&`
    And,
}

impl BinaryOp {
    /// Precedence rank; lower ranks bind looser.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::And => 1,
            Self::Eq | Self::Ne => 2,
            Self::Add | Self::Sub => 3,
            Self::Mul | Self::Div => 4,
        }
    }

    /// Source spelling of the operator.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
        }
    }
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TokenKind {
    /// Decimal literal, optionally suffixed with `u`.
    Number,
    /// `0x`-prefixed hexadecimal literal.
    HexNumber,
    /// `$name` register reference.
    Register,
    /// Binary operator.
    Operator(BinaryOp),
    /// Unary `*` memory dereference.
    Deref,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
}

impl TokenKind {
    /// Precedence rank for operator tokens, `None` for operands and parens.
    #[must_use]
    pub const fn precedence(self) -> Option<u8> {
        match self {
            Self::Operator(op) => Some(op.precedence()),
            Self::Deref => Some(DEREF_PRECEDENCE),
            Self::Number
            | Self::HexNumber
            | Self::Register
            | Self::LeftParen
            | Self::RightParen => None,
        }
    }

    /// Returns `true` for binary operators and dereference.
    #[must_use]
    pub const fn is_operator(self) -> bool {
        self.precedence().is_some()
    }
}

/// A classified slice of the source expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Token {
    /// Token classification.
    pub kind: TokenKind,
    /// Source text of the token.
    pub lexeme: String,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    Skip,
    Emit(TokenKind),
}

const RULES: [(&str, Rule); 13] = [
    (r"^[ \t]+", Rule::Skip),
    (r"^0[xX][0-9a-fA-F]+", Rule::Emit(TokenKind::HexNumber)),
    (r"^[0-9]+u?", Rule::Emit(TokenKind::Number)),
    (r"^\$[0-9A-Za-z_]+", Rule::Emit(TokenKind::Register)),
    (r"^\+", Rule::Emit(TokenKind::Operator(BinaryOp::Add))),
    (r"^-", Rule::Emit(TokenKind::Operator(BinaryOp::Sub))),
    (r"^\*", Rule::Emit(TokenKind::Operator(BinaryOp::Mul))),
    (r"^/", Rule::Emit(TokenKind::Operator(BinaryOp::Div))),
    (r"^==", Rule::Emit(TokenKind::Operator(BinaryOp::Eq))),
    (r"^!=", Rule::Emit(TokenKind::Operator(BinaryOp::Ne))),
    (r"^&&", Rule::Emit(TokenKind::Operator(BinaryOp::And))),
    (r"^\(", Rule::Emit(TokenKind::LeftParen)),
    (r"^\)", Rule::Emit(TokenKind::RightParen)),
];

static COMPILED_RULES: LazyLock<Vec<(Regex, Rule)>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|(pattern, rule)| (Regex::new(pattern).expect("static lexer rule"), *rule))
        .collect()
});

/// Expression tokenizer with a bounded token count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexer {
    max_tokens: usize,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl Lexer {
    /// Creates a lexer that rejects expressions with more than `max_tokens`
    /// tokens.
    #[must_use]
    pub const fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Configured token bound.
    #[must_use]
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Splits `input` into tokens.
    ///
    /// Whitespace is dropped. A `*` is tagged [`TokenKind::Deref`] when it
    /// starts the expression or follows an operator or `(`.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError::Lex`] when no rule matches at some position or a
    /// lexeme exceeds [`MAX_LEXEME_LEN`], and [`ExprError::TooManyTokens`]
    /// when the token bound is exceeded.
    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        let mut position = 0;

        while position < input.len() {
            let rest = &input[position..];
            let (len, rule) = COMPILED_RULES
                .iter()
                .find_map(|(pattern, rule)| pattern.find(rest).map(|m| (m.end(), *rule)))
                .ok_or(LexError::NoMatch { position })?;

            if let Rule::Emit(kind) = rule {
                if tokens.len() >= self.max_tokens {
                    return Err(ExprError::TooManyTokens {
                        limit: self.max_tokens,
                    });
                }
                if len > MAX_LEXEME_LEN {
                    return Err(LexError::LexemeTooLong {
                        position,
                        max: MAX_LEXEME_LEN,
                    }
                    .into());
                }
                tokens.push(Token {
                    kind,
                    lexeme: rest[..len].to_owned(),
                });
            }

            position += len;
        }

        mark_dereferences(&mut tokens);
        Ok(tokens)
    }
}

/// Tokenizes with the default token bound.
///
/// # Errors
///
/// See [`Lexer::tokenize`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    Lexer::default().tokenize(input)
}

fn mark_dereferences(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        if tokens[i].kind != TokenKind::Operator(BinaryOp::Mul) {
            continue;
        }
        let prefix = i == 0
            || matches!(
                tokens[i - 1].kind,
                TokenKind::Operator(_) | TokenKind::Deref | TokenKind::LeftParen
            );
        if prefix {
            tokens[i].kind = TokenKind::Deref;
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{tokenize, BinaryOp, Lexer, TokenKind, MAX_LEXEME_LEN};
    use crate::{ExprError, LexError};

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .expect("expression should tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn whitespace_is_discarded() {
        let tokens = tokenize("  1 +\t2 ").expect("valid");
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, ["1", "+", "2"]);
    }

    #[test]
    fn hex_rule_wins_over_decimal() {
        assert_eq!(kinds("0x1F"), [TokenKind::HexNumber]);
        assert_eq!(kinds("0X1f"), [TokenKind::HexNumber]);
    }

    #[test]
    fn bare_hex_prefix_splits_into_decimal_then_fails() {
        assert_eq!(
            tokenize("0x"),
            Err(ExprError::Lex(LexError::NoMatch { position: 1 }))
        );
    }

    #[test]
    fn unsigned_suffix_stays_in_lexeme() {
        let tokens = tokenize("42u").expect("valid");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, "42u");
    }

    #[rstest]
    #[case("$pc", "$pc")]
    #[case("$a0", "$a0")]
    #[case("$0", "$0")]
    #[case("$s11", "$s11")]
    fn register_references(#[case] input: &str, #[case] lexeme: &str) {
        let tokens = tokenize(input).expect("valid");
        assert_eq!(tokens[0].kind, TokenKind::Register);
        assert_eq!(tokens[0].lexeme, lexeme);
    }

    #[rstest]
    #[case("+", BinaryOp::Add)]
    #[case("-", BinaryOp::Sub)]
    #[case("/", BinaryOp::Div)]
    #[case("==", BinaryOp::Eq)]
    #[case("!=", BinaryOp::Ne)]
    #[case("&&", BinaryOp::And)]
    fn binary_operators(#[case] symbol: &str, #[case] op: BinaryOp) {
        let input = format!("1{symbol}2");
        assert_eq!(
            kinds(&input),
            [TokenKind::Number, TokenKind::Operator(op), TokenKind::Number]
        );
        assert_eq!(op.symbol(), symbol);
    }

    #[test]
    fn star_after_operand_is_multiplication() {
        assert_eq!(
            kinds("2*3"),
            [
                TokenKind::Number,
                TokenKind::Operator(BinaryOp::Mul),
                TokenKind::Number
            ]
        );
        assert_eq!(
            kinds("(1)*2")[3],
            TokenKind::Operator(BinaryOp::Mul)
        );
    }

    #[test]
    fn star_in_prefix_position_is_dereference() {
        assert_eq!(kinds("*$sp")[0], TokenKind::Deref);
        assert_eq!(kinds("1+*$sp")[2], TokenKind::Deref);
        assert_eq!(kinds("(*$sp)")[1], TokenKind::Deref);
        assert_eq!(kinds("**$sp")[..2], [TokenKind::Deref, TokenKind::Deref]);
        assert_eq!(
            kinds("2**$sp")[1..3],
            [TokenKind::Operator(BinaryOp::Mul), TokenKind::Deref]
        );
    }

    #[rstest]
    #[case("1 % 2", 2)]
    #[case("abc", 0)]
    #[case("1 = 2", 2)]
    #[case("1 & 2", 2)]
    #[case("$", 0)]
    fn unmatched_input_reports_position(#[case] input: &str, #[case] position: usize) {
        assert_eq!(
            tokenize(input),
            Err(ExprError::Lex(LexError::NoMatch { position }))
        );
    }

    #[test]
    fn token_bound_is_enforced() {
        let lexer = Lexer::new(3);
        assert!(lexer.tokenize("1+2").is_ok());
        assert_eq!(
            lexer.tokenize("1+2+3"),
            Err(ExprError::TooManyTokens { limit: 3 })
        );
    }

    #[test]
    fn overlong_lexeme_is_rejected() {
        let input = format!("1+{}", "9".repeat(MAX_LEXEME_LEN + 1));
        assert_eq!(
            tokenize(&input),
            Err(ExprError::Lex(LexError::LexemeTooLong {
                position: 2,
                max: MAX_LEXEME_LEN
            }))
        );
    }

    #[test]
    fn precedence_ranks_are_ordered() {
        assert!(BinaryOp::And.precedence() < BinaryOp::Eq.precedence());
        assert_eq!(BinaryOp::Eq.precedence(), BinaryOp::Ne.precedence());
        assert!(BinaryOp::Ne.precedence() < BinaryOp::Add.precedence());
        assert!(BinaryOp::Sub.precedence() < BinaryOp::Mul.precedence());
        assert_eq!(TokenKind::Deref.precedence(), Some(super::DEREF_PRECEDENCE));
        assert_eq!(TokenKind::LeftParen.precedence(), None);
        assert!(!TokenKind::Number.is_operator());
    }

    #[test]
    fn empty_input_has_no_tokens() {
        assert_eq!(tokenize(""), Ok(Vec::new()));
        assert_eq!(tokenize("   "), Ok(Vec::new()));
    }
}
