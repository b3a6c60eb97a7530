//! Range evaluator over a token slice.
//!
//! Works directly on the closed index range `[p, q]` without building a
//! parse tree: strip full-span parenthesis pairs, or split at the main
//! operator and reduce the operands.
//!
//! The main operator is the loosest-binding operator outside parentheses.
//! Among equal-rank binary operators the rightmost wins, which makes them
//! left-associative (`10-4-3` is `(10-4)-3`). Among dereferences the
//! leftmost wins so that `**p` nests to the right.
//!
//! Parentheses are matched once per expression. Same-rank chains fold left
//! to right and runs of dereferences and parentheses are unwound in loops,
//! so only operands nested inside one another consume stack. That nesting
//! is capped at [`MAX_EVAL_DEPTH`].

use crate::{BinaryOp, EvalError, MachineView, Token, TokenKind, Word, WORD_BYTES};

/// Deepest chain of nested operand ranges the evaluator descends into.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Evaluates a whole token sequence against `machine`.
///
/// # Errors
///
/// Returns [`EvalError::Empty`] for an empty slice and any error produced
/// while reducing the range (malformed structure, unmatched parentheses,
/// nesting past [`MAX_EVAL_DEPTH`], unknown register, out-of-range
/// dereference, division by zero).
pub fn evaluate<M: MachineView + ?Sized>(tokens: &[Token], machine: &M) -> Result<Word, EvalError> {
    match tokens.len() {
        0 => Err(EvalError::Empty),
        1 => eval_atom(&tokens[0], 0, machine),
        len => RangeEvaluator {
            tokens,
            partners: match_parens(tokens)?,
            machine,
        }
        .eval_range(0, len - 1, 0),
    }
}

/// Maps every parenthesis to the index of its partner. Other tokens map to
/// themselves.
fn match_parens(tokens: &[Token]) -> Result<Vec<usize>, EvalError> {
    let mut partners: Vec<usize> = (0..tokens.len()).collect();
    let mut open = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LeftParen => open.push(i),
            TokenKind::RightParen => {
                let start = open.pop().ok_or(EvalError::UnmatchedParen)?;
                partners[start] = i;
                partners[i] = start;
            }
            _ => {}
        }
    }
    if open.is_empty() {
        Ok(partners)
    } else {
        Err(EvalError::UnmatchedParen)
    }
}

enum MainOperator {
    /// Every top-level binary operator of the loosest rank, in order.
    Binary(Vec<(usize, BinaryOp)>),
    /// Leftmost top-level dereference.
    Deref(usize),
}

struct RangeEvaluator<'a, M: ?Sized> {
    tokens: &'a [Token],
    partners: Vec<usize>,
    machine: &'a M,
}

impl<M: MachineView + ?Sized> RangeEvaluator<'_, M> {
    fn eval_range(&self, mut p: usize, mut q: usize, depth: usize) -> Result<Word, EvalError> {
        if depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::NestingTooDeep {
                limit: MAX_EVAL_DEPTH,
            });
        }
        loop {
            if p > q {
                return Err(EvalError::Malformed { start: p, end: q });
            }
            if p == q {
                return eval_atom(&self.tokens[p], p, self.machine);
            }
            if self.tokens[p].kind != TokenKind::LeftParen || self.partners[p] != q {
                break;
            }
            p += 1;
            q -= 1;
        }

        match self.main_operator(p, q) {
            Some(MainOperator::Binary(ops)) => self.fold_binary(p, q, &ops, depth),
            Some(MainOperator::Deref(op)) if op == p => self.eval_deref(p, q, depth),
            _ => Err(EvalError::Malformed { start: p, end: q }),
        }
    }

    /// Scans the top level of `[p, q]`, hopping over parenthesized groups.
    fn main_operator(&self, p: usize, q: usize) -> Option<MainOperator> {
        let mut ops: Vec<(usize, BinaryOp)> = Vec::new();
        let mut deref = None;
        let mut i = p;
        while i <= q {
            match self.tokens[i].kind {
                TokenKind::LeftParen => i = self.partners[i],
                TokenKind::Operator(op) => match ops.first() {
                    Some((_, best)) if op.precedence() > best.precedence() => {}
                    Some((_, best)) if op.precedence() == best.precedence() => ops.push((i, op)),
                    _ => {
                        ops.clear();
                        ops.push((i, op));
                    }
                },
                TokenKind::Deref => deref = deref.or(Some(i)),
                _ => {}
            }
            i += 1;
        }

        if ops.is_empty() {
            deref.map(MainOperator::Deref)
        } else {
            Some(MainOperator::Binary(ops))
        }
    }

    /// Left fold over the operands between same-rank operators. Every
    /// operand is checked for presence before any of them is evaluated.
    fn fold_binary(
        &self,
        p: usize,
        q: usize,
        ops: &[(usize, BinaryOp)],
        depth: usize,
    ) -> Result<Word, EvalError> {
        let mut end = q;
        for &(op, _) in ops.iter().rev() {
            if op == p || op == end {
                return Err(EvalError::Malformed { start: p, end });
            }
            end = op - 1;
        }

        let mut acc = self.eval_range(p, end, depth + 1)?;
        for (k, &(op, bin)) in ops.iter().enumerate() {
            let rhs_end = ops.get(k + 1).map_or(q, |&(next, _)| next - 1);
            let rhs = self.eval_range(op + 1, rhs_end, depth + 1)?;
            acc = apply(bin, acc, rhs)?;
        }
        Ok(acc)
    }

    /// Evaluates the operand after a run of prefix dereferences, then reads
    /// through memory once per `*`.
    fn eval_deref(&self, p: usize, q: usize, depth: usize) -> Result<Word, EvalError> {
        let mut operand = p;
        while operand <= q && self.tokens[operand].kind == TokenKind::Deref {
            operand += 1;
        }
        if operand > q {
            return Err(EvalError::Malformed { start: q, end: q });
        }
        let mut value = self.eval_range(operand, q, depth + 1)?;
        for _ in p..operand {
            value = read_word(self.machine, value)?;
        }
        Ok(value)
    }
}

fn eval_atom<M: MachineView + ?Sized>(
    token: &Token,
    index: usize,
    machine: &M,
) -> Result<Word, EvalError> {
    match token.kind {
        TokenKind::Number => {
            let digits = token.lexeme.strip_suffix('u').unwrap_or(&token.lexeme);
            parse_literal(digits, 10, &token.lexeme)
        }
        TokenKind::HexNumber => {
            let digits = token
                .lexeme
                .strip_prefix("0x")
                .or_else(|| token.lexeme.strip_prefix("0X"))
                .unwrap_or(&token.lexeme);
            parse_literal(digits, 16, &token.lexeme)
        }
        TokenKind::Register => {
            let name = token.lexeme.strip_prefix('$').unwrap_or(&token.lexeme);
            machine
                .read_register(name)
                .ok_or_else(|| EvalError::UnknownRegister {
                    name: name.to_owned(),
                })
        }
        TokenKind::Operator(_)
        | TokenKind::Deref
        | TokenKind::LeftParen
        | TokenKind::RightParen => Err(EvalError::Malformed {
            start: index,
            end: index,
        }),
    }
}

/// Folds digits with wrapping arithmetic, so oversized literals truncate to
/// the low word bits.
fn parse_literal(digits: &str, radix: u32, lexeme: &str) -> Result<Word, EvalError> {
    let invalid = || EvalError::InvalidLiteral {
        lexeme: lexeme.to_owned(),
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    digits
        .chars()
        .try_fold(0, |acc: Word, c| {
            c.to_digit(radix)
                .map(|digit| acc.wrapping_mul(radix).wrapping_add(digit))
        })
        .ok_or_else(invalid)
}

fn read_word<M: MachineView + ?Sized>(machine: &M, address: Word) -> Result<Word, EvalError> {
    if machine.in_range(address, WORD_BYTES) {
        Ok(machine.read_memory(address, WORD_BYTES))
    } else {
        Err(EvalError::AddressOutOfRange { address })
    }
}

fn apply(op: BinaryOp, lhs: Word, rhs: Word) -> Result<Word, EvalError> {
    Ok(match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => lhs.checked_div(rhs).ok_or(EvalError::DivisionByZero)?,
        BinaryOp::Eq => Word::from(lhs == rhs),
        BinaryOp::Ne => Word::from(lhs != rhs),
        BinaryOp::And => Word::from(lhs != 0 && rhs != 0),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{evaluate, MAX_EVAL_DEPTH};
    use crate::{tokenize, EvalError, GuestMachine, Token, TokenKind, Word, GUEST_MEMORY_BASE};

    fn machine() -> GuestMachine {
        let mut machine = GuestMachine::new(64);
        machine.set_register("sp", GUEST_MEMORY_BASE + 8).expect("sp");
        machine.set_register("a0", 5).expect("a0");
        machine
            .store(GUEST_MEMORY_BASE + 8, 4, GUEST_MEMORY_BASE + 16)
            .expect("in range");
        machine.store(GUEST_MEMORY_BASE + 16, 4, 0x1234).expect("in range");
        machine
    }

    fn eval(input: &str) -> Result<Word, EvalError> {
        let tokens = tokenize(input).expect("expression should tokenize");
        evaluate(&tokens, &machine())
    }

    #[rstest]
    #[case("2+3*4", 14)]
    #[case("(2+3)*4", 20)]
    #[case("0x1F", 31)]
    #[case("0xFF+1", 256)]
    #[case("10-4-3", 3)]
    #[case("100/10/5", 2)]
    #[case("7/2", 3)]
    #[case("((((1))))", 1)]
    #[case("(1+2)*(3+4)", 21)]
    #[case("1+2==3", 1)]
    #[case("1+2!=3", 0)]
    #[case("1==1&&2==2", 1)]
    #[case("1&&0", 0)]
    #[case("3u*4u", 12)]
    #[case("$a0*2", 10)]
    #[case("$0", 0)]
    fn evaluates_arithmetic(#[case] input: &str, #[case] expected: Word) {
        assert_eq!(eval(input), Ok(expected));
    }

    #[test]
    fn arithmetic_wraps_at_word_width() {
        assert_eq!(eval("0xFFFFFFFF+1"), Ok(0));
        assert_eq!(eval("0-1"), Ok(Word::MAX));
        assert_eq!(eval("0x10000*0x10000"), Ok(0));
        assert_eq!(eval("4294967297"), Ok(1));
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(eval("1/0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("1/(2-2)"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn dereference_reads_guest_words() {
        assert_eq!(eval("*$sp"), Ok(GUEST_MEMORY_BASE + 16));
        assert_eq!(eval("**$sp"), Ok(0x1234));
        assert_eq!(eval("*$sp+1"), Ok(GUEST_MEMORY_BASE + 17));
        assert_eq!(eval("*($sp+8)"), Ok(0x1234));
        assert_eq!(eval("2**$sp"), Ok((GUEST_MEMORY_BASE + 16).wrapping_mul(2)));
    }

    #[test]
    fn dereference_outside_memory_fails() {
        assert_eq!(
            eval("*0x10"),
            Err(EvalError::AddressOutOfRange { address: 0x10 })
        );
        assert_eq!(
            eval("*0x8000003e"),
            Err(EvalError::AddressOutOfRange {
                address: 0x8000_003e
            })
        );
    }

    #[test]
    fn unknown_register_fails() {
        assert_eq!(
            eval("$rax+1"),
            Err(EvalError::UnknownRegister { name: "rax".into() })
        );
    }

    #[rstest]
    #[case("(1+2")]
    #[case("1+2)")]
    #[case(")1+2(")]
    fn unbalanced_parentheses_fail(#[case] input: &str) {
        assert_eq!(eval(input), Err(EvalError::UnmatchedParen));
    }

    #[rstest]
    #[case("1+")]
    #[case("+1")]
    #[case("1 2")]
    #[case("()")]
    #[case("*")]
    #[case("1*")]
    #[case("(")]
    fn malformed_ranges_fail(#[case] input: &str) {
        assert!(matches!(eval(input), Err(EvalError::Malformed { .. })));
    }

    fn right_nested(levels: usize) -> String {
        format!("{}1{}", "(1+".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn nesting_up_to_the_bound_evaluates() {
        let expected = Word::try_from(MAX_EVAL_DEPTH).expect("bound fits a word");
        assert_eq!(eval(&right_nested(MAX_EVAL_DEPTH - 1)), Ok(expected));
    }

    #[test]
    fn nesting_past_the_bound_fails() {
        assert_eq!(
            eval(&right_nested(MAX_EVAL_DEPTH)),
            Err(EvalError::NestingTooDeep {
                limit: MAX_EVAL_DEPTH
            })
        );
    }

    #[test]
    fn stripped_parentheses_and_chains_do_not_count_as_nesting() {
        let levels = 4 * MAX_EVAL_DEPTH;
        let wrapped = format!("{}7{}", "(".repeat(levels), ")".repeat(levels));
        assert_eq!(eval(&wrapped), Ok(7));
        let chain = vec!["2"; levels].join("-");
        let expected = (1..levels).fold(2, |acc: Word, _| acc.wrapping_sub(2));
        assert_eq!(eval(&chain), Ok(expected));
    }

    #[test]
    fn malformed_operand_positions_are_reported_outermost_first() {
        assert_eq!(eval("1++2+3"), Err(EvalError::Malformed { start: 0, end: 1 }));
        assert_eq!(eval("1+2+"), Err(EvalError::Malformed { start: 0, end: 3 }));
        assert_eq!(eval("+1*2"), Err(EvalError::Malformed { start: 0, end: 3 }));
    }

    #[test]
    fn empty_sequence_fails() {
        assert_eq!(evaluate(&[], &machine()), Err(EvalError::Empty));
    }

    #[test]
    fn hand_built_tokens_with_bad_digits_fail() {
        let tokens = [Token {
            kind: TokenKind::Number,
            lexeme: "12a".into(),
        }];
        assert_eq!(
            evaluate(&tokens, &machine()),
            Err(EvalError::InvalidLiteral {
                lexeme: "12a".into()
            })
        );
    }
}
