//! Hand-written recursive-descent parser for Pointy-Lang.
//!
//! No parser-generator dependency: the grammar is small and the
//! disambiguation rules (descriptor vs. factor, operator precedence) are
//! easier to express directly than to encode in a generated table.
//!
//! Operator precedence, tightest-binding first: `PARALLEL` binds tighter
//! than `POINTER`/`PPOINTER` (which sit at the same, lowest, left-associative
//! tier). This groups `a |-> b -> c || d -> e` as
//! `Seq(Broadcast(a, Parallel(c, d)), e)`, matching the worked example in the
//! language reference: a broadcast source feeds every sibling of a parallel
//! group before the group's combined stream hands off to what follows.
//!
//! A `NUMBER` immediately followed by `POINTER`/`PPOINTER` is a *descriptor*:
//! it replicates the single task term that follows, and the operator that
//! introduced it becomes the first edge connecting those replicas to the
//! rest of the expression. A descriptor is recognized anywhere the grammar
//! expects an operand — the start of the program, the right-hand side of
//! any binary operator, or a `task_group` element — not only at program
//! start, since `expression` (which a descriptor production reduces to) is
//! itself the right operand of every binary production and of `task_group`.

use crate::ast::Expr;
use crate::error::{PointyError, Result};
use crate::lexer::{Position, Token, TokenKind};

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a complete Pointy-Lang program from already-lexed tokens.
pub fn parse(tokens: Vec<Token>) -> Result<Expr> {
    let significant: Vec<Token> = tokens.into_iter().filter(|t| t.is_significant()).collect();
    let mut parser = Parser::new(significant);
    let expr = parser.parse_top_level()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Convenience: lex and parse in one step.
pub fn parse_source(src: &str) -> Result<Expr> {
    parse(crate::lexer::tokenize(src))
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> Option<TokenKind> {
        self.current().map(|t| t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn position(&self) -> Position {
        self.current()
            .map(|t| t.position)
            .or_else(|| self.tokens.last().map(|t| t.position))
            .unwrap_or_default()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(t) if t.kind == TokenKind::Error => format!("invalid character {:?}", t.lexeme),
            Some(t) => format!("{:?} {:?}", t.kind, t.lexeme),
            None => "end of input".to_string(),
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, expected: &str) -> Result<Token> {
        match self.current_kind() {
            Some(k) if k == kind && k != TokenKind::Error => Ok(self.bump().unwrap()),
            _ => Err(PointyError::syntax(self.position(), expected, self.describe_current())),
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        match self.current() {
            None => Ok(()),
            Some(_) => Err(PointyError::syntax(self.position(), "end of input", self.describe_current())),
        }
    }

    fn parse_number(&mut self, context: &str) -> Result<u64> {
        let tok = self.expect_kind(TokenKind::Number, context)?;
        tok.lexeme
            .parse::<u64>()
            .map_err(|_| PointyError::shape(format!("number literal {:?} out of range", tok.lexeme)))
    }

    fn operator_tier(kind: TokenKind) -> Option<u8> {
        match kind {
            TokenKind::Pointer | TokenKind::PPointer => Some(1),
            TokenKind::Parallel => Some(2),
            _ => None,
        }
    }

    fn combine(op: TokenKind, lhs: Expr, rhs: Expr) -> Expr {
        match op {
            TokenKind::Pointer => Expr::seq(lhs, rhs),
            TokenKind::PPointer => Expr::broadcast(lhs, rhs),
            TokenKind::Parallel => Expr::parallel(lhs, rhs),
            _ => unreachable!("combine called with a non-operator token kind"),
        }
    }

    fn is_descriptor_lookahead(&self) -> bool {
        self.current_kind() == Some(TokenKind::Number)
            && matches!(
                self.peek_kind_at(1),
                Some(TokenKind::Pointer) | Some(TokenKind::PPointer)
            )
    }

    fn parse_top_level(&mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(PointyError::syntax(Position::default(), "an expression", "end of input"));
        }
        self.parse_expr(1)
    }

    /// Precedence-climbing entry point: parses an expression containing only
    /// operators at tier `min_tier` or tighter-binding.
    fn parse_expr(&mut self, min_tier: u8) -> Result<Expr> {
        let mut lhs = self.parse_operand()?;
        loop {
            let Some(tier) = self.current_kind().and_then(Self::operator_tier) else {
                break;
            };
            if tier < min_tier {
                break;
            }
            let op = self.bump().unwrap().kind;
            let rhs = self.parse_expr(tier + 1)?;
            lhs = Self::combine(op, lhs, rhs);
        }
        Ok(lhs)
    }

    /// Parses the left-hand term any binary-operator chain begins from:
    /// either a replica descriptor (`n -> expr` / `n |-> expr`) or a plain
    /// task atom. Recognizing a descriptor here, rather than only once at
    /// the very start of the program, is what lets one appear anywhere the
    /// grammar's `expression` nonterminal can — an operand of `||`, a
    /// `task_group` element — since `parse_expr` calls back into this for
    /// every rhs it parses.
    fn parse_operand(&mut self) -> Result<Expr> {
        if !self.is_descriptor_lookahead() {
            return self.parse_atom();
        }

        let n = self.parse_number("a replica count")?;
        if n == 0 {
            return Err(PointyError::shape("descriptor replica count must be at least 1"));
        }
        let introducer = self.bump().expect("checked by lookahead").kind;
        let child = self.parse_atom()?;
        let mut lhs = Expr::descriptor(n, child);

        // The introducer governs the wiring from the replicated child into
        // whatever follows; a literal operator token directly after the
        // child (if any) is just a separator here, not a second operator,
        // so it is consumed without being reused as the combine kind.
        if self.current_kind().and_then(Self::operator_tier).is_some() {
            self.bump();
            let rhs = self.parse_expr(2)?;
            lhs = Self::combine(introducer, lhs, rhs);
        }
        Ok(lhs)
    }

    /// A single task term, optionally wrapped by a retry operator in either
    /// spelling (`n * task` or `task * n`).
    fn parse_atom(&mut self) -> Result<Expr> {
        if self.current_kind() == Some(TokenKind::Number) && self.peek_kind_at(1) == Some(TokenKind::Retry) {
            let n = self.parse_number("a retry factor")?;
            self.expect_kind(TokenKind::Retry, "'*'")?;
            let task = self.parse_task()?;
            return Ok(Expr::retry_inverse(n, task));
        }

        let task = self.parse_task()?;
        if self.current_kind() == Some(TokenKind::Retry) {
            self.bump();
            let n = self.parse_number("a retry factor")?;
            return Ok(Expr::retry(task, n));
        }
        Ok(task)
    }

    /// `task := TASKNAME (LPAREN task_group RPAREN)*`
    fn parse_task(&mut self) -> Result<Expr> {
        let name_tok = self.expect_kind(TokenKind::TaskName, "a task name")?;
        let mut expr = Expr::task_ref(name_tok.lexeme);

        while self.current_kind() == Some(TokenKind::LParen) {
            self.bump();
            let group = self.parse_task_group()?;
            self.expect_kind(TokenKind::RParen, "')'")?;
            expr = Expr::call(expr, group);
        }
        Ok(expr)
    }

    /// `task_group := expression (SEPERATOR expression)+` — at least two
    /// branches, matching the grammar's left-recursive definition which
    /// always includes a separator.
    fn parse_task_group(&mut self) -> Result<Vec<Expr>> {
        let mut group = vec![self.parse_expr(1)?];
        while self.current_kind() == Some(TokenKind::Seperator) {
            self.bump();
            group.push(self.parse_expr(1)?);
        }
        if group.len() < 2 {
            return Err(PointyError::syntax(self.position(), "',' and another branch", self.describe_current()));
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_is_a_syntax_error() {
        assert!(matches!(parse_source(""), Err(PointyError::SyntaxError { .. })));
    }

    #[test]
    fn single_task_parses_to_a_task_ref() {
        assert_eq!(parse_source("downloader").unwrap(), Expr::task_ref("downloader"));
    }

    #[test]
    fn retry_zero_means_exactly_one_attempt() {
        assert_eq!(parse_source("t * 0").unwrap(), Expr::retry(Expr::task_ref("t"), 0));
    }

    #[test]
    fn retry_inverse_spelling() {
        assert_eq!(parse_source("5 * parser").unwrap(), Expr::retry_inverse(5, Expr::task_ref("parser")));
    }

    #[test]
    fn descriptor_zero_is_a_shape_error() {
        assert!(matches!(parse_source("0 -> t"), Err(PointyError::ShapeError { .. })));
    }

    #[test]
    fn nested_calls_bind_inner_task_to_inner_call() {
        let parsed = parse_source("a(b, c(d, e))").unwrap();
        let expected = Expr::call(
            Expr::task_ref("a"),
            vec![Expr::task_ref("b"), Expr::call(Expr::task_ref("c"), vec![Expr::task_ref("d"), Expr::task_ref("e")])],
        );
        assert_eq!(parsed, expected);
    }

    #[test]
    fn call_chaining_is_left_recursive() {
        let parsed = parse_source("t(a, b)(c, d)").unwrap();
        let expected = Expr::call(
            Expr::call(Expr::task_ref("t"), vec![Expr::task_ref("a"), Expr::task_ref("b")]),
            vec![Expr::task_ref("c"), Expr::task_ref("d")],
        );
        assert_eq!(parsed, expected);
    }

    #[test]
    fn seq_is_left_associative() {
        let parsed = parse_source("a -> b -> c").unwrap();
        let expected = Expr::seq(Expr::seq(Expr::task_ref("a"), Expr::task_ref("b")), Expr::task_ref("c"));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn parallel_binds_tighter_than_pointer() {
        let parsed = parse_source("a -> b || c").unwrap();
        let expected = Expr::seq(Expr::task_ref("a"), Expr::parallel(Expr::task_ref("b"), Expr::task_ref("c")));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn worked_example_matches_the_language_reference_semantics() {
        let parsed = parse_source("3 |-> downloader -> 5 * parser || notifier -> router(success, failure)").unwrap();
        let expected = Expr::seq(
            Expr::broadcast(
                Expr::descriptor(3, Expr::task_ref("downloader")),
                Expr::parallel(Expr::retry_inverse(5, Expr::task_ref("parser")), Expr::task_ref("notifier")),
            ),
            Expr::call(Expr::task_ref("router"), vec![Expr::task_ref("success"), Expr::task_ref("failure")]),
        );
        assert_eq!(parsed, expected);
    }

    #[test]
    fn unknown_character_reports_syntax_error_with_position() {
        let err = parse_source("a -> $").unwrap_err();
        match err {
            PointyError::SyntaxError { position, .. } => assert_eq!(position.column, 6),
            other => panic!("expected SyntaxError, got {other:?}"),
        }
    }

    #[test]
    fn call_group_requires_at_least_two_branches() {
        assert!(matches!(parse_source("router(ok)"), Err(PointyError::SyntaxError { .. })));
    }

    #[test]
    fn descriptor_parses_as_a_parallel_operand() {
        let parsed = parse_source("a || 2 |-> b").unwrap();
        let expected = Expr::parallel(Expr::task_ref("a"), Expr::descriptor(2, Expr::task_ref("b")));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn descriptor_parses_as_a_task_group_element() {
        let parsed = parse_source("router(2 |-> a, b)").unwrap();
        let expected = Expr::call(Expr::task_ref("router"), vec![Expr::descriptor(2, Expr::task_ref("a")), Expr::task_ref("b")]);
        assert_eq!(parsed, expected);
    }
}
