//! Tagged syntax tree produced by the parser.
//!
//! Pointy-Lang has no separate "statement" form — a program is a single
//! expression built from task references combined by `->`, `|->`, `||`,
//! prefixed replica descriptors, and trailing retry factors.

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A bare task reference, e.g. `downloader`.
    TaskRef(String),

    /// `lhs -> rhs`: rhs starts once every upstream dependency of lhs (the
    /// whole left subtree) has succeeded.
    Seq(Box<Expr>, Box<Expr>),

    /// `lhs |-> rhs`: rhs receives one independent delivery per predecessor
    /// in lhs that succeeds (broadcast fan-out).
    Broadcast(Box<Expr>, Box<Expr>),

    /// `lhs || rhs`: lhs and rhs run concurrently with no ordering between
    /// them.
    Parallel(Box<Expr>, Box<Expr>),

    /// `expr * n`: expr may be attempted up to `n` additional times after an
    /// initial failure.
    Retry(Box<Expr>, u64),

    /// `n * expr`, written with the factor first. Semantically identical to
    /// `Retry` — kept distinct so the parser does not need to normalize
    /// operand order before the tree is built, and so error messages can
    /// name which spelling was used.
    RetryInverse(u64, Box<Expr>),

    /// `n |-> expr` / `n -> expr` with a leading bare number: materializes
    /// `n` independent replicas of `expr`.
    Descriptor(u64, Box<Expr>),

    /// `callee(arg1, arg2, ...)`: a conditional dispatch. `callee` is run,
    /// and its declared branch selector picks which of `args` (if any)
    /// becomes its successor.
    Call(Box<Expr>, Vec<Expr>),
}

impl Expr {
    pub fn task_ref(name: impl Into<String>) -> Self {
        Expr::TaskRef(name.into())
    }

    pub fn seq(lhs: Expr, rhs: Expr) -> Self {
        Expr::Seq(Box::new(lhs), Box::new(rhs))
    }

    pub fn broadcast(lhs: Expr, rhs: Expr) -> Self {
        Expr::Broadcast(Box::new(lhs), Box::new(rhs))
    }

    pub fn parallel(lhs: Expr, rhs: Expr) -> Self {
        Expr::Parallel(Box::new(lhs), Box::new(rhs))
    }

    pub fn retry(expr: Expr, factor: u64) -> Self {
        Expr::Retry(Box::new(expr), factor)
    }

    pub fn retry_inverse(factor: u64, expr: Expr) -> Self {
        Expr::RetryInverse(factor, Box::new(expr))
    }

    pub fn descriptor(count: u64, expr: Expr) -> Self {
        Expr::Descriptor(count, Box::new(expr))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call(Box::new(callee), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use proptest::prelude::*;

    /// Renders an `Expr` back into Pointy-Lang source, with no parentheses.
    /// Only faithful for trees shaped the way `parse_source` builds them —
    /// left-leaning `Seq`/`Broadcast` spines with `Parallel` grouped on the
    /// right at the next tier up. That's exactly the shape anything that
    /// came out of `parse_source` already has, which is all this is ever
    /// applied to below.
    fn to_source(expr: &Expr) -> String {
        match expr {
            Expr::TaskRef(name) => name.clone(),
            Expr::Seq(l, r) => format!("{} -> {}", to_source(l), to_source(r)),
            Expr::Broadcast(l, r) => format!("{} |-> {}", to_source(l), to_source(r)),
            Expr::Parallel(l, r) => format!("{} || {}", to_source(l), to_source(r)),
            Expr::Retry(inner, n) => format!("{} * {n}", to_source(inner)),
            Expr::RetryInverse(n, inner) => format!("{n} * {}", to_source(inner)),
            Expr::Descriptor(n, inner) => format!("{n} -> {}", to_source(inner)),
            Expr::Call(callee, args) => {
                let rendered: Vec<String> = args.iter().map(to_source).collect();
                format!("{}({})", to_source(callee), rendered.join(", "))
            }
        }
    }

    fn term_strategy() -> impl Strategy<Value = String> {
        let name = "[a-z][a-z0-9]{0,5}";
        prop_oneof![
            name.prop_map(|n| n),
            (name, 1u64..=5).prop_map(|(n, factor)| format!("{n} * {factor}")),
            (1u64..=5, name).prop_map(|(factor, n)| format!("{factor} * {n}")),
        ]
    }

    fn operator_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("->"), Just("|->"), Just("||")]
    }

    fn chain_strategy() -> impl Strategy<Value = String> {
        (term_strategy(), prop::collection::vec((operator_strategy(), term_strategy()), 0..4)).prop_map(
            |(first, rest)| {
                let mut src = first;
                for (op, term) in rest {
                    src.push_str(&format!(" {op} {term}"));
                }
                src
            },
        )
    }

    proptest! {
        /// Parse, re-render, re-parse: canonicalization modulo whitespace
        /// should land on the identical tree, for any chain the parser
        /// could have produced in the first place.
        #[test]
        fn parse_render_reparse_round_trips(src in chain_strategy()) {
            let expr = parse_source(&src).expect("generated source must parse");
            let rendered = to_source(&expr);
            let reparsed = parse_source(&rendered).expect("rendered source must re-parse");
            prop_assert_eq!(expr, reparsed);
        }
    }
}
