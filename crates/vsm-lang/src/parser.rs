use winnow::combinator::{alt, cut_err, opt};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::{BinOp, Expr};
use crate::parse_utils::{Number, kw, number_literal, quoted_string, signal_name, ws_skip};

/// Parse a complete condition expression.
///
/// Accepts both symbolic and keyword spellings of the logical operators
/// (`&&`/`and`, `||`/`or`, `!`/`not`). The exclusive-or operator `^^`
/// binds loosest and desugars to `!=` of its grouped operands.
pub fn parse_condition(input: &str) -> anyhow::Result<Expr> {
    let trimmed = input.trim();
    full_expr
        .parse(trimmed)
        .map_err(|e| anyhow::anyhow!("invalid condition '{input}': {e}"))
}

fn full_expr(input: &mut &str) -> ModalResult<Expr> {
    let expr = xor_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Precedence levels (lowest to highest)
// ---------------------------------------------------------------------------

/// `xor_expr = or_expr { "^^" or_expr }` — desugars to `!=`.
fn xor_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = or_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("^^")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(or_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::Ne,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `or_expr = and_expr { ("||" | "or") and_expr }`
fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = and_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let found = opt(alt((literal("||").void(), kw("or")))).parse_next(input)?;
        if found.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(and_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `and_expr = not_expr { ("&&" | "and") not_expr }`
fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = not_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let found = opt(alt((literal("&&").void(), kw("and")))).parse_next(input)?;
        if found.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(not_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `not_expr = ("!" | "not") not_expr | cmp_expr`
///
/// `not` binds looser than comparisons, so `not a == b` negates the whole
/// comparison.
fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    if bang_not_eq(input)? || opt(kw("not")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = cut_err(not_expr).parse_next(input)?;
        return Ok(Expr::Not(Box::new(inner)));
    }
    cmp_expr.parse_next(input)
}

/// Consume a `!` prefix, but only when it is not the start of `!=`.
fn bang_not_eq(input: &mut &str) -> ModalResult<bool> {
    let saved = *input;
    if opt(literal("!")).parse_next(input)?.is_some() {
        if input.starts_with('=') {
            *input = saved;
            return Ok(false);
        }
        return Ok(true);
    }
    Ok(false)
}

/// `cmp_expr = add_expr [cmp_op add_expr]`
fn cmp_expr(input: &mut &str) -> ModalResult<Expr> {
    let left = add_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    if let Some(op) = opt(cmp_op).parse_next(input)? {
        ws_skip.parse_next(input)?;
        let right = cut_err(add_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
    }
    Ok(left)
}

fn cmp_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        literal("==").value(BinOp::Eq),
        literal("!=").value(BinOp::Ne),
        literal("<=").value(BinOp::Le),
        literal(">=").value(BinOp::Ge),
        literal("<").value(BinOp::Lt),
        literal(">").value(BinOp::Gt),
    ))
    .parse_next(input)
}

/// `add_expr = mul_expr { ("+" | "-") mul_expr }`
fn add_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = mul_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(mul_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `mul_expr = unary_expr { ("*" | "/") unary_expr }`
fn mul_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(unary_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `unary_expr = ["-"] primary`
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    if opt(literal("-")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = primary.parse_next(input)?;
        Ok(Expr::Neg(Box::new(inner)))
    } else {
        primary.parse_next(input)
    }
}

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    alt((
        number_literal.map(|n| match n {
            Number::Int(i) => Expr::Int(i),
            Number::Float(f) => Expr::Float(f),
        }),
        quoted_string.map(Expr::StringLit),
        kw("true").map(|_| Expr::Bool(true)),
        kw("True").map(|_| Expr::Bool(true)),
        kw("false").map(|_| Expr::Bool(false)),
        kw("False").map(|_| Expr::Bool(false)),
        paren_expr,
        signal_primary,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(xor_expr).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;
    Ok(inner)
}

const RESERVED: &[&str] = &["and", "or", "not", "true", "false", "True", "False"];

fn signal_primary(input: &mut &str) -> ModalResult<Expr> {
    let saved = *input;
    let name = signal_name(input)?;
    // A reserved word is never a signal reference; without the dot
    // continuation it must have been consumed by an operator level above.
    if !name.contains('.') && RESERVED.contains(&name.as_str()) {
        *input = saved;
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    Ok(Expr::Signal(name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expr};

    fn sig(name: &str) -> Expr {
        Expr::Signal(name.to_string())
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::BinOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    // -- Literals & signal refs ---------------------------------------------

    #[test]
    fn parses_dotted_signal_equality() {
        let expr = parse_condition("transmission.gear == 'reverse'").unwrap();
        assert_eq!(
            expr,
            bin(
                BinOp::Eq,
                sig("transmission.gear"),
                Expr::StringLit("reverse".into())
            )
        );
        assert_eq!(expr.signals(), vec!["transmission.gear".to_string()]);
    }

    #[test]
    fn parses_number_literals() {
        assert_eq!(parse_condition("100").unwrap(), Expr::Int(100));
        assert_eq!(parse_condition("50.90").unwrap(), Expr::Float(50.90));
        assert_eq!(parse_condition("-3").unwrap(), Expr::Neg(Box::new(Expr::Int(3))));
    }

    #[test]
    fn parses_bool_literals_both_spellings() {
        assert_eq!(parse_condition("true").unwrap(), Expr::Bool(true));
        assert_eq!(parse_condition("True").unwrap(), Expr::Bool(true));
        assert_eq!(parse_condition("False").unwrap(), Expr::Bool(false));
    }

    #[test]
    fn parses_double_quoted_strings() {
        assert_eq!(
            parse_condition("gear == \"park\"").unwrap(),
            bin(BinOp::Eq, sig("gear"), Expr::StringLit("park".into()))
        );
    }

    // -- Logical operators ---------------------------------------------------

    #[test]
    fn accepts_symbolic_and_keyword_logic() {
        let a = parse_condition("moving != True and damage == True").unwrap();
        let b = parse_condition("moving != True && damage == True").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn or_binds_looser_than_and() {
        let expr = parse_condition("a.x == 1 || b.y == 2 && c.z == 3").unwrap();
        match expr {
            Expr::BinOp { op: BinOp::Or, .. } => {}
            other => panic!("expected Or at top, got {other:?}"),
        }
    }

    #[test]
    fn bang_negation_does_not_eat_not_equals() {
        let expr = parse_condition("!moving").unwrap();
        assert_eq!(expr, Expr::Not(Box::new(sig("moving"))));

        let expr = parse_condition("moving != True").unwrap();
        assert_eq!(expr, bin(BinOp::Ne, sig("moving"), Expr::Bool(true)));
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let expr = parse_condition("not moving == True").unwrap();
        assert_eq!(
            expr,
            Expr::Not(Box::new(bin(BinOp::Eq, sig("moving"), Expr::Bool(true))))
        );
    }

    // -- XOR desugaring ------------------------------------------------------

    #[test]
    fn xor_desugars_to_not_equal_of_groups() {
        let expr = parse_condition("phone.call == 'active' ^^ speed.value > 50.90").unwrap();
        assert_eq!(
            expr,
            bin(
                BinOp::Ne,
                bin(
                    BinOp::Eq,
                    sig("phone.call"),
                    Expr::StringLit("active".into())
                ),
                bin(BinOp::Gt, sig("speed.value"), Expr::Float(50.90)),
            )
        );
        assert_eq!(
            expr.signals(),
            vec!["phone.call".to_string(), "speed.value".to_string()]
        );
    }

    // -- Arithmetic ----------------------------------------------------------

    #[test]
    fn arithmetic_precedence() {
        // a + b * c parses as a + (b * c)
        let expr = parse_condition("a.v + b.v * c.v > 10").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::Gt,
                left,
                ..
            } => match *left {
                Expr::BinOp { op: BinOp::Add, right, .. } => {
                    assert!(matches!(*right, Expr::BinOp { op: BinOp::Mul, .. }));
                }
                other => panic!("expected Add, got {other:?}"),
            },
            other => panic!("expected Gt at top, got {other:?}"),
        }
    }

    #[test]
    fn subclause_arithmetic_in_parens() {
        let expr =
            parse_condition("(flux_capacitor.energy_generated - 1.21) < 0 && movement.speed > 100")
                .unwrap();
        assert_eq!(
            expr.signals(),
            vec![
                "flux_capacitor.energy_generated".to_string(),
                "movement.speed".to_string()
            ]
        );
    }

    // -- Signals collection --------------------------------------------------

    #[test]
    fn signals_deduplicated_in_source_order() {
        let expr = parse_condition("speed.value > 10 && speed.value < 50").unwrap();
        assert_eq!(expr.signals(), vec!["speed.value".to_string()]);
    }

    // -- Errors --------------------------------------------------------------

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_condition("a == 1 ===").is_err());
        assert!(parse_condition("").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse_condition("gear == 'park").is_err());
    }
}
