use vsm_lang::ast::{BinOp, Expr};

use crate::state::StateStore;
use crate::value::{self, Value};

// ---------------------------------------------------------------------------
// Expression evaluation against the state store
// ---------------------------------------------------------------------------

/// Evaluate a condition expression against the current state.
///
/// Returns `None` when the expression references a signal that has never
/// been observed (the rule is silently skipped) or when an operation is
/// undefined for its operand kinds. Logical `and`/`or` short-circuit, so a
/// missing signal in the pruned branch does not poison the result.
pub fn eval_expr(expr: &Expr, state: &StateStore) -> Option<Value> {
    match expr {
        Expr::Int(i) => Some(Value::Int(*i)),
        Expr::Float(f) => Some(Value::Float(*f)),
        Expr::StringLit(s) => Some(Value::Str(s.clone())),
        Expr::Bool(b) => Some(Value::Bool(*b)),
        Expr::Signal(name) => state.get(name).cloned(),
        Expr::Not(inner) => {
            let v = eval_expr(inner, state)?;
            Some(Value::Bool(!v.is_truthy()))
        }
        Expr::Neg(inner) => match eval_expr(inner, state)? {
            Value::Int(i) => Some(Value::Int(-i)),
            Value::Float(f) => Some(Value::Float(-f)),
            _ => None,
        },
        Expr::BinOp { op, left, right } => match op {
            BinOp::And => {
                let l = eval_expr(left, state)?;
                if !l.is_truthy() {
                    return Some(Value::Bool(false));
                }
                let r = eval_expr(right, state)?;
                Some(Value::Bool(r.is_truthy()))
            }
            BinOp::Or => {
                let l = eval_expr(left, state)?;
                if l.is_truthy() {
                    return Some(Value::Bool(true));
                }
                let r = eval_expr(right, state)?;
                Some(Value::Bool(r.is_truthy()))
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let l = eval_expr(left, state)?;
                let r = eval_expr(right, state)?;
                Some(Value::Bool(value::compare(*op, &l, &r)))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let l = eval_expr(left, state)?;
                let r = eval_expr(right, state)?;
                value::arith(*op, &l, &r)
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
