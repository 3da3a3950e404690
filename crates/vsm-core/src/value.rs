use std::fmt;

use vsm_lang::ast::BinOp;

// ---------------------------------------------------------------------------
// Value — dynamic signal value
// ---------------------------------------------------------------------------

/// Dynamically-typed signal value.
///
/// Values enter the system as raw text and are classified on ingest
/// ([`Value::type_incoming`]); replayed log lines carry a printed repr and go
/// through the stricter [`Value::parse_repr`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Value {
    /// Classify a raw inbound text value.
    ///
    /// Order matters: quoted string, boolean, float (contains a `.`),
    /// all-digits integer. Anything else is untypable and the signal is
    /// dropped by the caller.
    pub fn type_incoming(raw: &str) -> Option<Value> {
        if let Some(stripped) = strip_quotes(raw) {
            return Some(Value::Str(stripped.to_string()));
        }
        // Only the first letter may be capitalised, to disallow e.g. "trUe".
        match raw {
            "true" | "True" => return Some(Value::Bool(true)),
            "false" | "False" => return Some(Value::Bool(false)),
            _ => {}
        }
        if raw.contains('.') {
            return raw.parse::<f64>().ok().map(Value::Float);
        }
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            return raw.parse::<i64>().ok().map(Value::Int);
        }
        None
    }

    /// Parse a value back from its logged repr (replay path).
    ///
    /// The four kinds round-trip as: `'text'` / `"text"`, `True`/`False`,
    /// integer digits, float. Reprs are parsed explicitly, never
    /// evaluated.
    pub fn parse_repr(raw: &str) -> Option<Value> {
        let raw = raw.trim();
        if let Some(stripped) = strip_quotes(raw) {
            return Some(Value::Str(stripped.to_string()));
        }
        match raw {
            "True" => return Some(Value::Bool(true)),
            "False" => return Some(Value::Bool(false)),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(Value::Int(i));
        }
        raw.parse::<f64>().ok().map(Value::Float)
    }

    /// Printed repr used in signal log lines: strings gain single quotes,
    /// everything else matches [`Display`](fmt::Display).
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{s}'"),
            other => other.to_string(),
        }
    }

    /// Truthiness for condition results: false for `False`, `0`, `0.0`, and
    /// the empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn strip_quotes(raw: &str) -> Option<&str> {
    if raw.len() <= 2 {
        return None;
    }
    let bytes = raw.as_bytes();
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => {
                // Keep a trailing ".0" on integral floats so float-typed
                // values stay visibly floats in dumps and log lines.
                if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e16 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison & arithmetic
// ---------------------------------------------------------------------------

/// Compare two values under a comparison operator.
///
/// Numeric kinds promote int→float when mixed. Equality between mismatched
/// kinds is false and `!=` is its logical negation (hence true); relational
/// operators between mismatched kinds are false, never an error.
pub fn compare(op: BinOp, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let ord = x.cmp(y);
            match op {
                BinOp::Eq => ord.is_eq(),
                BinOp::Ne => !ord.is_eq(),
                BinOp::Lt => ord.is_lt(),
                BinOp::Gt => ord.is_gt(),
                BinOp::Le => ord.is_le(),
                BinOp::Ge => ord.is_ge(),
                _ => false,
            }
        }
        (Value::Bool(x), Value::Bool(y)) => match op {
            BinOp::Eq => x == y,
            BinOp::Ne => x != y,
            _ => false,
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match op {
                BinOp::Eq => x == y,
                BinOp::Ne => x != y,
                BinOp::Lt => x < y,
                BinOp::Gt => x > y,
                BinOp::Le => x <= y,
                BinOp::Ge => x >= y,
                _ => false,
            },
            // kind mismatch: equality is false, inequality true
            _ => matches!(op, BinOp::Ne),
        },
    }
}

/// Arithmetic on two values: `+ - * /`.
///
/// Int op Int stays Int except for division, which is always float (true
/// division). Mixed numeric operands promote to float. Non-numeric operands
/// and division by zero yield no value, skipping the enclosing rule.
pub fn arith(op: BinOp, a: &Value, b: &Value) -> Option<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        match op {
            BinOp::Add => return x.checked_add(*y).map(Value::Int),
            BinOp::Sub => return x.checked_sub(*y).map(Value::Int),
            BinOp::Mul => return x.checked_mul(*y).map(Value::Int),
            BinOp::Div => {}
            _ => return None,
        }
    }
    let x = a.as_f64()?;
    let y = b.as_f64()?;
    let out = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return None;
            }
            x / y
        }
        _ => return None,
    };
    Some(Value::Float(out))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
