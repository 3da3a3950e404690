use winnow::ascii::multispace0;
use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

pub(crate) fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    // First character must be alphabetic or underscore (not digit).
    if !input.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

/// Dotted signal name: `ident { "." ident }`, joined back with dots.
pub(crate) fn signal_name(input: &mut &str) -> ModalResult<String> {
    let first = ident.parse_next(input)?;
    let mut name = first.to_string();
    while opt(literal(".")).parse_next(input)?.is_some() {
        let part = winnow::combinator::cut_err(ident)
            .context(StrContext::Expected(StrContextValue::Description(
                "identifier after '.'",
            )))
            .parse_next(input)?;
        name.push('.');
        name.push_str(part);
    }
    Ok(name)
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// String literal in single or double quotes (no escapes).
pub(crate) fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let quote = alt((literal("\""), literal("'"))).parse_next(input)?;
    let delim = quote.chars().next().unwrap_or('"');
    let content = take_while(0.., move |c: char| c != delim).parse_next(input)?;
    winnow::combinator::cut_err(literal(quote))
        .context(StrContext::Expected(StrContextValue::Description(
            "closing quote",
        )))
        .parse_next(input)?;
    Ok(content.to_string())
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

pub(crate) fn ws_skip(input: &mut &str) -> ModalResult<()> {
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Keyword matching with word boundary
// ---------------------------------------------------------------------------

/// Match an exact keyword string, ensuring it's not a prefix of a longer
/// identifier (i.e. the next character is not alphanumeric or `_`).
pub(crate) fn kw<'a>(keyword: &'static str) -> impl FnMut(&mut &'a str) -> ModalResult<()> {
    move |input: &mut &'a str| {
        let saved = *input;
        literal(keyword).parse_next(input)?;
        if input.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            *input = saved;
            return Err(ErrMode::Backtrack(ContextError::new()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Number literal
// ---------------------------------------------------------------------------

pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

/// Parse a number literal: integer, or float when a decimal point follows.
pub(crate) fn number_literal(input: &mut &str) -> ModalResult<Number> {
    let integer_part = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let has_dot = opt(literal(".")).parse_next(input)?.is_some();
    if has_dot {
        let frac_part = take_while(1.., |c: char| c.is_ascii_digit())
            .context(StrContext::Expected(StrContextValue::Description(
                "digits after decimal point",
            )))
            .parse_next(input)?;
        let s = format!("{integer_part}.{frac_part}");
        let v: f64 = s.parse().map_err(|_| ErrMode::Cut(ContextError::new()))?;
        Ok(Number::Float(v))
    } else {
        let v: i64 = integer_part
            .parse()
            .map_err(|_| ErrMode::Cut(ContextError::new()))?;
        Ok(Number::Int(v))
    }
}
