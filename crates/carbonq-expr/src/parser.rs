//! Target Expression Parser
//!
//! Parses the render target mini-language into an expression tree:
//!
//! ```text
//! expr  := call | name | number | string
//! call  := ident '(' (arg (',' arg)*)? ')'
//! arg   := (ident '=')? expr
//! name  := identChar+ ('.' identChar+)*  with glob chars * ? [ ] { }
//! ```
//!
//! Parsing is a plain recursive descent over bytes. `parse` returns the
//! expression together with the unconsumed remainder; callers reject targets
//! with a non-empty remainder and report both halves to the user. Brace
//! globs (`servers.{a,b}.cpu`) swallow their commas so they stay one name.

use std::collections::HashMap;
use std::fmt;

use carbonq_common::series::MetricRequest;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing expression")]
    MissingExpr,
    #[error("missing argument")]
    MissingArgument,
    #[error("missing comma")]
    MissingComma,
    #[error("missing closing quote")]
    MissingQuote,
    #[error("missing closing brace")]
    MissingBrace,
    #[error("invalid number")]
    BadNumber,
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
}

/// A function invocation node.
#[derive(Clone, Debug, PartialEq)]
pub struct CallExpr {
    pub function: String,
    pub args: Vec<Expr>,
    pub named: HashMap<String, Expr>,
    /// Raw source text between the call's parentheses, used to build derived
    /// series names like `sumSeries(a.b,a.c)`.
    pub arg_string: String,
}

/// One node of a parsed target.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(f64),
    QuotedString(String),
    Name(String),
    Call(CallExpr),
}

impl Expr {
    /// The metric fetches this expression needs. `from`/`until` are relative
    /// shifts (usually zero); the coordinator adds the request window.
    pub fn metrics(&self) -> Vec<MetricRequest> {
        match self {
            Expr::Const(_) | Expr::QuotedString(_) => vec![],
            Expr::Name(name) => vec![MetricRequest {
                metric: name.clone(),
                from: 0,
                until: 0,
            }],
            Expr::Call(call) => {
                let mut out: Vec<MetricRequest> =
                    call.args.iter().flat_map(|a| a.metrics()).collect();
                if call.function == "timeShift" {
                    if let Some(Ok(shift)) = call
                        .args
                        .get(1)
                        .map(|a| a.as_str())
                        .map(|s| s.and_then(|s| parse_interval(s, -1)))
                    {
                        for r in &mut out {
                            r.from += shift;
                            r.until += shift;
                        }
                    }
                }
                out
            }
        }
    }

    pub fn as_f64(&self) -> carbonq_common::Result<f64> {
        match self {
            Expr::Const(v) => Ok(*v),
            other => Err(carbonq_common::CarbonqError::BadArgument(format!(
                "expected number, got {other}"
            ))),
        }
    }

    pub fn as_i64(&self) -> carbonq_common::Result<i64> {
        Ok(self.as_f64()? as i64)
    }

    pub fn as_str(&self) -> carbonq_common::Result<&str> {
        match self {
            Expr::QuotedString(s) => Ok(s),
            other => Err(carbonq_common::CarbonqError::BadArgument(format!(
                "expected string, got {other}"
            ))),
        }
    }

    /// Booleans are written as the bare names `true` / `false`.
    pub fn as_bool(&self) -> carbonq_common::Result<bool> {
        match self {
            Expr::Name(n) if n == "true" => Ok(true),
            Expr::Name(n) if n == "false" => Ok(false),
            other => Err(carbonq_common::CarbonqError::BadArgument(format!(
                "expected true or false, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", fmt_f64(*v)),
            Expr::QuotedString(s) => write!(f, "\"{s}\""),
            Expr::Name(n) => write!(f, "{n}"),
            Expr::Call(call) => {
                write!(f, "{}(", call.function)?;
                let mut first = true;
                for a in &call.args {
                    if !first {
                        write!(f, ",")?;
                    }
                    first = false;
                    write!(f, "{a}")?;
                }
                let mut named: Vec<_> = call.named.iter().collect();
                named.sort_by(|a, b| a.0.cmp(b.0));
                for (k, v) in named {
                    if !first {
                        write!(f, ",")?;
                    }
                    first = false;
                    write!(f, "{k}={v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Formats a float the way targets are written: integral values lose the
/// fraction.
pub fn fmt_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Parses a relative interval like `1h` or `-5min` into seconds.
///
/// A bare interval takes `default_sign`; `timeShift` passes -1 so `"1h"`
/// means one hour back, while `summarize` passes +1.
pub fn parse_interval(s: &str, default_sign: i32) -> carbonq_common::Result<i32> {
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (default_sign, s),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = &rest[digits.len()..];
    let n: i32 = digits.parse().map_err(|_| {
        carbonq_common::CarbonqError::BadArgument(format!("invalid interval: {s}"))
    })?;
    let unit_secs = match unit {
        "s" | "" => 1,
        "min" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        "mon" => 30 * 86400,
        "y" => 365 * 86400,
        _ => {
            return Err(carbonq_common::CarbonqError::BadArgument(format!(
                "unknown interval unit: {s}"
            )))
        }
    };
    Ok(sign * n * unit_secs)
}

/// Parses one expression off the front of `input`, returning it with the
/// unconsumed remainder.
pub fn parse(input: &str) -> Result<(Expr, &str), ParseError> {
    let input = input.trim_start();
    let Some(&first) = input.as_bytes().first() else {
        return Err(ParseError::MissingExpr);
    };

    if first.is_ascii_digit() || first == b'-' || first == b'+' {
        return parse_const(input);
    }
    if first == b'\'' || first == b'"' {
        let (s, rest) = parse_string(input)?;
        return Ok((Expr::QuotedString(s), rest));
    }

    let (name, rest) = parse_name(input)?;
    if name.is_empty() {
        let c = input.chars().next().unwrap_or(' ');
        return Err(ParseError::UnexpectedCharacter(c));
    }
    if rest.as_bytes().first() == Some(&b'(') {
        let (arg_string, args, named, rest) = parse_arg_list(rest)?;
        return Ok((
            Expr::Call(CallExpr {
                function: name,
                args,
                named,
                arg_string,
            }),
            rest,
        ));
    }
    Ok((Expr::Name(name), rest))
}

fn parse_const(input: &str) -> Result<(Expr, &str), ParseError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let is_num = b.is_ascii_digit()
            || b == b'.'
            || b == b'e'
            || b == b'E'
            || ((b == b'+' || b == b'-')
                && (i == 0 || bytes[i - 1] == b'e' || bytes[i - 1] == b'E'));
        if !is_num {
            break;
        }
        i += 1;
    }
    let v: f64 = input[..i].parse().map_err(|_| ParseError::BadNumber)?;
    Ok((Expr::Const(v), &input[i..]))
}

fn parse_string(input: &str) -> Result<(String, &str), ParseError> {
    let quote = input.as_bytes()[0];
    let rest = &input[1..];
    match rest.find(quote as char) {
        Some(end) => Ok((rest[..end].to_owned(), &rest[end + 1..])),
        None => Err(ParseError::MissingQuote),
    }
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'.' | b'_' | b'-' | b'*' | b'?' | b':' | b'[' | b']')
}

fn parse_name(input: &str) -> Result<(String, &str), ParseError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if is_name_char(bytes[i]) {
            i += 1;
        } else if bytes[i] == b'{' {
            // Brace globs contain commas; swallow through the matching brace.
            match input[i..].find('}') {
                Some(close) => i += close + 1,
                None => return Err(ParseError::MissingBrace),
            }
        } else {
            break;
        }
    }
    Ok((input[..i].to_owned(), &input[i..]))
}

fn parse_arg_list(
    input: &str,
) -> Result<(String, Vec<Expr>, HashMap<String, Expr>, &str), ParseError> {
    debug_assert_eq!(input.as_bytes().first(), Some(&b'('));
    let arg_src = &input[1..];
    let mut rest = arg_src.trim_start();
    let mut args = Vec::new();
    let mut named = HashMap::new();

    if rest.as_bytes().first() == Some(&b')') {
        return Ok((String::new(), args, named, &rest[1..]));
    }

    loop {
        let (arg, after) = parse(rest)?;
        rest = after;

        // `ident=expr` at the top of an argument is a named argument.
        if rest.as_bytes().first() == Some(&b'=') {
            let Expr::Name(key) = arg else {
                return Err(ParseError::UnexpectedCharacter('='));
            };
            let (value, after) = parse(&rest[1..])?;
            named.insert(key, value);
            rest = after;
        } else {
            args.push(arg);
        }

        rest = rest.trim_start();
        match rest.as_bytes().first() {
            Some(&b')') => {
                let consumed = arg_src.len() - rest.len();
                return Ok((arg_src[..consumed].trim().to_owned(), args, named, &rest[1..]));
            }
            Some(&b',') => {
                rest = rest[1..].trim_start();
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument);
                }
            }
            Some(_) => return Err(ParseError::MissingComma),
            None => return Err(ParseError::MissingComma),
        }
    }
}
