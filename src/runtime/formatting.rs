//! printf-style rendering of single runtime values.
//!
//! [`sprintf`] follows `snprintf`: it writes what fits into a fixed buffer
//! and reports the size the full rendering needs, so [`format_static`] can
//! retry with a larger buffer.

use std::fmt;

use crate::lang::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FormatError {
    BadSpec { fmt: String, reason: String },
    TypeMismatch { conversion: char, type_name: &'static str },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadSpec { fmt, reason } => {
                write!(f, "bad format '{}': {}", fmt, reason)
            }
            FormatError::TypeMismatch {
                conversion,
                type_name,
            } => write!(f, "%{} format: a number is required, not {}", conversion, type_name),
        }
    }
}

impl std::error::Error for FormatError {}

fn bad_spec(fmt: &str, reason: impl Into<String>) -> FormatError {
    FormatError::BadSpec {
        fmt: fmt.to_string(),
        reason: reason.into(),
    }
}

/// Fixed-capacity byte buffer that [`sprintf`] renders into.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new(n: usize) -> Self {
        Buffer { data: vec![0; n] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resize(&mut self, n: usize) {
        self.data.resize(n, 0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Render `x` into `buf` according to `fmt`.
///
/// Writes at most `buf.len() - 1` bytes followed by a NUL. Returns the
/// length of the full rendering plus one for the terminator; a result
/// larger than `buf.len()` means the output was truncated.
pub fn sprintf(buf: &mut Buffer, fmt: &str, x: &Value) -> Result<usize, FormatError> {
    let rendered = render(fmt, x)?;
    let bytes = rendered.as_bytes();
    if let Some(room) = buf.len().checked_sub(1) {
        let n = bytes.len().min(room);
        buf.data[..n].copy_from_slice(&bytes[..n]);
        buf.data[n] = 0;
    }
    Ok(bytes.len() + 1)
}

/// Format `x` with an `n`-byte buffer, growing it once if the rendering
/// does not fit.
pub fn format_static(fmt: &str, x: &Value, n: usize) -> Result<String, FormatError> {
    let mut buf = Buffer::new(n);
    let mut needed = sprintf(&mut buf, fmt, x)?;
    if needed > buf.len() {
        buf.resize(needed);
        needed = sprintf(&mut buf, fmt, x)?;
    }
    let written = needed.min(buf.len()).saturating_sub(1);
    buf.resize(written);
    Ok(String::from_utf8_lossy(buf.as_bytes()).into_owned())
}

// =============================================================================
// Conversion specs
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    conv: char,
}

fn render(fmt: &str, x: &Value) -> Result<String, FormatError> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut consumed = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alt = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = field(fmt, &mut chars, "width")?;
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(field(fmt, &mut chars, "precision")?);
        }
        // C length modifiers carry no meaning for 64-bit values
        while matches!(chars.peek(), Some('l' | 'h' | 'q' | 'L' | 'j' | 'z' | 't')) {
            chars.next();
        }

        spec.conv = chars
            .next()
            .ok_or_else(|| bad_spec(fmt, "incomplete conversion"))?;
        if spec.conv == '%' {
            out.push('%');
            continue;
        }
        if consumed {
            return Err(bad_spec(fmt, "more conversions than arguments"));
        }
        consumed = true;
        out.push_str(&convert(fmt, &spec, x)?);
    }

    Ok(out)
}

/// Widest field width or precision a conversion may ask for.
const MAX_FIELD: usize = 1 << 16;

/// Parse a decimal width or precision.
fn field(
    fmt: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    what: &str,
) -> Result<usize, FormatError> {
    let mut n: usize = 0;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(d as usize))
            .filter(|&n| n <= MAX_FIELD)
            .ok_or_else(|| bad_spec(fmt, format!("{} too large", what)))?;
        chars.next();
    }
    Ok(n)
}

fn as_int(spec: &Spec, x: &Value) -> Result<i64, FormatError> {
    match x {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) => Ok(f.trunc() as i64),
        other => Err(FormatError::TypeMismatch {
            conversion: spec.conv,
            type_name: other.type_name(),
        }),
    }
}

fn as_float(spec: &Spec, x: &Value) -> Result<f64, FormatError> {
    match x {
        Value::Float(f) => Ok(*f),
        Value::Int(n) => Ok(*n as f64),
        Value::Bool(b) => Ok(*b as i64 as f64),
        other => Err(FormatError::TypeMismatch {
            conversion: spec.conv,
            type_name: other.type_name(),
        }),
    }
}

fn convert(fmt: &str, spec: &Spec, x: &Value) -> Result<String, FormatError> {
    match spec.conv {
        'd' | 'i' => {
            let n = as_int(spec, x)?;
            let digits = int_digits(n.unsigned_abs().to_string(), spec);
            Ok(pad_numeric(sign(n < 0, spec), &digits, spec, spec.precision.is_none()))
        }
        'u' => {
            let n = as_int(spec, x)? as u64;
            let digits = int_digits(n.to_string(), spec);
            Ok(pad_numeric("", &digits, spec, spec.precision.is_none()))
        }
        'x' | 'X' | 'o' => {
            let n = as_int(spec, x)? as u64;
            let (digits, prefix) = match spec.conv {
                'x' => (format!("{:x}", n), "0x"),
                'X' => (format!("{:X}", n), "0X"),
                _ => (format!("{:o}", n), "0"),
            };
            let digits = int_digits(digits, spec);
            let prefix = if spec.alt && n != 0 && !digits.starts_with('0') {
                prefix
            } else {
                ""
            };
            Ok(pad_numeric(prefix, &digits, spec, spec.precision.is_none()))
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let v = as_float(spec, x)?;
            let negative = v.is_sign_negative() && !v.is_nan();
            if !v.is_finite() {
                let body = match (v.is_nan(), spec.conv.is_ascii_uppercase()) {
                    (true, false) => "nan",
                    (true, true) => "NAN",
                    (false, false) => "inf",
                    (false, true) => "INF",
                };
                return Ok(pad_numeric(sign(negative, spec), body, spec, false));
            }
            let body = float_body(v.abs(), spec);
            Ok(pad_numeric(sign(negative, spec), &body, spec, true))
        }
        's' => {
            let s = x.to_string();
            let s = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            };
            Ok(pad(&s, spec))
        }
        'r' => {
            let s = match x {
                Value::Float(f) => float_repr(*f),
                other => other.repr(),
            };
            Ok(pad(&s, spec))
        }
        other => Err(bad_spec(fmt, format!("unsupported conversion '%{}'", other))),
    }
}

fn sign(negative: bool, spec: &Spec) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

/// Apply an integer precision: the minimum number of digits.
fn int_digits(digits: String, spec: &Spec) -> String {
    match spec.precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

fn pad(body: &str, spec: &Spec) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body.to_string();
    }
    let fill = " ".repeat(spec.width - len);
    if spec.left {
        format!("{}{}", body, fill)
    } else {
        format!("{}{}", fill, body)
    }
}

fn pad_numeric(prefix: &str, body: &str, spec: &Spec, zero_ok: bool) -> String {
    let len = prefix.len() + body.len();
    if spec.zero && zero_ok && !spec.left && len < spec.width {
        return format!("{}{}{}", prefix, "0".repeat(spec.width - len), body);
    }
    pad(&format!("{}{}", prefix, body), spec)
}

// =============================================================================
// Floats
// =============================================================================

/// `1.234e5` (Rust) -> `1.234e+05` (C).
fn c_exponent(s: &str, upper: bool) -> String {
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s.to_string();
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    let e = if upper { 'E' } else { 'e' };
    let digits = if digits.len() < 2 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    format!("{}{}{}{}", mantissa, e, sign, digits)
}

fn exponent_of(v: f64, precision: usize) -> i32 {
    let s = format!("{:.*e}", precision, v);
    s.split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0)
}

fn strip_fraction_zeros(s: &str) -> String {
    let (num, exp) = match s.find(['e', 'E']) {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    if !num.contains('.') {
        return s.to_string();
    }
    let num = num.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", num, exp)
}

/// Unsigned float rendering for the `f`, `e` and `g` families.
fn float_body(v: f64, spec: &Spec) -> String {
    let upper = spec.conv.is_ascii_uppercase();
    let p = spec.precision.unwrap_or(6);
    let body = match spec.conv.to_ascii_lowercase() {
        'f' => format!("{:.*}", p, v),
        'e' => c_exponent(&format!("{:.*e}", p, v), upper),
        _ => {
            let p = p.max(1);
            let x = exponent_of(v, p - 1);
            let s = if x < -4 || x >= p as i32 {
                c_exponent(&format!("{:.*e}", p - 1, v), upper)
            } else {
                format!("{:.*}", (p as i32 - 1 - x).max(0) as usize, v)
            };
            if spec.alt {
                s
            } else {
                strip_fraction_zeros(&s)
            }
        }
    };
    if spec.alt && !body.contains('.') && spec.conv.to_ascii_lowercase() == 'f' {
        format!("{}.", body)
    } else {
        body
    }
}

/// Shortest round-tripping form, always showing it is a float.
fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{:?}", v);
    if s.contains('e') {
        c_exponent(&s, false)
    } else {
        s
    }
}
