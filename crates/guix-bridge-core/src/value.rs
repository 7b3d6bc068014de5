//! Host-side representation of Guile data.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded Guile datum.
///
/// `#f`, `#<unspecified>` and the empty list all decode to [`Value::Nil`],
/// the "no value" marker. `Bool(false)` is only ever built by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// No value: `#f`, `#<unspecified>` or `()`.
    Nil,
    /// A boolean.
    Bool(bool),
    /// An exact integer that fits in 64 bits.
    Int(i64),
    /// An inexact number (also used for rationals and oversized integers).
    Float(f64),
    /// A string.
    Str(String),
    /// A character.
    Char(char),
    /// A symbol.
    Symbol(String),
    /// A keyword, stored without its `#:` prefix.
    Keyword(String),
    /// A proper, non-empty list.
    List(Vec<Value>),
    /// An improper list: leading elements and the final cdr.
    Pair(Vec<Value>, Box<Value>),
    /// A vector.
    Vector(Vec<Value>),
}

impl Value {
    /// Build a symbol.
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Build a string.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Build a list, collapsing an empty one into [`Value::Nil`].
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        let items: Vec<Self> = items.into_iter().collect();
        if items.is_empty() { Self::Nil } else { Self::List(items) }
    }

    /// Whether this is the "no value" marker.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Guile truthiness: everything except `#f` is true.
    #[must_use]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// The elements of a proper list. `Nil` is the empty list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::Nil => Some(&[]),
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up `key` in an association list.
    ///
    /// Entries may be proper lists `(key v ...)` or pairs `(key . v)`;
    /// the whole entry is returned so the caller can pick either shape.
    #[must_use]
    pub fn assq(&self, key: &str) -> Option<&Self> {
        self.as_list()?
            .iter()
            .find(|entry| entry.car().and_then(Self::as_symbol) == Some(key))
    }

    /// First element of a list or pair.
    #[must_use]
    pub fn car(&self) -> Option<&Self> {
        match self {
            Self::List(items) | Self::Pair(items, _) => items.first(),
            _ => None,
        }
    }

    /// Everything after the first element, as a value.
    #[must_use]
    pub fn cdr(&self) -> Option<Self> {
        match self {
            Self::List(items) => Some(Self::list(items[1..].iter().cloned())),
            Self::Pair(items, tail) if items.len() == 1 => Some((**tail).clone()),
            Self::Pair(items, tail) => Some(Self::Pair(items[1..].to_vec(), tail.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Prints the value in Guile read syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("()"),
            Self::Bool(true) => f.write_str("#t"),
            Self::Bool(false) => f.write_str("#f"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Str(s) => f.write_str(&quote_string(s)),
            Self::Char(c) => f.write_str(&format_char(*c)),
            Self::Symbol(s) => f.write_str(&format_symbol(s)),
            Self::Keyword(k) => write!(f, "#:{}", format_symbol(k)),
            Self::List(items) => write_seq(f, "(", items, None),
            Self::Pair(items, tail) => write_seq(f, "(", items, Some(&**tail)),
            Self::Vector(items) => write_seq(f, "#(", items, None),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: &[Value],
    tail: Option<&Value>,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    if let Some(tail) = tail {
        write!(f, " . {tail}")?;
    }
    f.write_str(")")
}

/// Guile string literal for `s`.
#[must_use]
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Float in a form Guile reads back as an inexact number.
#[must_use]
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "+nan.0".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "+inf.0" } else { "-inf.0" }.to_string()
    } else {
        // Debug always keeps a fractional part or an exponent.
        format!("{x:?}")
    }
}

/// Symbol text, using `#{...}#` when the bare name would not read back.
#[must_use]
pub fn format_symbol(name: &str) -> String {
    if needs_extended_syntax(name) {
        format!("#{{{name}}}#")
    } else {
        name.to_string()
    }
}

fn needs_extended_syntax(name: &str) -> bool {
    name.is_empty()
        || name.starts_with('#')
        || (name.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
            && name.parse::<f64>().is_ok())
        || name == "."
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'' | '`' | ','))
}

fn format_char(c: char) -> String {
    match c {
        ' ' => "#\\space".to_string(),
        '\n' => "#\\newline".to_string(),
        '\t' => "#\\tab".to_string(),
        '\0' => "#\\nul".to_string(),
        c => format!("#\\{c}"),
    }
}
