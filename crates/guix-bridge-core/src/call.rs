//! Encoding of procedure calls into Guile source text.

use std::fmt;

use crate::Value;
use crate::value::{format_float, format_symbol, quote_string};

/// One argument of a [`Call`].
///
/// `Nil` and `False` are deliberately distinct: `Nil` encodes as the empty
/// list, `False` as the boolean `#f`.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// No value, encoded as `'()`.
    Nil,
    /// `#t`.
    True,
    /// `#f`.
    False,
    /// A keyword flag such as `#:recursive?`, stored without the prefix.
    Keyword(String),
    /// A quoted symbol.
    Symbol(String),
    /// A quoted list of data.
    List(Vec<Value>),
    /// A string literal.
    Str(String),
    /// An exact integer.
    Int(i64),
    /// An inexact number.
    Float(f64),
}

impl Arg {
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    #[must_use]
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::Keyword(name.into())
    }

    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Append the Guile text for this argument to `out`.
    fn write_to(&self, out: &mut String) {
        match self {
            Self::Nil => out.push_str("'()"),
            Self::True => out.push_str("#t"),
            Self::False => out.push_str("#f"),
            Self::Keyword(name) => {
                out.push_str("#:");
                out.push_str(&format_symbol(name));
            }
            Self::Symbol(name) => {
                out.push('\'');
                out.push_str(&format_symbol(name));
            }
            Self::List(items) => {
                out.push('\'');
                out.push_str(&Value::list(items.iter().cloned()).to_string());
            }
            Self::Str(s) => out.push_str(&quote_string(s)),
            Self::Int(n) => out.push_str(&n.to_string()),
            Self::Float(x) => out.push_str(&format_float(*x)),
        }
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        if b { Self::True } else { Self::False }
    }
}

impl<T: Into<Self>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Self::Int(n.into())
    }
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<Vec<Value>> for Arg {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

/// An immutable description of a remote procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    function: String,
    args: Vec<Arg>,
}

impl Call {
    /// Create a call with no arguments.
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    /// Create a call from a function name and arguments.
    #[must_use]
    pub fn with_args(function: impl Into<String>, args: impl IntoIterator<Item = Arg>) -> Self {
        Self {
            function: function.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// The Guile source text of this call.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.function.len() + 2 + self.args.len() * 8);
        out.push('(');
        out.push_str(&self.function);
        for arg in &self.args {
            out.push(' ');
            arg.write_to(&mut out);
        }
        out.push(')');
        out
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encode `function` applied to `args`.
#[must_use]
pub fn encode<I, A>(function: &str, args: I) -> String
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    Call::with_args(function, args.into_iter().map(Into::into)).encode()
}
