//! Reader for the Guile literal grammar.
//!
//! Decodes the printed representation of a Guile value into a [`Value`].
//! Booleans and `#<unspecified>` are recognised as whole tokens, so text that
//! merely contains `#t` or `#f` inside a string or symbol is left intact.

use thiserror::Error;

use crate::Value;

/// Reader error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty input")]
    Empty,
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Unexpected `{found}` at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("Unreadable object: {0}")]
    Unreadable(String),
    #[error("Invalid string escape `\\{0}`")]
    InvalidEscape(char),
    #[error("Unknown character name: {0}")]
    UnknownChar(String),
    #[error("Trailing input at offset {0}")]
    TrailingInput(usize),
}

/// Decode exactly one datum from `raw`.
///
/// # Errors
/// Returns error if `raw` is not a single readable datum.
pub fn decode(raw: &str) -> Result<Value, DecodeError> {
    let mut reader = Reader::new(raw);
    reader.skip_atmosphere();
    if reader.at_end() {
        return Err(DecodeError::Empty);
    }
    let value = reader.read_datum()?;
    reader.skip_atmosphere();
    if reader.at_end() {
        Ok(value)
    } else {
        Err(DecodeError::TrailingInput(reader.pos))
    }
}

/// Decode every datum in `raw`, in order.
///
/// # Errors
/// Returns error on the first datum that cannot be read.
pub fn decode_all(raw: &str) -> Result<Vec<Value>, DecodeError> {
    let mut reader = Reader::new(raw);
    let mut values = Vec::new();
    loop {
        reader.skip_atmosphere();
        if reader.at_end() {
            return Ok(values);
        }
        values.push(reader.read_datum()?);
    }
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn next_char(&mut self) -> Result<char, DecodeError> {
        self.bump().ok_or(DecodeError::UnexpectedEof)
    }

    fn unexpected(&self, found: char) -> DecodeError {
        DecodeError::Unexpected {
            found,
            offset: self.pos,
        }
    }

    fn skip_atmosphere(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_datum(&mut self) -> Result<Value, DecodeError> {
        self.skip_atmosphere();
        let c = self.peek().ok_or(DecodeError::UnexpectedEof)?;
        match c {
            '(' | '[' => {
                self.bump();
                self.read_list(if c == '(' { ')' } else { ']' })
            }
            ')' | ']' => Err(self.unexpected(c)),
            '\'' => self.read_abbreviation(1, "quote"),
            '`' => self.read_abbreviation(1, "quasiquote"),
            ',' if self.peek_second() == Some('@') => self.read_abbreviation(2, "unquote-splicing"),
            ',' => self.read_abbreviation(1, "unquote"),
            '"' => {
                self.bump();
                self.read_string().map(Value::Str)
            }
            '#' => {
                self.bump();
                self.read_hash()
            }
            _ => Ok(parse_atom(self.read_token())),
        }
    }

    fn read_abbreviation(&mut self, width: usize, name: &str) -> Result<Value, DecodeError> {
        self.pos += width;
        let datum = self.read_datum()?;
        Ok(Value::List(vec![Value::symbol(name), datum]))
    }

    fn read_list(&mut self, close: char) -> Result<Value, DecodeError> {
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            let c = self.peek().ok_or(DecodeError::UnexpectedEof)?;
            if c == close {
                self.bump();
                return Ok(Value::list(items));
            }
            if c == '.' && self.peek_second().is_none_or(is_delimiter) {
                if items.is_empty() {
                    return Err(self.unexpected(c));
                }
                self.bump();
                let tail = self.read_datum()?;
                self.skip_atmosphere();
                match self.bump() {
                    Some(end) if end == close => return Ok(join_tail(items, tail)),
                    Some(other) => return Err(self.unexpected(other)),
                    None => return Err(DecodeError::UnexpectedEof),
                }
            }
            items.push(self.read_datum()?);
        }
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let mut out = String::new();
        loop {
            match self.next_char()? {
                '"' => return Ok(out),
                '\\' => match self.next_char()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'a' => out.push('\u{7}'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    'x' => out.push(self.read_hex_escape(None)?),
                    'u' => out.push(self.read_hex_escape(Some(4))?),
                    'U' => out.push(self.read_hex_escape(Some(6))?),
                    '\n' => {
                        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
                            self.bump();
                        }
                    }
                    other => return Err(DecodeError::InvalidEscape(other)),
                },
                c => out.push(c),
            }
        }
    }

    /// `\xHH` (two digits), `\xH...;` (R6RS style), or a fixed-width escape.
    fn read_hex_escape(&mut self, width: Option<usize>) -> Result<char, DecodeError> {
        let start = self.pos;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_hexdigit() || width.is_some_and(|w| digits.len() == w) {
                break;
            }
            digits.push(c);
            self.bump();
        }
        if width.is_none() && self.peek() == Some(';') {
            self.bump();
        } else if width.is_none() && digits.len() > 2 {
            // Guile's short form takes exactly two digits.
            self.pos = start + 2;
            digits.truncate(2);
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or(DecodeError::InvalidEscape('x'))
    }

    fn read_hash(&mut self) -> Result<Value, DecodeError> {
        match self.peek().ok_or(DecodeError::UnexpectedEof)? {
            '(' => {
                self.bump();
                match self.read_list(')')? {
                    Value::Nil => Ok(Value::Vector(Vec::new())),
                    Value::List(items) => Ok(Value::Vector(items)),
                    _ => Err(DecodeError::Unreadable("dotted vector".to_string())),
                }
            }
            '\\' => {
                self.bump();
                self.read_char()
            }
            ':' => {
                self.bump();
                Ok(Value::Keyword(self.read_token().to_string()))
            }
            '{' => {
                self.bump();
                self.read_extended_symbol()
            }
            '<' => {
                let start = self.pos - 1;
                while let Some(c) = self.bump() {
                    if c == '>' {
                        break;
                    }
                }
                let object = &self.src[start..self.pos];
                if object == "#<unspecified>" {
                    Ok(Value::Nil)
                } else {
                    Err(DecodeError::Unreadable(object.to_string()))
                }
            }
            _ => match self.read_token() {
                "t" | "true" => Ok(Value::Bool(true)),
                "f" | "false" => Ok(Value::Nil),
                other => Err(DecodeError::Unreadable(format!("#{other}"))),
            },
        }
    }

    fn read_char(&mut self) -> Result<Value, DecodeError> {
        let first = self.next_char()?;
        if self.peek().is_none_or(is_delimiter) {
            return Ok(Value::Char(first));
        }
        let start = self.pos - first.len_utf8();
        self.read_token();
        let name = &self.src[start..self.pos];
        let c = match name {
            "space" => ' ',
            "newline" | "linefeed" | "nl" => '\n',
            "tab" => '\t',
            "return" => '\r',
            "nul" | "null" => '\0',
            "alarm" => '\u{7}',
            "backspace" => '\u{8}',
            "delete" | "del" => '\u{7f}',
            "escape" | "esc" => '\u{1b}',
            _ => name
                .strip_prefix('x')
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .and_then(char::from_u32)
                .ok_or_else(|| DecodeError::UnknownChar(name.to_string()))?,
        };
        Ok(Value::Char(c))
    }

    fn read_extended_symbol(&mut self) -> Result<Value, DecodeError> {
        let rest = &self.src[self.pos..];
        let end = rest.find("}#").ok_or(DecodeError::UnexpectedEof)?;
        let name = rest[..end].to_string();
        self.pos += end + 2;
        Ok(Value::Symbol(name))
    }

    fn read_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }
}

const fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';')
}

fn join_tail(mut items: Vec<Value>, tail: Value) -> Value {
    match tail {
        Value::Nil => Value::List(items),
        Value::List(more) => {
            items.extend(more);
            Value::List(items)
        }
        Value::Pair(more, tail) => {
            items.extend(more);
            Value::Pair(items, tail)
        }
        tail => Value::Pair(items, Box::new(tail)),
    }
}

fn parse_atom(token: &str) -> Value {
    match token {
        "+inf.0" => return Value::Float(f64::INFINITY),
        "-inf.0" => return Value::Float(f64::NEG_INFINITY),
        "+nan.0" | "-nan.0" => return Value::Float(f64::NAN),
        _ => {}
    }
    if !token.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.')) {
        return Value::Symbol(token.to_string());
    }
    // Rust also accepts `inf` and `nan`, which Guile reads as symbols.
    if token
        .chars()
        .any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E'))
    {
        return Value::Symbol(token.to_string());
    }
    if let Ok(n) = token.parse::<i64>() {
        return Value::Int(n);
    }
    if let Some((num, den)) = token.split_once('/') {
        if let (Ok(num), Ok(den)) = (num.parse::<f64>(), den.parse::<f64>()) {
            return Value::Float(num / den);
        }
    }
    token
        .parse::<f64>()
        .map_or_else(|_| Value::Symbol(token.to_string()), Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(decode("42").unwrap(), Value::Int(42));
        assert_eq!(decode("-7").unwrap(), Value::Int(-7));
        assert_eq!(decode("#t").unwrap(), Value::Bool(true));
        assert_eq!(decode("#true").unwrap(), Value::Bool(true));
        assert_eq!(decode("#f").unwrap(), Value::Nil);
        assert_eq!(decode("#<unspecified>").unwrap(), Value::Nil);
        assert_eq!(decode("\"abc\"").unwrap(), Value::string("abc"));
        assert_eq!(decode("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(decode("1/4").unwrap(), Value::Float(0.25));
    }

    #[test]
    fn test_infinity_names_are_symbols() {
        assert_eq!(decode("+inf").unwrap(), Value::symbol("+inf"));
        assert_eq!(decode("-infinity").unwrap(), Value::symbol("-infinity"));
        assert_eq!(decode("+nan").unwrap(), Value::symbol("+nan"));
        assert_eq!(decode("1e3").unwrap(), Value::Float(1000.0));
        assert_eq!(decode("-inf.0").unwrap(), Value::Float(f64::NEG_INFINITY));
    }

    #[test]
    fn test_list_of_numbers() {
        assert_eq!(
            decode("(1 2 3)").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(decode("()").unwrap(), Value::Nil);
    }

    #[test]
    fn test_symbols_and_keywords() {
        assert_eq!(decode("guix-package").unwrap(), Value::symbol("guix-package"));
        assert_eq!(decode("-").unwrap(), Value::symbol("-"));
        assert_eq!(decode("#:outputs").unwrap(), Value::Keyword("outputs".into()));
        assert_eq!(decode("#{two words}#").unwrap(), Value::symbol("two words"));
    }

    #[test]
    fn test_boolean_text_inside_strings_is_untouched() {
        assert_eq!(decode(r##""#t and #f""##).unwrap(), Value::string("#t and #f"));
        assert_eq!(decode("foo#f").unwrap(), Value::symbol("foo#f"));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            decode(r#""a\nb\t\"c\"\\""#).unwrap(),
            Value::string("a\nb\t\"c\"\\")
        );
        assert_eq!(decode(r#""\x41;\x42""#).unwrap(), Value::string("AB"));
        assert_eq!(decode(r#""é""#).unwrap(), Value::string("é"));
        assert_eq!(decode(r#""\q""#), Err(DecodeError::InvalidEscape('q')));
    }

    #[test]
    fn test_pairs_and_alists() {
        let v = decode(r#"((result "1" "2") (output . "hello"))"#).unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::List(vec![Value::symbol("result"), Value::string("1"), Value::string("2")]),
                Value::Pair(vec![Value::symbol("output")], Box::new(Value::string("hello"))),
            ])
        );
        assert_eq!(
            decode("(a . (b c))").unwrap(),
            Value::List(vec![Value::symbol("a"), Value::symbol("b"), Value::symbol("c")])
        );
        assert_eq!(decode("(a . ())").unwrap(), Value::List(vec![Value::symbol("a")]));
    }

    #[test]
    fn test_quote_shorthand() {
        assert_eq!(
            decode("'(a b)").unwrap(),
            Value::List(vec![
                Value::symbol("quote"),
                Value::List(vec![Value::symbol("a"), Value::symbol("b")]),
            ])
        );
    }

    #[test]
    fn test_chars_and_vectors() {
        assert_eq!(
            decode("#(#\\a #\\space #\\x41)").unwrap(),
            Value::Vector(vec![Value::Char('a'), Value::Char(' '), Value::Char('A')])
        );
        assert_eq!(decode("#()").unwrap(), Value::Vector(vec![]));
        assert_eq!(decode("#\\(").unwrap(), Value::Char('('));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            decode("; leading\n(1 ; inner\n 2)").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode(""), Err(DecodeError::Empty));
        assert_eq!(decode("(1 2"), Err(DecodeError::UnexpectedEof));
        assert_eq!(decode("1 2"), Err(DecodeError::TrailingInput(2)));
        assert!(matches!(decode(")"), Err(DecodeError::Unexpected { found: ')', .. })));
        assert!(matches!(
            decode("#<procedure car (_)>"),
            Err(DecodeError::Unreadable(text)) if text == "#<procedure car (_)>"
        ));
    }

    #[test]
    fn test_oversized_integer_becomes_float() {
        assert_eq!(
            decode("100000000000000000000").unwrap(),
            Value::Float(1e20)
        );
    }

    #[test]
    fn test_decode_all() {
        let values = tokio_test::assert_ok!(decode_all("1 \"two\" (3)"));
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], Value::List(vec![Value::Int(3)]));
        tokio_test::assert_err!(decode_all("1 (2"));
    }
}
