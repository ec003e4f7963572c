use std::fmt::Display;

use indexmap::IndexMap;
use thiserror::Error;

use super::Value;

/// The closed set of error codes a T program can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TypeError,
    ArityError,
    NameError,
    DivisionByZero,
    KeyError,
    IndexError,
    AssertionError,
    FileError,
    ValueError,
    SyntaxError,
    MatchError,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TypeError => "TypeError",
            ErrorCode::ArityError => "ArityError",
            ErrorCode::NameError => "NameError",
            ErrorCode::DivisionByZero => "DivisionByZero",
            ErrorCode::KeyError => "KeyError",
            ErrorCode::IndexError => "IndexError",
            ErrorCode::AssertionError => "AssertionError",
            ErrorCode::FileError => "FileError",
            ErrorCode::ValueError => "ValueError",
            ErrorCode::SyntaxError => "SyntaxError",
            ErrorCode::MatchError => "MatchError",
            ErrorCode::GenericError => "GenericError",
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ErrorCode::TypeError,
            1 => ErrorCode::ArityError,
            2 => ErrorCode::NameError,
            3 => ErrorCode::DivisionByZero,
            4 => ErrorCode::KeyError,
            5 => ErrorCode::IndexError,
            6 => ErrorCode::AssertionError,
            7 => ErrorCode::FileError,
            8 => ErrorCode::ValueError,
            9 => ErrorCode::SyntaxError,
            10 => ErrorCode::MatchError,
            11 => ErrorCode::GenericError,
            _ => return None,
        })
    }

    pub fn tag(&self) -> u8 {
        match self {
            ErrorCode::TypeError => 0,
            ErrorCode::ArityError => 1,
            ErrorCode::NameError => 2,
            ErrorCode::DivisionByZero => 3,
            ErrorCode::KeyError => 4,
            ErrorCode::IndexError => 5,
            ErrorCode::AssertionError => 6,
            ErrorCode::FileError => 7,
            ErrorCode::ValueError => 8,
            ErrorCode::SyntaxError => 9,
            ErrorCode::MatchError => 10,
            ErrorCode::GenericError => 11,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime error. Errors are first-class values: they travel through
/// evaluation inside `Value::Error` and are only converted to `Result` at the
/// host boundary.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct TError {
    pub code: ErrorCode,
    pub message: String,
    pub context: IndexMap<String, Value>,
}

impl PartialEq for TError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl TError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: IndexMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeError, message)
    }

    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ArityError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NameError, message)
    }

    pub fn division_by_zero(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DivisionByZero, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IndexError, message)
    }

    pub fn assertion_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AssertionError, message)
    }

    pub fn file_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FileError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValueError, message)
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SyntaxError, message)
    }

    pub fn match_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MatchError, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenericError, message)
    }

    /// The error raised whenever an NA reaches an operator or a builtin that
    /// is not NA-aware.
    pub fn na_operand(what: impl Display) -> Self {
        Self::type_error(format!("Operation on NA: {what}"))
    }
}

impl From<std::io::Error> for TError {
    fn from(e: std::io::Error) -> Self {
        TError::file_error(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_tags_round_trip() {
        for tag in 0..12u8 {
            let code = ErrorCode::from_tag(tag).unwrap();
            assert_eq!(code.tag(), tag);
        }
        assert!(ErrorCode::from_tag(12).is_none());
    }

    #[test]
    fn display_carries_code_and_message() {
        let e = TError::type_error("bad operand");
        assert_eq!(e.to_string(), "TypeError: bad operand");
    }

    #[test]
    fn context_preserves_insertion_order() {
        let e = TError::generic("x")
            .with_context("file", "a.t")
            .with_context("line", 3i64);
        let keys: Vec<_> = e.context.keys().cloned().collect();
        assert_eq!(keys, vec!["file", "line"]);
    }
}
