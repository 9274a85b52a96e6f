//! Error taxonomy.
//!
//! Failures inside the interpreter are materialised as first-class
//! exception objects; this module only names the kinds the core itself
//! can raise and carries their default messages. The interpreter maps a
//! kind to the matching bootstrapped exception class.

use std::fmt;

/// Kinds of errors the dispatch engine raises on its own.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// `break`/`return` from a scope whose frame is gone.
    LocalJump,
    /// Strict arity mismatch.
    Argument,
    /// Raised by the literal-message opcode and internal failures.
    Runtime,
    /// Method resolution fell through even for `method_missing`.
    NoMethod,
    /// Fixnum division by zero.
    ZeroDivision,
    /// Operation on a value of the wrong type.
    Type,
}

impl ErrorKind {
    /// Name of the exception class this kind materialises as.
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::LocalJump => "LocalJumpError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::NoMethod => "NoMethodError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Type => "TypeError",
        }
    }
}

/// A kind plus its rendered message.
#[derive(Clone, Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> CoreError {
        CoreError {
            kind,
            message: message.into(),
        }
    }

    /// "unexpected break" / "unexpected return".
    pub fn local_jump(kind_name: &str) -> CoreError {
        CoreError::new(ErrorKind::LocalJump, format!("unexpected {}", kind_name))
    }

    /// Arity mismatch, optionally prefixed with the method name.
    pub fn arg_count(method: Option<&str>, given: i64, expected: i64) -> CoreError {
        let message = match method {
            Some(name) => format!(
                "'{}': wrong number of arguments ({} for {})",
                name, given, expected
            ),
            None => format!("wrong number of arguments ({} for {})", given, expected),
        };
        CoreError::new(ErrorKind::Argument, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.class_name(), self.message)
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_count_message() {
        let e = CoreError::arg_count(Some("push"), 2, 1);
        assert_eq!(e.message, "'push': wrong number of arguments (2 for 1)");
        let e = CoreError::arg_count(None, 2, 1);
        assert_eq!(e.message, "wrong number of arguments (2 for 1)");
    }

    #[test]
    fn test_display() {
        let e = CoreError::local_jump("break");
        assert_eq!(e.to_string(), "LocalJumpError: unexpected break");
    }
}
