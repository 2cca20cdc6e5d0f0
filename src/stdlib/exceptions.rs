//! Runtime error taxa emitted into generated code

use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in exception class with a generated Rust error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorTaxon {
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    ZeroDivisionError,
    StopIteration,
    RuntimeError,
    IOError,
    FileNotFoundError,
    AttributeError,
}

impl ErrorTaxon {
    pub const ALL: [ErrorTaxon; 10] = [
        ErrorTaxon::IndexError,
        ErrorTaxon::KeyError,
        ErrorTaxon::ValueError,
        ErrorTaxon::TypeError,
        ErrorTaxon::ZeroDivisionError,
        ErrorTaxon::StopIteration,
        ErrorTaxon::RuntimeError,
        ErrorTaxon::IOError,
        ErrorTaxon::FileNotFoundError,
        ErrorTaxon::AttributeError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorTaxon::IndexError => "IndexError",
            ErrorTaxon::KeyError => "KeyError",
            ErrorTaxon::ValueError => "ValueError",
            ErrorTaxon::TypeError => "TypeError",
            ErrorTaxon::ZeroDivisionError => "ZeroDivisionError",
            ErrorTaxon::StopIteration => "StopIteration",
            ErrorTaxon::RuntimeError => "RuntimeError",
            ErrorTaxon::IOError => "IOError",
            ErrorTaxon::FileNotFoundError => "FileNotFoundError",
            ErrorTaxon::AttributeError => "AttributeError",
        }
    }

    /// Exact taxon for a class name
    pub fn from_python(name: &str) -> Option<ErrorTaxon> {
        ErrorTaxon::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Taxon constructed by `raise <name>(...)`
    ///
    /// 抽象的な基底クラスは最も近い具象タクソンに寄せる。
    pub fn for_raise(name: &str) -> Option<ErrorTaxon> {
        if let Some(t) = ErrorTaxon::from_python(name) {
            return Some(t);
        }
        let mapped = match name {
            "Exception" | "BaseException" | "NotImplementedError" | "AssertionError"
            | "OverflowError" | "RecursionError" => ErrorTaxon::RuntimeError,
            "OSError" | "EnvironmentError" | "PermissionError" => ErrorTaxon::IOError,
            "LookupError" => ErrorTaxon::KeyError,
            "ArithmeticError" => ErrorTaxon::ZeroDivisionError,
            "UnicodeDecodeError" | "UnicodeError" => ErrorTaxon::ValueError,
            _ => return None,
        };
        Some(mapped)
    }

    /// Parent class of a user exception deriving from a built-in
    pub fn is_builtin_exception(name: &str) -> bool {
        ErrorTaxon::for_raise(name).is_some()
    }
}

impl fmt::Display for ErrorTaxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What an `except <handler>:` clause catches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchSet {
    /// `except Exception`, bare `except`
    All,
    Taxa(Vec<ErrorTaxon>),
    /// User-defined exception class
    User(String),
}

/// Built-in hierarchy for handler names
pub fn caught_by(handler: &str) -> CatchSet {
    match handler {
        "Exception" | "BaseException" => CatchSet::All,
        "LookupError" => CatchSet::Taxa(vec![ErrorTaxon::IndexError, ErrorTaxon::KeyError]),
        "ArithmeticError" => CatchSet::Taxa(vec![ErrorTaxon::ZeroDivisionError]),
        "OSError" | "IOError" | "EnvironmentError" => {
            CatchSet::Taxa(vec![ErrorTaxon::IOError, ErrorTaxon::FileNotFoundError])
        }
        other => match ErrorTaxon::from_python(other) {
            Some(t) => CatchSet::Taxa(vec![t]),
            None => CatchSet::User(other.to_string()),
        },
    }
}

/// Rust definition of a generated error type
pub fn error_struct(name: &str) -> String {
    format!(
        "#[derive(Debug, Clone)]
pub struct {name} {{
    pub message: String,
}}

impl {name} {{
    pub fn new(message: impl Into<String>) -> Self {{
        Self {{ message: message.into() }}
    }}
}}

impl std::fmt::Display for {name} {{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {{
        write!(f, \"{{}}\", self.message)
    }}
}}

impl std::error::Error for {name} {{}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert_eq!(
            caught_by("LookupError"),
            CatchSet::Taxa(vec![ErrorTaxon::IndexError, ErrorTaxon::KeyError])
        );
        assert_eq!(caught_by("Exception"), CatchSet::All);
        assert_eq!(caught_by("ZeroDivisionError"), CatchSet::Taxa(vec![ErrorTaxon::ZeroDivisionError]));
        assert_eq!(caught_by("MyError"), CatchSet::User("MyError".to_string()));
    }

    #[test]
    fn test_raise_mapping() {
        assert_eq!(ErrorTaxon::for_raise("ValueError"), Some(ErrorTaxon::ValueError));
        assert_eq!(ErrorTaxon::for_raise("Exception"), Some(ErrorTaxon::RuntimeError));
        assert_eq!(ErrorTaxon::for_raise("OSError"), Some(ErrorTaxon::IOError));
        assert_eq!(ErrorTaxon::for_raise("MyError"), None);
    }

    #[test]
    fn test_error_struct_shape() {
        let code = error_struct("KeyError");
        assert!(code.contains("pub struct KeyError"));
        assert!(code.contains("impl std::error::Error for KeyError {}"));
        assert!(code.contains("write!(f, \"{}\", self.message)"));
    }
}
