//! Error types for the Depyler transpiler

use crate::hir::SourcePos;
use thiserror::Error;

/// Transpilation failure surfaced to the caller.
///
/// One error aborts the compilation unit; no recovery is attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DepylerError {
    #[error("Parse error at {pos}: {message}")]
    ParseError { pos: SourcePos, message: String },

    #[error("Unsupported syntax at {pos}: {detail}")]
    UnsupportedSyntax { pos: SourcePos, detail: String },

    #[error("Unmappable type at {pos}: {ty}")]
    UnmappableType { pos: SourcePos, ty: String },

    #[error("Unresolved name '{name}' at {pos}")]
    NameResolution { pos: SourcePos, name: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DepylerError {
    pub fn parse(pos: SourcePos, message: impl Into<String>) -> Self {
        DepylerError::ParseError {
            pos,
            message: message.into(),
        }
    }

    pub fn unsupported(pos: SourcePos, detail: impl Into<String>) -> Self {
        DepylerError::UnsupportedSyntax {
            pos,
            detail: detail.into(),
        }
    }

    pub fn unmappable(pos: SourcePos, ty: impl Into<String>) -> Self {
        DepylerError::UnmappableType { pos, ty: ty.into() }
    }

    pub fn unresolved(pos: SourcePos, name: impl Into<String>) -> Self {
        DepylerError::NameResolution {
            pos,
            name: name.into(),
        }
    }

    /// Source position, if the variant carries one
    pub fn pos(&self) -> Option<SourcePos> {
        match self {
            DepylerError::ParseError { pos, .. }
            | DepylerError::UnsupportedSyntax { pos, .. }
            | DepylerError::UnmappableType { pos, .. }
            | DepylerError::NameResolution { pos, .. } => Some(*pos),
            DepylerError::Internal(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DepylerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = DepylerError::parse(SourcePos::new(5, 3), "unexpected token");
        assert_eq!(format!("{err}"), "Parse error at 5:3: unexpected token");
    }

    #[test]
    fn test_unmappable_display() {
        let err = DepylerError::unmappable(SourcePos::new(10, 1), "Unknown");
        assert_eq!(format!("{err}"), "Unmappable type at 10:1: Unknown");
    }

    #[test]
    fn test_internal_has_no_pos() {
        let err = DepylerError::Internal("oops".to_string());
        assert!(err.pos().is_none());
        let err = DepylerError::unresolved(SourcePos::new(2, 4), "foo");
        assert_eq!(err.pos(), Some(SourcePos::new(2, 4)));
    }
}
