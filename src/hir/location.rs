//! Source Location Definitions
//!
//! ソースコード位置情報を定義する。
//! パイプライン全体 (lexer → parser → HIR → codegen) で共有される。

use serde::{Deserialize, Serialize};

/// ソースコード位置情報 (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// 位置が不明な場合
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_display() {
        assert_eq!(SourcePos::new(3, 7).to_string(), "3:7");
    }

    #[test]
    fn test_unknown_pos() {
        assert!(!SourcePos::unknown().is_known());
        assert!(SourcePos::new(1, 1).is_known());
    }
}
