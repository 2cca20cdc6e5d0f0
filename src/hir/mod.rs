//! HIR (High-level Intermediate Representation) module
//!
//! 型付きで言語中立な中間表現。ブリッジが生成し、推論パスだけが書き換える。
//!
//! ## サブモジュール
//! - `ops` - 演算子定義
//! - `exprs` - 式定義 (HirExpr)
//! - `nodes` - ステートメント・関数・クラス・モジュール
//! - `location` - ソースコード位置情報 (SourcePos)
//! - `visit` - 読み取り専用の走査

pub mod exprs;
pub mod location;
pub mod nodes;
pub mod ops;
pub mod visit;

pub use exprs::*;
pub use location::*;
pub use nodes::*;
pub use ops::*;
